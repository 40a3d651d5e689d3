use std::panic::{self, AssertUnwindSafe};

use regex::Regex;
use scraper::{ElementRef, Html, Node};
use sxd_document::{dom, Package};
use sxd_xpath::Value;
use tracing::debug;

/// Deepest element nesting copied as structure; text below it is kept flat.
const MAX_DEPTH: usize = 256;

/// Elements html5ever adds to any input, markup or not.
const IMPLIED: [&str; 3] = ["html", "head", "body"];

/// A fetched page, rebuilt as an XPath-queryable tree.
///
/// HTML is parsed leniently (html5ever via `scraper`), then copied into an
/// `sxd_document` tree using local names only, so expressions like
/// `//div[@class='x']` work without namespace prefixes.
pub struct Document {
    package: Package,
}

impl Document {
    /// Returns `None` when the input holds no markup: blank text, plain
    /// text, or anything else that parses to nothing but the implied
    /// `html`/`head`/`body` skeleton.
    pub fn parse(markup: &str) -> Option<Self> {
        if markup.trim().is_empty() {
            return None;
        }

        let html = Html::parse_document(markup);
        let package = Package::new();
        let mut source_elements = 0usize;
        {
            let doc = package.as_document();
            let mut stack = Vec::new();

            for top in html.tree.root().children() {
                match top.value() {
                    Node::Element(el) => {
                        let copy = copy_element(&doc, el);
                        doc.root().append_child(copy);
                        stack.push((top, copy, 1));
                        if !IMPLIED.contains(&el.name()) {
                            source_elements += 1;
                        }
                    }
                    Node::Comment(c) => {
                        doc.root().append_child(doc.create_comment(c));
                    }
                    _ => {}
                }
            }

            while let Some((node, parent, depth)) = stack.pop() {
                for child in node.children() {
                    match child.value() {
                        Node::Element(el) => {
                            if !IMPLIED.contains(&el.name()) {
                                source_elements += 1;
                            }
                            if depth >= MAX_DEPTH {
                                let text: String = ElementRef::wrap(child)
                                    .map(|e| e.text().collect())
                                    .unwrap_or_default();
                                if !text.is_empty() {
                                    parent.append_child(doc.create_text(&text));
                                }
                                continue;
                            }
                            let copy = copy_element(&doc, el);
                            parent.append_child(copy);
                            stack.push((child, copy, depth + 1));
                        }
                        Node::Text(text) => {
                            parent.append_child(doc.create_text(text));
                        }
                        Node::Comment(c) => {
                            parent.append_child(doc.create_comment(c));
                        }
                        _ => {}
                    }
                }
            }
        }

        if source_elements == 0 {
            return None;
        }
        Some(Document { package })
    }
}

fn copy_element<'d>(doc: &dom::Document<'d>, el: &scraper::node::Element) -> dom::Element<'d> {
    let copy = doc.create_element(el.name());
    for (name, value) in el.attrs() {
        copy.set_attribute_value(name, value);
    }
    copy
}

/// Applies location expressions to documents and flattens the matches to text.
pub struct Evaluator {
    whitespace: Regex,
}

impl Evaluator {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Evaluator {
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Evaluate `expression` against `document`.
    ///
    /// Never fails: an empty or malformed expression, an empty match set, or
    /// a match that renders to nothing all come back as `""`.
    pub fn evaluate(&self, document: &Document, expression: &str) -> String {
        let expression = expression.trim();
        if expression.is_empty() {
            return String::new();
        }
        debug!(xpath = expression, "Evaluating location expression");

        let doc = document.package.as_document();
        // sxd-xpath panics on name tests with an unbound prefix (`//x:div`).
        let evaluated = panic::catch_unwind(AssertUnwindSafe(|| {
            sxd_xpath::evaluate_xpath(&doc, expression).map(render)
        }));
        let text = match evaluated {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                debug!(xpath = expression, error = %e, "Location expression did not evaluate");
                return String::new();
            }
            Err(_) => {
                debug!(xpath = expression, "Location expression aborted during evaluation");
                return String::new();
            }
        };

        self.collapse(&text)
    }

    /// Collapse whitespace runs to one space and trim; a stringified empty
    /// collection (`[]`) counts as empty.
    pub fn collapse(&self, text: &str) -> String {
        let collapsed = self.whitespace.replace_all(text, " ");
        let trimmed = collapsed.trim();
        if trimmed == "[]" {
            String::new()
        } else {
            trimmed.to_string()
        }
    }
}

/// Node sets join each node's string value in document order; other
/// results use their XPath string value.
fn render(value: Value<'_>) -> String {
    match value {
        Value::Nodeset(nodes) => nodes
            .document_order()
            .iter()
            .map(|n| n.string_value())
            .collect::<Vec<_>>()
            .join(" "),
        other => other.string(),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Document {
        let html = std::fs::read_to_string("tests/fixtures/county_clerk.html").unwrap();
        Document::parse(&html).unwrap()
    }

    fn evaluator() -> Evaluator {
        Evaluator::new().unwrap()
    }

    #[test]
    fn element_text_is_collapsed() {
        let doc = fixture();
        assert_eq!(
            evaluator().evaluate(&doc, "//p[@class='address']"),
            "123 Main St, Springfield, IL 62704"
        );
    }

    #[test]
    fn multiple_matches_join_with_space() {
        let doc = fixture();
        assert_eq!(evaluator().evaluate(&doc, "//ul[@class='hours']/li"), "Mon Tue Wed");
    }

    #[test]
    fn nested_text_is_included() {
        let doc = fixture();
        assert_eq!(
            evaluator().evaluate(&doc, "//div[@id='phone']"),
            "Main line: Call us at 555-123-4567 today"
        );
    }

    #[test]
    fn attribute_values() {
        let doc = fixture();
        assert_eq!(
            evaluator().evaluate(&doc, "//a[@class='map']/@href"),
            "https://maps.example.com/?q=123+Main+St"
        );
    }

    #[test]
    fn text_nodes() {
        let doc = fixture();
        assert_eq!(
            evaluator().evaluate(&doc, "//p[@class='tagline']/text()"),
            "Serving the community since 1901"
        );
    }

    #[test]
    fn computed_values() {
        let doc = fixture();
        let ev = evaluator();
        assert_eq!(ev.evaluate(&doc, "count(//ul[@class='hours']/li)"), "3");
        assert_eq!(ev.evaluate(&doc, "boolean(//p[@class='tagline'])"), "true");
        assert_eq!(ev.evaluate(&doc, "normalize-space(//h1)"), "Springfield County Clerk");
    }

    #[test]
    fn no_match_is_empty() {
        let doc = fixture();
        let out = evaluator().evaluate(&doc, "//p[@class='nowhere']");
        assert_eq!(out, "");
    }

    #[test]
    fn malformed_expression_is_empty() {
        let doc = fixture();
        let ev = evaluator();
        assert_eq!(ev.evaluate(&doc, "//p[@class="), "");
        assert_eq!(ev.evaluate(&doc, "///"), "");
        assert_eq!(ev.evaluate(&doc, "//x:div"), "");
    }

    #[test]
    fn empty_expression_is_empty() {
        let doc = fixture();
        let ev = evaluator();
        assert_eq!(ev.evaluate(&doc, ""), "");
        assert_eq!(ev.evaluate(&doc, "   "), "");
    }

    #[test]
    fn collapse_rules() {
        let ev = evaluator();
        assert_eq!(ev.collapse("  a \n\t b  "), "a b");
        assert_eq!(ev.collapse(" [] "), "");
        assert_eq!(ev.collapse("[x]"), "[x]");
    }

    #[test]
    fn malformed_html_still_parses() {
        let doc = Document::parse("<div><p>unclosed <b>bold</div><p>next").unwrap();
        let ev = evaluator();
        // html5ever reopens the unclosed <b> inside the next <p>
        assert_eq!(ev.evaluate(&doc, "//b"), "bold next");
        assert_eq!(ev.evaluate(&doc, "count(//p)"), "2");
    }

    #[test]
    fn blank_markup_is_not_a_document() {
        assert!(Document::parse("").is_none());
        assert!(Document::parse(" \n\t ").is_none());
    }

    #[test]
    fn prefixed_names_are_empty() {
        let doc = fixture();
        let ev = evaluator();
        assert_eq!(ev.evaluate(&doc, "//svg:path"), "");
        assert_eq!(ev.evaluate(&doc, "count(//x:li)"), "");
        // the evaluator keeps working afterwards
        assert_eq!(ev.evaluate(&doc, "//ul[@class='hours']/li"), "Mon Tue Wed");
    }

    #[test]
    fn text_without_markup_is_not_a_document() {
        assert!(Document::parse("just some plain text").is_none());
        assert!(Document::parse("{\"phone\": \"555-123-4567\"}").is_none());
        assert!(Document::parse("%PDF\u{fffd}\u{fffd}\0\u{1}").is_none());
        assert!(Document::parse("<html><head></head><body></body></html>").is_none());
        assert!(Document::parse("<p>one tag</p>").is_some());
    }

    #[test]
    fn deep_nesting_is_flattened() {
        let html = format!("{}deep{}", "<div>".repeat(8000), "</div>".repeat(8000));
        // Same stack size as a tokio worker thread.
        let out = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                let doc = Document::parse(&html).unwrap();
                let ev = evaluator();
                (ev.evaluate(&doc, "//body"), ev.evaluate(&doc, "count(//div)"))
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(out.0, "deep");
        let divs: usize = out.1.parse().unwrap();
        assert!(divs < MAX_DEPTH, "copied {} nested divs", divs);
    }
}
