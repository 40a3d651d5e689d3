use phonenumber::{country, Mode, PhoneNumber};
use regex::Regex;
use tracing::debug;

/// Shape of a US number written inside free text, with optional extension.
const CANDIDATE: &str = r"(?i)(?:\+?1[\s.-]?)?(?:\(\d{3}\)|\d{3})[\s.-]?\d{3}[\s.-]?\d{4}(?:\s?(?:ext\.?|extension|x)\s?\d{1,6})?";

/// Seven digits: anything shorter is not a dialable US number, and the
/// parser may have eaten a leading `1` as the trunk prefix (`123` -> `23`).
const SHORTEST_LOCAL: u64 = 1_000_000;

/// How a phone number was (or wasn't) recovered from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneOutcome {
    Empty,
    /// Found embedded in surrounding text.
    Matched(String),
    /// The whole text parsed as one number.
    Parsed(String),
    NotFound,
}

impl PhoneOutcome {
    /// National display format, or `""`.
    pub fn formatted(&self) -> &str {
        match self {
            PhoneOutcome::Matched(s) | PhoneOutcome::Parsed(s) => s,
            PhoneOutcome::Empty | PhoneOutcome::NotFound => "",
        }
    }
}

pub struct PhoneMatcher {
    candidate: Regex,
}

impl PhoneMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(PhoneMatcher {
            candidate: Regex::new(CANDIDATE)?,
        })
    }

    pub fn normalize(&self, raw: &str) -> PhoneOutcome {
        let text = to_ascii(raw.trim());
        let text = text.as_str();
        if text.is_empty() {
            return PhoneOutcome::Empty;
        }

        let outcome = if let Some(found) = self.find_in_text(text) {
            PhoneOutcome::Matched(found)
        } else if let Some(parsed) = parse_whole(text) {
            PhoneOutcome::Parsed(parsed)
        } else {
            PhoneOutcome::NotFound
        };
        debug!(raw = %text, parsed = outcome.formatted(), "Normalized phone");
        outcome
    }

    /// First standalone US-shaped number in `text`.
    fn find_in_text(&self, text: &str) -> Option<String> {
        self.candidate
            .find_iter(text)
            .filter(|m| standalone(text, m.start(), m.end()))
            .filter_map(|m| parse_us(m.as_str()))
            .find(is_ten_digit_nanp)
            .map(|n| national(&n))
    }
}

fn parse_whole(text: &str) -> Option<String> {
    if !text.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    parse_us(text)
        .filter(|n| n.national().value() >= SHORTEST_LOCAL)
        .map(|n| national(&n))
}

fn parse_us(text: &str) -> Option<PhoneNumber> {
    phonenumber::parse(Some(country::Id::US), text).ok()
}

fn is_ten_digit_nanp(number: &PhoneNumber) -> bool {
    number.code().value() == 1 && (1_000_000_000..10_000_000_000).contains(&number.national().value())
}

fn national(number: &PhoneNumber) -> String {
    number.format().mode(Mode::National).to_string()
}

/// Full-width digits and dialing punctuation as their ASCII forms.
fn to_ascii(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            '－' => '-',
            '（' => '(',
            '）' => ')',
            '＋' => '+',
            '．' => '.',
            '\u{3000}' => ' ',
            _ => c,
        })
        .collect()
}

/// The match is not glued to more digits on either side.
fn standalone(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
}

// ── Tests ──
