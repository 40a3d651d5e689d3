use std::collections::BTreeMap;

use regex::{Captures, Regex};
use tracing::debug;

const STREET_TYPES: &[&str] = &[
    "Alley", "Aly", "Avenue", "Ave", "Av", "Boulevard", "Blvd", "Causeway", "Center", "Ctr",
    "Circle", "Cir", "Court", "Ct", "Crossing", "Xing", "Drive", "Dr", "Expressway", "Expy",
    "Freeway", "Fwy", "Highway", "Hwy", "Lane", "Ln", "Loop", "Mall", "Parkway", "Pkwy",
    "Path", "Pike", "Place", "Pl", "Plaza", "Plz", "Point", "Pt", "Ridge", "Rdg", "Road", "Rd",
    "Route", "Rte", "Row", "Run", "Square", "Sq", "Street", "St", "Terrace", "Ter", "Trail",
    "Trl", "Turnpike", "Tpke", "Walk", "Way", "Wy",
];

const DIRECTIONS: &[&str] = &[
    "Northeast", "Northwest", "Southeast", "Southwest", "North", "South", "East", "West", "NE",
    "NW", "SE", "SW", "N", "S", "E", "W",
];

const OCCUPANCY_KEYWORDS: &[&str] = &[
    "Suite", "Ste", "Apartment", "Apt", "Unit", "Room", "Rm", "Floor", "Fl", "Building", "Bldg",
];

const STATE_CODES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY", "PR", "GU", "VI", "AS", "MP",
];

const STATE_NAMES: &[&str] = &[
    "Alabama", "Alaska", "Arizona", "Arkansas", "California", "Colorado", "Connecticut",
    "Delaware", "District of Columbia", "Florida", "Georgia", "Hawaii", "Idaho", "Illinois",
    "Indiana", "Iowa", "Kansas", "Kentucky", "Louisiana", "Maine", "Maryland", "Massachusetts",
    "Michigan", "Minnesota", "Mississippi", "Missouri", "Montana", "Nebraska", "Nevada",
    "New Hampshire", "New Jersey", "New Mexico", "New York", "North Carolina", "North Dakota",
    "Ohio", "Oklahoma", "Oregon", "Pennsylvania", "Rhode Island", "South Carolina",
    "South Dakota", "Tennessee", "Texas", "Utah", "Vermont", "Virginia", "Washington",
    "West Virginia", "Wisconsin", "Wyoming", "Puerto Rico", "Guam",
];

/// A US postal address decomposed into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsAddress {
    pub full_address: String,
    pub full_street: String,
    pub street_number: Option<String>,
    /// Street name including its type, e.g. `Main St`.
    pub street_name: Option<String>,
    pub street_type: Option<String>,
    pub post_direction: Option<String>,
    pub occupancy: Option<String>,
    pub po_box: Option<String>,
    pub city: String,
    /// State or territory.
    pub region1: String,
    pub postal_code: Option<String>,
}

impl UsAddress {
    fn from_captures(caps: &Captures) -> Self {
        let get = |name: &str| caps.name(name).map(|m| m.as_str().to_string());

        let street_number = get("street_number");
        let street_name = get("street_name");
        let po_box = get("po_box");
        let full_street = match (&street_number, &street_name, &po_box) {
            (Some(number), Some(name), _) => format!("{} {}", number, name),
            (_, _, Some(po_box)) => po_box.clone(),
            _ => String::new(),
        };

        let mut address = UsAddress {
            full_address: String::new(),
            full_street,
            street_number,
            street_name,
            street_type: get("street_type"),
            post_direction: get("post_direction"),
            occupancy: get("occupancy"),
            po_box,
            city: get("city").unwrap_or_default(),
            region1: get("region1").unwrap_or_default(),
            postal_code: get("postal_code"),
        };
        address.full_address = address.canonical();
        address
    }

    /// Present components joined by single spaces: street, post direction,
    /// occupancy, city, state, zip.
    fn canonical(&self) -> String {
        let parts = [
            Some(self.full_street.as_str()),
            self.post_direction.as_deref(),
            self.occupancy.as_deref(),
            Some(self.city.as_str()),
            Some(self.region1.as_str()),
            self.postal_code.as_deref(),
        ];
        parts
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Structured parts keyed by name; absent parts are omitted.
    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        let mut out = BTreeMap::new();
        out.insert("full_address", self.full_address.clone());
        out.insert("full_street", self.full_street.clone());
        out.insert("city", self.city.clone());
        out.insert("region1", self.region1.clone());
        let optional = [
            ("street_number", &self.street_number),
            ("street_name", &self.street_name),
            ("street_type", &self.street_type),
            ("post_direction", &self.post_direction),
            ("occupancy", &self.occupancy),
            ("po_box", &self.po_box),
            ("postal_code", &self.postal_code),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                out.insert(key, v.clone());
            }
        }
        out
    }
}

/// What became of a piece of address text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressOutcome {
    /// Nothing to parse.
    Empty,
    Parsed(UsAddress),
    /// No address found; carries the cleaned-up text.
    Unparsed(String),
}

impl AddressOutcome {
    pub fn full_address(&self) -> Option<&str> {
        match self {
            AddressOutcome::Empty => None,
            AddressOutcome::Parsed(address) => Some(&address.full_address),
            AddressOutcome::Unparsed(text) => Some(text),
        }
    }

    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        match self {
            AddressOutcome::Empty => BTreeMap::new(),
            AddressOutcome::Parsed(address) => address.fields(),
            AddressOutcome::Unparsed(text) => BTreeMap::from([("full_address", text.clone())]),
        }
    }
}

/// Compiled US address grammar.
pub struct AddressParser {
    grammar: Regex,
    whitespace: Regex,
}

impl AddressParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(AddressParser {
            grammar: Regex::new(&grammar())?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    pub fn normalize(&self, raw: &str) -> AddressOutcome {
        let text = self.preprocess(raw);
        if text.is_empty() {
            return AddressOutcome::Empty;
        }

        match self.grammar.captures(&text) {
            Some(caps) => {
                let address = UsAddress::from_captures(&caps);
                debug!(raw = %text, full_address = %address.full_address, "Parsed address");
                AddressOutcome::Parsed(address)
            }
            None => {
                debug!(raw = %text, "Could not parse address, keeping raw text");
                AddressOutcome::Unparsed(text)
            }
        }
    }

    /// Join fragments with spaces, then normalize.
    pub fn normalize_fragments<S: AsRef<str>>(&self, fragments: &[S]) -> AddressOutcome {
        let joined = fragments
            .iter()
            .map(|f| f.as_ref())
            .collect::<Vec<_>>()
            .join(" ");
        self.normalize(&joined)
    }

    fn preprocess(&self, raw: &str) -> String {
        let without_commas = raw.replace(',', "");
        self.whitespace
            .replace_all(&without_commas, " ")
            .trim()
            .to_string()
    }
}

fn alternation(words: &[&str]) -> String {
    words
        .iter()
        .map(|w| regex::escape(w).replace(' ', r"\s"))
        .collect::<Vec<_>>()
        .join("|")
}

fn grammar() -> String {
    let street_types = alternation(STREET_TYPES);
    let directions = alternation(DIRECTIONS);
    let occupancy = alternation(OCCUPANCY_KEYWORDS);
    let state_codes = alternation(STATE_CODES);
    let state_names = alternation(STATE_NAMES);

    let po_box = r"(?P<po_box>(?i:P\.?\s?O\.?\s?Box|Post\sOffice\sBox)\s#?\d+)";
    let street = format!(
        r"(?P<street_number>\d{{1,6}}[A-Za-z]?(?:-\d{{1,6}})?)\s(?P<street_name>(?:[A-Za-z0-9][A-Za-z0-9.'-]*\s){{1,5}}?(?P<street_type>(?i:{street_types}))\b\.?)(?:\s(?P<post_direction>(?i:{directions}))\b\.?)?"
    );
    let unit = format!(
        r"(?:\s(?P<occupancy>(?i:{occupancy})\.?\s?#?[A-Za-z0-9-]+|#\s?[A-Za-z0-9-]+))?"
    );
    let city = r"\s(?P<city>[A-Za-z][A-Za-z.'-]*(?:\s[A-Za-z][A-Za-z.'-]*){0,3}?)";
    let state = format!(r"\s(?P<region1>(?i:{state_names})|{state_codes})\b");
    let zip = r"(?:\s(?P<postal_code>\d{5}(?:-\d{4})?)\b)?";

    format!(r"\b(?:{po_box}|{street}){unit}{city}{state}{zip}")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> AddressParser {
        AddressParser::new().unwrap()
    }

    fn parsed(outcome: AddressOutcome) -> UsAddress {
        match outcome {
            AddressOutcome::Parsed(a) => a,
            other => panic!("expected a parsed address, got {:?}", other),
        }
    }

    #[test]
    fn simple_street_address() {
        let a = parsed(parser().normalize("123 Main St, Springfield, IL 62704"));
        assert_eq!(a.street_number.as_deref(), Some("123"));
        assert_eq!(a.street_name.as_deref(), Some("Main St"));
        assert_eq!(a.street_type.as_deref(), Some("St"));
        assert_eq!(a.city, "Springfield");
        assert_eq!(a.region1, "IL");
        assert_eq!(a.postal_code.as_deref(), Some("62704"));
        assert_eq!(a.full_street, "123 Main St");
        assert_eq!(a.full_address, "123 Main St Springfield IL 62704");
    }

    #[test]
    fn not_an_address_falls_back_to_raw() {
        let outcome = parser().normalize("  not an address, at all ");
        assert_eq!(outcome, AddressOutcome::Unparsed("not an address at all".into()));
        let fields = outcome.fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["full_address"], "not an address at all");
    }

    #[test]
    fn empty_input() {
        let p = parser();
        assert_eq!(p.normalize(""), AddressOutcome::Empty);
        assert_eq!(p.normalize(" \n "), AddressOutcome::Empty);
        assert!(p.normalize("").fields().is_empty());
        assert_eq!(p.normalize("").full_address(), None);
    }

    #[test]
    fn missing_zip_is_still_an_address() {
        let a = parsed(parser().normalize("500 Oak Avenue Portland OR"));
        assert_eq!(a.city, "Portland");
        assert_eq!(a.region1, "OR");
        assert_eq!(a.postal_code, None);
        assert_eq!(a.full_address, "500 Oak Avenue Portland OR");
        assert!(!a.fields().contains_key("postal_code"));
    }

    #[test]
    fn multi_word_city_and_suite() {
        let a = parsed(parser().normalize(
            "Office of Records\n 1 Centre Street, Suite 2000\n New York, NY 10007-1234",
        ));
        assert_eq!(a.street_number.as_deref(), Some("1"));
        assert_eq!(a.street_name.as_deref(), Some("Centre Street"));
        assert_eq!(a.occupancy.as_deref(), Some("Suite 2000"));
        assert_eq!(a.city, "New York");
        assert_eq!(a.region1, "NY");
        assert_eq!(a.postal_code.as_deref(), Some("10007-1234"));
        assert_eq!(a.full_address, "1 Centre Street Suite 2000 New York NY 10007-1234");
    }

    #[test]
    fn full_state_name_and_direction() {
        let a = parsed(parser().normalize("77 Lake Shore Dr N Chicago Illinois 60611"));
        assert_eq!(a.post_direction.as_deref(), Some("N"));
        assert_eq!(a.city, "Chicago");
        assert_eq!(a.region1, "Illinois");
    }

    #[test]
    fn po_box() {
        let a = parsed(parser().normalize("P.O. Box 1450, Helena, MT 59624"));
        assert_eq!(a.po_box.as_deref(), Some("P.O. Box 1450"));
        assert_eq!(a.street_number, None);
        assert_eq!(a.full_address, "P.O. Box 1450 Helena MT 59624");
    }

    #[test]
    fn fragments_are_joined() {
        let a = parsed(parser().normalize_fragments(&["123 Main St", "Springfield", "IL 62704"]));
        assert_eq!(a.full_address, "123 Main St Springfield IL 62704");
    }

    #[test]
    fn surrounding_text_is_ignored() {
        let a = parsed(parser().normalize("Visit us at 42 Elm Rd. Dover DE 19901 during business hours"));
        assert_eq!(a.street_name.as_deref(), Some("Elm Rd."));
        assert_eq!(a.full_address, "42 Elm Rd. Dover DE 19901");
    }

    #[test]
    fn canonical_form_is_stable() {
        let p = parser();
        for raw in [
            "123 Main St, Springfield, IL 62704",
            "1 Centre Street, Suite 2000, New York, NY 10007",
            "P.O. Box 1450, Helena, MT 59624",
            "not an address at all",
        ] {
            let once = p.normalize(raw).full_address().unwrap().to_string();
            let twice = p.normalize(&once).full_address().unwrap().to_string();
            assert_eq!(once, twice, "normalizing {:?} twice changed it", raw);
        }
    }
}
