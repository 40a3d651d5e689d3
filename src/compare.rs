use std::collections::BTreeMap;

use crate::normalize::{AddressParser, PhoneMatcher};
use crate::sheet::ResultRecord;

/// How a scraped value stands against the value already on the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    Mismatch,
    /// An expression was given but matched nothing.
    Missing,
    /// No expression, or the page never loaded.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowVerdicts {
    pub address: Verdict,
    pub phone: Verdict,
    pub keyword: Verdict,
}

pub fn judge(result: &ResultRecord, addresses: &AddressParser, phones: &PhoneMatcher) -> RowVerdicts {
    let address = gate(result, &result.address.xpath, &result.address.raw).unwrap_or_else(|| {
        let expected = addresses.normalize(&result.expected_address);
        let expected = expected.full_address().unwrap_or("");
        same(expected.eq_ignore_ascii_case(&result.address.normalized))
    });

    let phone = gate(result, &result.phone.xpath, &result.phone.raw).unwrap_or_else(|| {
        let expected = phones.normalize(&result.expected_phone);
        same(!expected.formatted().is_empty() && expected.formatted() == result.phone.normalized)
    });

    let keyword = gate(result, &result.keyword.xpath, &result.keyword.raw).unwrap_or_else(|| {
        let expected = result.expected_keyword.trim();
        same(!expected.is_empty() && result.keyword.raw.contains(expected))
    });

    RowVerdicts {
        address,
        phone,
        keyword,
    }
}

/// Verdict decided before any comparison, if there is one.
fn gate(result: &ResultRecord, xpath: &str, raw: &str) -> Option<Verdict> {
    if !result.connection || xpath.trim().is_empty() {
        Some(Verdict::Skipped)
    } else if raw.is_empty() {
        Some(Verdict::Missing)
    } else {
        None
    }
}

fn same(equal: bool) -> Verdict {
    if equal {
        Verdict::Match
    } else {
        Verdict::Mismatch
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub matched: usize,
    pub mismatched: usize,
    pub missing: usize,
    pub skipped: usize,
}

impl Tally {
    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Match => self.matched += 1,
            Verdict::Mismatch => self.mismatched += 1,
            Verdict::Missing => self.missing += 1,
            Verdict::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub total: usize,
    pub connected: usize,
    /// Failure notes and how many rows hit each.
    pub failures: BTreeMap<String, usize>,
    pub address: Tally,
    pub phone: Tally,
    pub keyword: Tally,
}

impl Summary {
    pub fn from_results(results: &[ResultRecord], addresses: &AddressParser, phones: &PhoneMatcher) -> Self {
        let mut summary = Summary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            if result.connection {
                summary.connected += 1;
            } else {
                *summary.failures.entry(result.connection_notes.clone()).or_default() += 1;
            }
            let verdicts = judge(result, addresses, phones);
            summary.address.record(verdicts.address);
            summary.phone.record(verdicts.phone);
            summary.keyword.record(verdicts.keyword);
        }
        summary
    }

    pub fn print(&self) {
        println!(
            "Rows: {} ({} connected, {} failed)",
            self.total,
            self.connected,
            self.total - self.connected
        );
        for (note, count) in &self.failures {
            println!("  {:>4} x {}", count, note);
        }
        println!();
        println!(
            "{:<8} | {:>5} | {:>8} | {:>7} | {:>7}",
            "Field", "Match", "Mismatch", "Missing", "Skipped"
        );
        println!("{}", "-".repeat(47));
        for (name, t) in [("Address", &self.address), ("Phone", &self.phone), ("Keyword", &self.keyword)] {
            println!(
                "{:<8} | {:>5} | {:>8} | {:>7} | {:>7}",
                name, t.matched, t.mismatched, t.missing, t.skipped
            );
        }
    }
}

// ── Tests ──
