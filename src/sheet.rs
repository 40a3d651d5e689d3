use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

const RESULT_COLUMNS: [&str; 19] = [
    "index",
    "accessed_timestamp",
    "entryid",
    "connection",
    "connection_notes",
    "organization",
    "department_program",
    "url",
    "full_address_xpath",
    "preexisting_full_address",
    "raw_scraped_full_address",
    "formatted_scraped_full_address",
    "phonenum_xpath",
    "preexisting_phonenum",
    "raw_scraped_phonenum",
    "formatted_scraped_phonenum",
    "keyword_xpath",
    "preexisting_keyword",
    "raw_scraped_keyword",
];

// ── Records ──

/// One sheet row. Columns are matched by header name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InputRecord {
    #[serde(rename = "entryid")]
    pub entry_id: String,
    pub organization: String,
    #[serde(rename = "department_program")]
    pub department: String,
    pub url: String,
    #[serde(rename = "full_address_xpath")]
    pub address_xpath: String,
    #[serde(rename = "full_address")]
    pub expected_address: String,
    #[serde(rename = "phonenum_xpath")]
    pub phone_xpath: String,
    #[serde(rename = "phonenum")]
    pub expected_phone: String,
    pub keyword_xpath: String,
    #[serde(rename = "keyword")]
    pub expected_keyword: String,
}

/// Expression used, text it matched, and that text after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedField {
    pub xpath: String,
    pub raw: String,
    pub normalized: String,
}

impl ExtractedField {
    pub fn skipped(xpath: &str) -> Self {
        ExtractedField {
            xpath: xpath.to_string(),
            ..Default::default()
        }
    }
}

/// Outcome of one row; built once by the row processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub index: usize,
    pub accessed_timestamp: String,
    pub entry_id: String,
    pub connection: bool,
    pub connection_notes: String,
    pub organization: String,
    pub department: String,
    pub url: String,
    pub address: ExtractedField,
    pub expected_address: String,
    pub phone: ExtractedField,
    pub expected_phone: String,
    pub keyword: ExtractedField,
    pub expected_keyword: String,
}

/// Flat CSV shape of a `ResultRecord`.
#[derive(Serialize)]
struct ResultRow<'a> {
    index: usize,
    accessed_timestamp: &'a str,
    entryid: &'a str,
    connection: bool,
    connection_notes: &'a str,
    organization: &'a str,
    department_program: &'a str,
    url: &'a str,
    full_address_xpath: &'a str,
    preexisting_full_address: &'a str,
    raw_scraped_full_address: &'a str,
    formatted_scraped_full_address: &'a str,
    phonenum_xpath: &'a str,
    preexisting_phonenum: &'a str,
    raw_scraped_phonenum: &'a str,
    formatted_scraped_phonenum: &'a str,
    keyword_xpath: &'a str,
    preexisting_keyword: &'a str,
    raw_scraped_keyword: &'a str,
}

impl<'a> From<&'a ResultRecord> for ResultRow<'a> {
    fn from(r: &'a ResultRecord) -> Self {
        ResultRow {
            index: r.index,
            accessed_timestamp: &r.accessed_timestamp,
            entryid: &r.entry_id,
            connection: r.connection,
            connection_notes: &r.connection_notes,
            organization: &r.organization,
            department_program: &r.department,
            url: &r.url,
            full_address_xpath: &r.address.xpath,
            preexisting_full_address: &r.expected_address,
            raw_scraped_full_address: &r.address.raw,
            formatted_scraped_full_address: &r.address.normalized,
            phonenum_xpath: &r.phone.xpath,
            preexisting_phonenum: &r.expected_phone,
            raw_scraped_phonenum: &r.phone.raw,
            formatted_scraped_phonenum: &r.phone.normalized,
            keyword_xpath: &r.keyword.xpath,
            preexisting_keyword: &r.expected_keyword,
            raw_scraped_keyword: &r.keyword.raw,
        }
    }
}

// ── Reading ──

pub fn read_records(path: &Path) -> Result<Vec<InputRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open sheet {}", path.display()))?;
    let records = read_records_from(file).with_context(|| format!("Failed to read sheet {}", path.display()))?;
    info!("Loaded {} rows from {}", records.len(), path.display());
    Ok(records)
}

/// Parse a CSV export. Short rows are padded with empty cells, extra cells
/// past the header are dropped.
pub fn read_records_from<R: Read>(reader: R) -> Result<Vec<InputRecord>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: StringRecord = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();
    let width = headers.len();

    let mut records = Vec::new();
    for (i, row) in rdr.records().enumerate() {
        // +2: 1-based, and the header is line 1
        let mut row = row.with_context(|| format!("Malformed sheet row {}", i + 2))?;
        while row.len() < width {
            row.push_field("");
        }
        row.truncate(width);
        let record: InputRecord = row
            .deserialize(Some(&headers))
            .with_context(|| format!("Unreadable sheet row {}", i + 2))?;
        records.push(record);
    }
    Ok(records)
}

// ── Writing ──

pub fn write_results<W: Write>(writer: W, results: &[ResultRecord]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(RESULT_COLUMNS)?;
    for result in results {
        wtr.serialize(ResultRow::from(result))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write results to `target`, or into `target/scraped_results_YYYYMMDD.csv`
/// when `target` is a directory. Returns the file written.
pub fn write_results_file(target: &Path, today: NaiveDate, results: &[ResultRecord]) -> Result<PathBuf> {
    let path = if target.is_dir() {
        target.join(default_file_name(today))
    } else {
        target.to_path_buf()
    };
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_results(file, results)?;
    info!("Wrote {} results to {}", results.len(), path.display());
    Ok(path)
}

pub fn default_file_name(today: NaiveDate) -> String {
    format!("scraped_results_{}.csv", today.format("%Y%m%d"))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "\
EntryID,Organization,Department_Program,Notes,Full_Address,PhoneNum,URL,Full_Address_XPath,PhoneNum_XPath,Keyword,Keyword_XPath
7,Springfield County,Clerk,,\"123 Main St, Springfield, IL 62704\",(217) 555-0142,https://clerk.example.gov,//p[@class='address'],//div[@id='phone'],Vital Records,//p[@class='notice']
8,Shelbyville,Parks
9,Capital City,Library,x,,,https://lib.example.org,,,,,extra,cells
";

    fn sample_result(index: usize) -> ResultRecord {
        ResultRecord {
            index,
            accessed_timestamp: "01/02/2026 03:04:05".into(),
            entry_id: "7".into(),
            connection: true,
            connection_notes: "OK".into(),
            organization: "Springfield County".into(),
            department: "Clerk".into(),
            url: "https://clerk.example.gov".into(),
            address: ExtractedField {
                xpath: "//p".into(),
                raw: "123 Main St, Springfield, IL 62704".into(),
                normalized: "123 Main St Springfield IL 62704".into(),
            },
            expected_address: "123 Main St, Springfield, IL 62704".into(),
            phone: ExtractedField::skipped(""),
            expected_phone: String::new(),
            keyword: ExtractedField::skipped(""),
            expected_keyword: String::new(),
        }
    }

    #[test]
    fn reads_by_header_name() {
        let records = read_records_from(SHEET.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        let r = &records[0];
        assert_eq!(r.entry_id, "7");
        assert_eq!(r.department, "Clerk");
        assert_eq!(r.expected_address, "123 Main St, Springfield, IL 62704");
        assert_eq!(r.expected_phone, "(217) 555-0142");
        assert_eq!(r.address_xpath, "//p[@class='address']");
        assert_eq!(r.phone_xpath, "//div[@id='phone']");
        assert_eq!(r.expected_keyword, "Vital Records");
        assert_eq!(r.keyword_xpath, "//p[@class='notice']");
    }

    #[test]
    fn short_rows_are_padded() {
        let records = read_records_from(SHEET.as_bytes()).unwrap();
        let r = &records[1];
        assert_eq!(r.organization, "Shelbyville");
        assert_eq!(r.url, "");
        assert_eq!(r.address_xpath, "");
    }

    #[test]
    fn long_rows_are_truncated() {
        let records = read_records_from(SHEET.as_bytes()).unwrap();
        assert_eq!(records[2].url, "https://lib.example.org");
        assert_eq!(records[2].keyword_xpath, "");
    }

    #[test]
    fn missing_columns_read_as_empty() {
        let records = read_records_from("url\nhttps://a.example\n".as_bytes()).unwrap();
        assert_eq!(records[0].url, "https://a.example");
        assert_eq!(records[0].entry_id, "");
        assert_eq!(records[0].keyword_xpath, "");
    }

    #[test]
    fn writes_header_and_rows_in_order() {
        let mut out = Vec::new();
        write_results(&mut out, &[sample_result(1), sample_result(2)]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], RESULT_COLUMNS.join(","));
        assert!(lines[1].starts_with("1,01/02/2026 03:04:05,7,true,OK,Springfield County,Clerk,"));
        assert!(lines[1].contains("\"123 Main St, Springfield, IL 62704\",123 Main St Springfield IL 62704"));
        assert!(lines[2].starts_with("2,"));
    }

    #[test]
    fn empty_batch_still_has_header() {
        let mut out = Vec::new();
        write_results(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim_end(), RESULT_COLUMNS.join(","));
    }

    #[test]
    fn directory_target_gets_dated_name() {
        let dir = tempfile::tempdir().unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let path = write_results_file(dir.path(), today, &[sample_result(1)]).unwrap();
        assert_eq!(path, dir.path().join("scraped_results_20261019.csv"));
        let back = std::fs::read_to_string(&path).unwrap();
        assert_eq!(back.lines().count(), 2);
    }
}
