use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::extract::{Document, Evaluator};
use crate::fetcher::{FailureReason, FetchOutcome, FetchPolicy, Fetcher};
use crate::normalize::{AddressParser, PhoneMatcher};
use crate::sheet::{ExtractedField, InputRecord, ResultRecord, TIMESTAMP_FORMAT};

const CONNECTED_NOTE: &str = "OK";

/// Everything a row needs, built once per run and shared read-only.
pub struct Pipeline {
    fetcher: Fetcher,
    evaluator: Evaluator,
    addresses: AddressParser,
    phones: PhoneMatcher,
}

struct Extraction {
    address: ExtractedField,
    phone: ExtractedField,
    keyword: ExtractedField,
}

impl Pipeline {
    pub fn new(policy: &FetchPolicy) -> Result<Self> {
        Ok(Pipeline {
            fetcher: Fetcher::new(policy)?,
            evaluator: Evaluator::new()?,
            addresses: AddressParser::new()?,
            phones: PhoneMatcher::new()?,
        })
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn addresses(&self) -> &AddressParser {
        &self.addresses
    }

    pub fn phones(&self) -> &PhoneMatcher {
        &self.phones
    }

    /// Fetch, extract and normalize one row. Never fails; a row that cannot
    /// be fetched comes back with empty fields and the failure reason.
    pub async fn process(&self, record: &InputRecord, index: usize) -> ResultRecord {
        info!(index, url = %record.url, "Processing row");
        let outcome = self.fetcher.fetch(&record.url).await;
        self.assemble(record, index, outcome)
    }

    fn assemble(&self, record: &InputRecord, index: usize, outcome: FetchOutcome) -> ResultRecord {
        let (connection, connection_notes, extraction) = match outcome {
            FetchOutcome::Connected(document) => {
                let extraction = self.extract(&document, record);
                (true, CONNECTED_NOTE.to_string(), extraction)
            }
            FetchOutcome::Failed(reason) => {
                let extraction = Extraction {
                    address: ExtractedField::skipped(&record.address_xpath),
                    phone: ExtractedField::skipped(&record.phone_xpath),
                    keyword: ExtractedField::skipped(&record.keyword_xpath),
                };
                (false, reason.to_string(), extraction)
            }
        };

        ResultRecord {
            index,
            accessed_timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            entry_id: record.entry_id.clone(),
            connection,
            connection_notes,
            organization: record.organization.clone(),
            department: record.department.clone(),
            url: record.url.clone(),
            address: extraction.address,
            expected_address: record.expected_address.clone(),
            phone: extraction.phone,
            expected_phone: record.expected_phone.clone(),
            keyword: extraction.keyword,
            expected_keyword: record.expected_keyword.clone(),
        }
    }

    fn extract(&self, document: &Document, record: &InputRecord) -> Extraction {
        let address = self.field(document, &record.address_xpath, |raw| {
            self.addresses
                .normalize(raw)
                .full_address()
                .unwrap_or(raw)
                .to_string()
        });
        let phone = self.field(document, &record.phone_xpath, |raw| {
            self.phones.normalize(raw).formatted().to_string()
        });
        // Keywords are compared verbatim downstream.
        let keyword = self.field(document, &record.keyword_xpath, |raw| raw.to_string());

        Extraction {
            address,
            phone,
            keyword,
        }
    }

    fn field<F>(&self, document: &Document, xpath: &str, normalize: F) -> ExtractedField
    where
        F: FnOnce(&str) -> String,
    {
        if xpath.trim().is_empty() {
            return ExtractedField::skipped(xpath);
        }
        let raw = self.evaluator.evaluate(document, xpath);
        let normalized = normalize(&raw);
        debug!(xpath, raw = %raw, normalized = %normalized, "Extracted field");
        ExtractedField {
            xpath: xpath.to_string(),
            raw,
            normalized,
        }
    }

    /// A row whose task died before producing a result.
    fn lost(&self, record: &InputRecord, index: usize, why: String) -> ResultRecord {
        self.assemble(record, index, FetchOutcome::Failed(FailureReason::Other(why)))
    }
}

/// Process every record; results come back in input order with 1-based
/// indexes. At most `concurrency` rows are in flight.
pub async fn run_batch(
    pipeline: Arc<Pipeline>,
    records: Vec<InputRecord>,
    concurrency: usize,
) -> Vec<ResultRecord> {
    let total = records.len();
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})") {
        pb.set_style(style.progress_chars("=> "));
    }

    let results = if concurrency <= 1 {
        let mut results = Vec::with_capacity(total);
        for (i, record) in records.iter().enumerate() {
            results.push(pipeline.process(record, i + 1).await);
            pb.inc(1);
        }
        results
    } else {
        run_concurrent(pipeline, records, concurrency, &pb).await
    };

    pb.finish_and_clear();
    let ok = results.iter().filter(|r| r.connection).count();
    info!("Processed {} rows ({} connected, {} failed)", total, ok, total - ok);
    results
}

async fn run_concurrent(
    pipeline: Arc<Pipeline>,
    records: Vec<InputRecord>,
    concurrency: usize,
    pb: &ProgressBar,
) -> Vec<ResultRecord> {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let records = Arc::new(records);

    let handles: Vec<_> = (0..records.len())
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            let records = Arc::clone(&records);
            let sem = Arc::clone(&semaphore);
            tokio::spawn(async move {
                let _permit = sem.acquire_owned().await;
                pipeline.process(&records[i], i + 1).await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (i, handle) in handles.into_iter().enumerate() {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(index = i + 1, error = %e, "Row task failed");
                pipeline.lost(&records[i], i + 1, format!("Row processing failed: {}", e))
            }
        };
        results.push(result);
        pb.inc(1);
    }
    results
}

// ── Tests ──
