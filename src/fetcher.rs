use std::error::Error as StdError;
use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::extract::Document;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/52.0.2743.82 Safari/537.36";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const TLS_MARKERS: &[&str] = &["certificate", "tls", "ssl", "handshake"];

/// How every page is requested. Built once per run.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub user_agent: String,
    /// Bound on connecting and on each read.
    pub timeout: Duration,
    /// Certificate checks are off by default: many listed sites have broken
    /// TLS setups and a page with a bad certificate still has contact data.
    pub accept_invalid_certs: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        FetchPolicy {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            accept_invalid_certs: true,
        }
    }
}

/// Why a page could not be turned into a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    MissingScheme,
    Tls,
    ReadTimeout,
    Timeout,
    Connection,
    /// Empty or unreadable body.
    EmptyDocument,
    Other(String),
}

impl FailureReason {
    /// Short stable key, used to group failures in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::MissingScheme => "missing_scheme",
            FailureReason::Tls => "tls",
            FailureReason::ReadTimeout => "read_timeout",
            FailureReason::Timeout => "timeout",
            FailureReason::Connection => "connection",
            FailureReason::EmptyDocument => "empty_document",
            FailureReason::Other(_) => "other",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MissingScheme => f.write_str("The URL scheme (e.g. http or https) is missing."),
            FailureReason::Tls => f.write_str("Bad SSL Certificate"),
            FailureReason::ReadTimeout => {
                f.write_str("Their server did not send any data in the allotted amount of time.")
            }
            FailureReason::Timeout => f.write_str("The request timed out."),
            FailureReason::Connection => f.write_str("A Connection error occurred."),
            FailureReason::EmptyDocument => f.write_str("Document is empty"),
            FailureReason::Other(message) => f.write_str(message),
        }
    }
}

pub enum FetchOutcome {
    Connected(Document),
    Failed(FailureReason),
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(policy: &FetchPolicy) -> Result<Self> {
        if policy.accept_invalid_certs {
            warn!("TLS certificate validation is disabled for page fetches");
        }
        let client = Client::builder()
            .user_agent(policy.user_agent.as_str())
            .connect_timeout(policy.timeout)
            .read_timeout(policy.timeout)
            .danger_accept_invalid_certs(policy.accept_invalid_certs)
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Fetcher { client })
    }

    /// One GET, no retries. Every failure is classified, never returned as an error.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let url = match check_url(url) {
            Ok(url) => url,
            Err(reason) => {
                info!(url, %reason, "Skipping fetch");
                return FetchOutcome::Failed(reason);
            }
        };

        let start = Instant::now();
        let body = match self.get_text(url.clone()).await {
            Ok(Some(body)) => body,
            Ok(None) => return FetchOutcome::Failed(FailureReason::EmptyDocument),
            Err(e) => {
                let reason = classify(&e);
                warn!(url = %url, %reason, error = %error_chain(&e), "Fetch failed");
                return FetchOutcome::Failed(reason);
            }
        };
        debug!(url = %url, bytes = body.len(), latency_ms = start.elapsed().as_millis() as u64, "Fetched");

        match Document::parse(&body) {
            Some(document) => FetchOutcome::Connected(document),
            None => {
                warn!(url = %url, "Fetched page has no markup");
                FetchOutcome::Failed(FailureReason::EmptyDocument)
            }
        }
    }

    /// Body text, or `None` when the server labels it as something other
    /// than markup (images, PDFs, archives).
    async fn get_text(&self, url: Url) -> reqwest::Result<Option<String>> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            // Error pages are still parsed; the location expressions decide.
            debug!(%status, "Non-success status");
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(ct) = content_type.as_deref() {
            if !is_markup(ct) {
                warn!(url = %url, content_type = ct, "Fetched page is not markup");
                return Ok(None);
            }
        }
        response.text().await.map(Some)
    }
}

/// Text and XML-family media types; a missing header is given the benefit of the doubt.
fn is_markup(content_type: &str) -> bool {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media.is_empty() || media.starts_with("text/") || media.contains("html") || media.ends_with("xml")
}

fn check_url(raw: &str) -> Result<Url, FailureReason> {
    match Url::parse(raw.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        Ok(url) => Err(FailureReason::Other(format!(
            "No connection adapters were found for '{}'",
            url
        ))),
        Err(url::ParseError::RelativeUrlWithoutBase) => Err(FailureReason::MissingScheme),
        Err(e) => Err(FailureReason::Other(format!("Invalid URL '{}': {}", raw.trim(), e))),
    }
}

fn classify(err: &reqwest::Error) -> FailureReason {
    if err.is_timeout() {
        return if err.is_connect() {
            FailureReason::Timeout
        } else {
            FailureReason::ReadTimeout
        };
    }
    if mentions_tls(err) {
        return FailureReason::Tls;
    }
    if err.is_connect() {
        return FailureReason::Connection;
    }
    if err.is_body() || err.is_decode() {
        return FailureReason::EmptyDocument;
    }
    FailureReason::Other(error_chain(err))
}

/// Looks below the top-level error only; its message carries the URL.
fn mentions_tls(err: &(dyn StdError + 'static)) -> bool {
    let mut current = err.source();
    while let Some(e) = current {
        let text = e.to_string().to_ascii_lowercase();
        if TLS_MARKERS.iter().any(|m| text.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}

// ── Tests ──
