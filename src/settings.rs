use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::fetcher::{FetchPolicy, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};

pub const ENV_PREFIX: &str = "CONTACT_AUDIT";
const SETTINGS_FILE: &str = "contact_audit";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no input sheet configured (pass --input or set CONTACT_AUDIT_INPUT)")]
    MissingInput,
    #[error("input sheet {} does not exist", .0.display())]
    InputNotFound(PathBuf),
    #[error("timeout_secs must be greater than zero")]
    ZeroTimeout,
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("user_agent must not be empty")]
    EmptyUserAgent,
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

/// Run settings: defaults, then `contact_audit.toml`, then `CONTACT_AUDIT_*`
/// environment variables. CLI flags are applied on top by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub accept_invalid_certs: bool,
    pub concurrency: usize,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None, ENV_PREFIX)
    }

    /// `file` replaces the default settings-file lookup when given.
    pub fn load_from(file: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(SETTINGS_FILE).required(false),
        };
        let settings = Config::builder()
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("timeout_secs", DEFAULT_TIMEOUT_SECS as i64)?
            .set_default("accept_invalid_certs", true)?
            .set_default("concurrency", 1_i64)?
            .add_source(source)
            .add_source(Environment::with_prefix(env_prefix).try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Checks that apply to every command.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::EmptyUserAgent);
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    /// The sheet a batch run reads; must exist.
    pub fn require_input(&self) -> Result<&Path, ConfigError> {
        let input = self.input.as_deref().ok_or(ConfigError::MissingInput)?;
        if !input.is_file() {
            return Err(ConfigError::InputNotFound(input.to_path_buf()));
        }
        Ok(input)
    }

    /// Where results go: the configured path, else the working directory.
    pub fn output_target(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }
}

// ── Tests ──
