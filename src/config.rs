//! Configuration loader and validator for the board backup.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::MAX_BOARDS_PER_JOB;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub miro: Miro,
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub retry: Retry,
}

/// Miro API access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Miro {
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for Miro {
    fn default() -> Self {
        Self {
            org_id: String::new(),
            token: String::new(),
            base_url: default_base_url(),
        }
    }
}

/// Local archive and enumeration settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct App {
    pub data_dir: String,
    pub ledger_file: String,
    pub offset: usize,
    pub page_limit: usize,
    /// Write an `ABANDONED` ledger line for boards whose batch never produced results.
    pub record_abandoned: bool,
}

impl Default for App {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            ledger_file: "metadata.ledger".into(),
            offset: 0,
            page_limit: MAX_BOARDS_PER_JOB,
            record_abandoned: false,
        }
    }
}

/// Retry budgets, one per remote call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Retry {
    pub list_boards: RetryPolicy,
    pub create_export: RetryPolicy,
    pub export_status: RetryPolicy,
    pub export_results: RetryPolicy,
    pub download: RetryPolicy,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            list_boards: RetryPolicy::fixed(5, 20),
            create_export: RetryPolicy::fixed(10, 10),
            export_status: RetryPolicy::fixed(60, 180),
            export_results: RetryPolicy::fixed(5, 10),
            download: RetryPolicy::fixed(1, 10),
        }
    }
}

fn default_base_url() -> String {
    crate::miro::MIRO_API_BASE.to_string()
}

impl App {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_path().join(&self.ledger_file)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file. Validation is left to the caller so
/// command-line overrides can be applied first.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.miro.org_id.trim().is_empty() {
        return Err(ConfigError::Invalid("miro.org_id must be non-empty"));
    }
    if cfg.miro.token.trim().is_empty() {
        return Err(ConfigError::Invalid("miro.token must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.miro.base_url).is_err() {
        return Err(ConfigError::Invalid("miro.base_url must be an absolute URL"));
    }

    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.ledger_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.ledger_file must be non-empty"));
    }
    if cfg.app.page_limit == 0 || cfg.app.page_limit > MAX_BOARDS_PER_JOB {
        return Err(ConfigError::Invalid("app.page_limit must be between 1 and 50"));
    }

    let r = &cfg.retry;
    if [r.list_boards, r.create_export, r.export_status, r.export_results, r.download]
        .iter()
        .any(|p| p.max_attempts == 0)
    {
        return Err(ConfigError::Invalid("retry.*.max_attempts must be > 0"));
    }

    Ok(())
}

/// Example YAML with every section spelled out.
pub fn example() -> &'static str {
    r#"miro:
  org_id: "3074457350000000000"
  token: "YOUR_MIRO_ACCESS_TOKEN"
  base_url: "https://api.miro.com/"

app:
  data_dir: "./data"
  ledger_file: "metadata.ledger"
  offset: 0
  page_limit: 50
  record_abandoned: false

retry:
  list_boards: { delay_secs: 5, max_attempts: 20 }
  create_export: { delay_secs: 10, max_attempts: 10 }
  export_status:
    delay_secs: 60
    max_attempts: 180
    backoff: { kind: exponential, multiplier: 2, max_delay_secs: 300 }
  export_results: { delay_secs: 5, max_attempts: 10 }
  download: { delay_secs: 1, max_attempts: 10 }
"#
}
