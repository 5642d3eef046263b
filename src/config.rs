//! Configuration loader and validator for the credit-gate core.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::{CreditAction, ModelTier};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub provider: Provider,
    pub credits: Credits,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Client polling cadence for job status, in milliseconds.
    pub poll_interval_ms: u64,
    /// Consecutive transport failures tolerated before polling is abandoned.
    pub poll_failure_budget: u32,
    /// Expected wall-clock duration of one generation job, used only by the
    /// simulated progress ramp.
    pub expected_job_seconds: u64,
}

/// External job-provider API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provider {
    pub base_url: String,
    pub api_key: String,
    pub create_timeout_seconds: u64,
    pub status_timeout_seconds: u64,
    /// Total attempts per job-creation call (first try plus retries).
    pub max_create_attempts: u32,
    pub retry_delay_ms: u64,
}

/// Credit costs and visitor-token parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credits {
    pub watermark_removal: i64,
    pub prompt_generation: i64,
    /// Credits granted to a brand-new anonymous visitor.
    pub visitor_initial: i64,
    pub visitor_expiry_days: i64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Unit cost for one action. Video generation is priced by tier.
    pub fn unit_cost(&self, action: CreditAction, tier: Option<ModelTier>) -> i64 {
        match action {
            CreditAction::WatermarkRemoval => self.credits.watermark_removal,
            CreditAction::PromptGeneration => self.credits.prompt_generation,
            CreditAction::VideoGeneration => {
                tier.map(|t| t.unit_cost()).unwrap_or(ModelTier::Sora2.unit_cost())
            }
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.poll_failure_budget == 0 {
        return Err(ConfigError::Invalid("app.poll_failure_budget must be >= 1"));
    }
    if cfg.app.expected_job_seconds == 0 {
        return Err(ConfigError::Invalid("app.expected_job_seconds must be > 0"));
    }

    if cfg.provider.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("provider.base_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.provider.base_url).is_err() {
        return Err(ConfigError::Invalid("provider.base_url must be a valid URL"));
    }
    if cfg.provider.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("provider.api_key must be non-empty"));
    }
    if cfg.provider.create_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("provider.create_timeout_seconds must be > 0"));
    }
    if cfg.provider.status_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("provider.status_timeout_seconds must be > 0"));
    }
    if cfg.provider.max_create_attempts == 0 {
        return Err(ConfigError::Invalid("provider.max_create_attempts must be >= 1"));
    }

    if cfg.credits.watermark_removal <= 0 {
        return Err(ConfigError::Invalid("credits.watermark_removal must be > 0"));
    }
    if cfg.credits.prompt_generation <= 0 {
        return Err(ConfigError::Invalid("credits.prompt_generation must be > 0"));
    }
    if cfg.credits.visitor_initial < 0 {
        return Err(ConfigError::Invalid("credits.visitor_initial must be >= 0"));
    }
    if cfg.credits.visitor_expiry_days <= 0 {
        return Err(ConfigError::Invalid("credits.visitor_expiry_days must be > 0"));
    }

    Ok(())
}

/// Example YAML document matching the schema above.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 6000
  poll_failure_budget: 5
  expected_job_seconds: 90

provider:
  base_url: "https://api.aicoding.sh/v1/"
  api_key: "YOUR_PROVIDER_API_KEY"
  create_timeout_seconds: 30
  status_timeout_seconds: 10
  max_create_attempts: 3
  retry_delay_ms: 1000

credits:
  watermark_removal: 1
  prompt_generation: 1
  visitor_initial: 1
  visitor_expiry_days: 30
"#
}
