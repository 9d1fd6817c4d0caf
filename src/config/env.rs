use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub classifier: ClassifierConfig,
    pub source: SourceConfig,
    pub throttle: ThrottleConfig,
    pub pipeline: PipelineConfig,
    pub notifier: NotifierConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub timezone: Tz,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: Url,
    pub channel: String,
    pub target_site: String,
    pub max_retries: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Baseline probability that an arbitrary item is bad.
    pub prior: f64,
    /// Multiplier applied to the bad accumulator before comparing odds.
    pub threshold: f64,
    pub model_filename: String,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub api_url: Url,
    pub api_key: Option<String>,
    pub filter: String,
    pub timeout: Duration,
    pub item_url_base: String,
}

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub recency_window: Duration,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub telegram_bot_token: Option<String>,
    pub report_chat_id: Option<i64>,
    pub subscribers: Vec<SubscriberEntry>,
    pub operator_handle: Option<String>,
    pub report_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberEntry {
    pub handle: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            prior: 0.263,
            threshold: 1e45,
            model_filename: "filter.json".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
