use std::{env, str::FromStr, time::Duration};

use chrono_tz::Tz;
use url::Url;

use super::env::{
    AppConfig, ClassifierConfig, ConfigError, DirectoryConfig, LoggingConfig, NotifierConfig,
    PipelineConfig, SourceConfig, StreamConfig, SubscriberEntry, ThrottleConfig,
};

const HOUR_SECS: u64 = 60 * 60;

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let stream = StreamConfig {
            url: parse_url("STREAM_URL", "wss://qa.sockets.stackexchange.com/")?,
            channel: string_or("STREAM_CHANNEL", "155-questions-active"),
            target_site: string_or("TARGET_SITE", "stackoverflow"),
            max_retries: parse_or("STREAM_MAX_RETRIES", 10)?,
            backoff_min: Duration::from_millis(parse_or("STREAM_BACKOFF_MIN_MS", 1_000)?),
            backoff_max: Duration::from_millis(parse_or("STREAM_BACKOFF_MAX_MS", 60_000)?),
        };
        if stream.max_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "STREAM_MAX_RETRIES",
                reason: "must be at least 1".to_string(),
            });
        }

        let defaults = ClassifierConfig::default();
        let classifier = ClassifierConfig {
            prior: parse_or("CLASSIFIER_PRIOR", defaults.prior)?,
            threshold: parse_or("CLASSIFIER_THRESHOLD", defaults.threshold)?,
            model_filename: string_or("MODEL_FILENAME", &defaults.model_filename),
        };
        if !(classifier.prior > 0.0 && classifier.prior < 1.0) {
            return Err(ConfigError::Invalid {
                key: "CLASSIFIER_PRIOR",
                reason: format!("{} is outside (0, 1)", classifier.prior),
            });
        }

        let source = SourceConfig {
            api_url: parse_url("SE_API_URL", "https://api.stackexchange.com/2.3")?,
            api_key: optional("SE_API_KEY"),
            filter: string_or("SE_API_FILTER", "withbody"),
            timeout: Duration::from_millis(parse_or("SOURCE_TIMEOUT_MS", 10_000)?),
            item_url_base: string_or("ITEM_URL_BASE", "https://stackoverflow.com/q"),
        };

        let throttle = ThrottleConfig {
            window: hours("REPORT_WINDOW_HOURS", parse_or("REPORT_WINDOW_HOURS", 6u64)?)?,
        };

        let pipeline = PipelineConfig {
            recency_window: hours(
                "RECENCY_WINDOW_HOURS",
                parse_or("RECENCY_WINDOW_HOURS", 24u64)?,
            )?,
            concurrency: parse_or("PIPELINE_CONCURRENCY", 8usize)?.max(1),
        };

        let notifier = NotifierConfig {
            telegram_bot_token: optional("TELEGRAM_BOT_TOKEN"),
            report_chat_id: optional("REPORT_CHAT_ID")
                .map(|value| {
                    value.parse::<i64>().map_err(|err| ConfigError::Invalid {
                        key: "REPORT_CHAT_ID",
                        reason: err.to_string(),
                    })
                })
                .transpose()?,
            subscribers: optional("NOTIFY_SUBSCRIBERS")
                .map(|value| parse_subscribers(&value))
                .unwrap_or_default(),
            operator_handle: optional("OPERATOR_HANDLE"),
            report_prefix: string_or("REPORT_PREFIX", "[ lq-sentinel ]"),
        };

        if notifier.telegram_bot_token.is_some() && notifier.report_chat_id.is_none() {
            return Err(ConfigError::Missing("REPORT_CHAT_ID"));
        }

        let directories = DirectoryConfig {
            logs_dir: string_or("LOGS_DIR", "logs"),
            data_dir: string_or("DATA_DIR", "data"),
        };

        let logging = LoggingConfig {
            level: string_or("LOG_LEVEL", "info"),
        };

        let timezone = parse_timezone(&string_or("BOT_TIMEZONE", "UTC"))?;

        Ok(Self {
            stream,
            classifier,
            source,
            throttle,
            pipeline,
            notifier,
            directories,
            logging,
            timezone,
        })
    }
}

/// Parses `name=tag1,tag2;other` into subscriber entries. A subscriber
/// without tags is interested in everything.
pub fn parse_subscribers(value: &str) -> Vec<SubscriberEntry> {
    value
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let (handle, tags) = match part.split_once('=') {
                Some((handle, tags)) => (handle, tags),
                None => (part, ""),
            };
            let handle = handle.trim().trim_start_matches('@').to_string();
            if handle.is_empty() {
                return None;
            }
            let tags = tags
                .split(',')
                .map(|tag| tag.trim().to_lowercase())
                .filter(|tag| !tag.is_empty())
                .collect();
            Some(SubscriberEntry { handle, tags })
        })
        .collect()
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn string_or(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(value) => value.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn hours(key: &'static str, value: u64) -> Result<Duration, ConfigError> {
    value
        .checked_mul(HOUR_SECS)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Invalid {
            key,
            reason: format!("{value} hours is too large"),
        })
}

fn parse_timezone(raw: &str) -> Result<Tz, ConfigError> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|err| ConfigError::Invalid {
            key: "BOT_TIMEZONE",
            reason: err.to_string(),
        })
}

fn parse_url(key: &'static str, default: &str) -> Result<Url, ConfigError> {
    let raw = string_or(key, default);
    Url::parse(&raw).map_err(|err| ConfigError::Invalid {
        key,
        reason: err.to_string(),
    })
}
