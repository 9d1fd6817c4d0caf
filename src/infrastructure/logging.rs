use std::io::{self, IsTerminal};

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{config::AppConfig, infrastructure::directories::ResolvedPaths};

const LOG_FILE_PREFIX: &str = "sentinel.log";

static INIT: OnceCell<()> = OnceCell::new();
static GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Console plus daily-rolling file output. `RUST_LOG` overrides `LOG_LEVEL`.
pub fn init_tracing(config: &AppConfig, paths: &ResolvedPaths) -> Result<()> {
    INIT.get_or_try_init::<_, anyhow::Error>(|| {
        let (env_filter, rejected_level) = match EnvFilter::try_from_default_env() {
            Ok(filter) => (filter, None),
            Err(_) => level_filter(&config.logging.level),
        };

        let (file_writer, guard) = tracing_appender::non_blocking(
            tracing_appender::rolling::daily(&paths.logs_dir, LOG_FILE_PREFIX),
        );
        let _ = GUARD.set(guard);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(io::stdout)
                    .with_target(true)
                    .with_ansi(io::stdout().is_terminal()),
            )
            .with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_ansi(false),
            )
            .try_init()?;

        if let Some(reason) = rejected_level {
            tracing::warn!(
                target: "lifecycle",
                level = %config.logging.level,
                %reason,
                "LOG_LEVEL not understood; logging at info"
            );
        }
        tracing::info!(
            target: "lifecycle",
            version = env!("CARGO_PKG_VERSION"),
            site = %config.stream.target_site,
            channel = %config.stream.channel,
            log_file = %paths.logs_dir.join(LOG_FILE_PREFIX).display(),
            "tracing initialized"
        );
        Ok(())
    })?;
    Ok(())
}

/// Filter for `LOG_LEVEL`, falling back to `info` with the parse error.
fn level_filter(level: &str) -> (EnvFilter, Option<String>) {
    match EnvFilter::try_new(level) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new("info"), Some(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_accepts_directives_and_falls_back_to_info() {
        let (_, rejected) = level_filter("warn,stream=debug");
        assert!(rejected.is_none());

        let (_, rejected) = level_filter("stream=loud");
        assert!(rejected.is_some_and(|reason| !reason.is_empty()));
    }
}
