//! Tracing subscriber setup.
//!
//! Console output goes to stderr so command output on stdout stays
//! machine-readable. The filter comes from `WAVEFRONT_LOG` (standard
//! `EnvFilter` syntax); without it the level is `info`, or `debug` with
//! `--verbose`. A daily-rolling JSON file under `.wavefront/logs/` is added
//! when a log directory is given.

use anyhow::{Result, anyhow};
use std::io;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "WAVEFRONT_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    pub format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy()
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(options.verbose);

    let (text_layer, json_layer) = match options.format {
        LogFormat::Text => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(false)
                    .compact(),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_target(true),
            ),
        ),
    };

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = rolling::daily(dir, "wavefront.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_filter(env_filter(options.verbose));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(text_layer.with_filter(filter))
        .with(json_layer.with_filter(env_filter(options.verbose)))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = LogOptions::default();
        assert_eq!(options.format, LogFormat::Text);
        assert!(!options.verbose);
        assert!(options.log_dir.is_none());
    }

    #[test]
    fn test_verbose_raises_default_level() {
        // Only meaningful when the env var is unset in the test environment
        if std::env::var(LOG_ENV).is_err() {
            assert_eq!(env_filter(false).max_level_hint(), Some(LevelFilter::INFO));
            assert_eq!(env_filter(true).max_level_hint(), Some(LevelFilter::DEBUG));
        }
    }

    #[test]
    fn test_log_format_parses_from_cli_value() {
        use clap::ValueEnum;
        assert_eq!(LogFormat::from_str("json", true).unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("text", true).unwrap(), LogFormat::Text);
    }
}
