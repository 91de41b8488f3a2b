//! Tracing subscriber setup shared by the codepod binaries.
//!
//! Everything is driven by environment variables so the same binary can log
//! human-readable output on a developer machine and JSON lines in production:
//!
//! - `LOG_LEVEL`: default filter when `RUST_LOG` is unset (default `info`)
//! - `LOG_OUTPUT`: `console` or `file` (default `console`)
//! - `LOG_FORMAT`: `human` or `json` (default `human`)
//! - `LOG_FILE_PATH`: daily-rolled log file (default `/tmp/codepod.log`)

use std::{env, path::Path};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, registry, EnvFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
    pub file_path: String,
}

impl LogSettings {
    pub fn from_env() -> Self {
        let output = match env::var("LOG_OUTPUT").as_deref() {
            Ok("file") => LogOutput::File,
            _ => LogOutput::Console,
        };
        let format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };

        Self {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            output,
            format,
            file_path: env::var("LOG_FILE_PATH")
                .unwrap_or_else(|_| "/tmp/codepod.log".to_string()),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        // Engine and HTTP client internals are too chatty below warn.
        for directive in ["hyper=warn", "bollard=warn", "sqlx=warn"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }
}

/// Initializes the global tracing subscriber from the environment.
///
/// The returned guard must be held for the lifetime of the process when
/// logging to a file, otherwise buffered lines are dropped on exit.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(&LogSettings::from_env())
}

pub fn init_with(settings: &LogSettings) -> Option<WorkerGuard> {
    let subscriber = registry().with(settings.env_filter());

    match settings.output {
        LogOutput::Console => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
            match settings.format {
                LogFormat::Json => subscriber.with(fmt_layer.json()).init(),
                LogFormat::Human => subscriber.with(fmt_layer.pretty()).init(),
            }
            None
        }
        LogOutput::File => {
            let log_path = Path::new(&settings.file_path);
            let log_dir = log_path.parent().unwrap_or_else(|| Path::new("/tmp"));
            let log_filename = log_path.file_name().unwrap_or("codepod.log".as_ref());

            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            match settings.format {
                LogFormat::Json => subscriber.with(fmt_layer.json()).init(),
                LogFormat::Human => subscriber.with(fmt_layer).init(),
            }
            Some(guard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_quiets_engine_internals() {
        let settings = LogSettings {
            level: "debug".to_string(),
            output: LogOutput::Console,
            format: LogFormat::Human,
            file_path: "/tmp/codepod.log".to_string(),
        };

        let filter = settings.env_filter().to_string();
        assert!(filter.contains("bollard=warn"));
        assert!(filter.contains("hyper=warn"));
    }
}
