//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Tracing subscriber bootstrap for the monitor binaries."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "CW_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// File and stdout writer guards of the installed daemon subscriber.
static WRITER_GUARDS: OnceCell<(WorkerGuard, WorkerGuard)> = OnceCell::new();

/// Stdout format for the daemon; the rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// First non-blank of `CW_LOG` and `RUST_LOG`, else `info`.
fn pick_directive(monitor: Option<String>, rust: Option<String>) -> String {
    [monitor, rust]
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_owned())
}

fn env_filter() -> EnvFilter {
    let directive = pick_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    );
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("ignoring log directive '{directive}' ({err}); using {DEFAULT_DIRECTIVE}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    })
}

fn log_file_name(service_name: &str, config: &LoggingConfig) -> String {
    format!(
        "{}.log",
        config.file_prefix.as_deref().unwrap_or(service_name)
    )
}

fn stdout_layer<S>(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer);
    match format {
        LogFormat::StructuredJson => layer.with_target(false).json().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

fn file_layer<S>(writer: NonBlocking) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .json()
        .with_writer(writer)
}

/// Install the daemon subscriber: stdout in `config.format` plus a daily rolling
/// JSON file `<prefix>.log` under `config.directory`.
///
/// Filtering follows `CW_LOG`, then `RUST_LOG`, then `info`. When a subscriber is
/// already installed the call only prepares the log directory.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let directory = config.directory.as_path();
    std::fs::create_dir_all(directory)
        .with_context(|| format!("unable to create log directory {}", directory.display()))?;

    let appender = rolling::daily(directory, log_file_name(service_name, config));
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer(config.format, stdout_writer))
        .with(file_layer(file_writer))
        .try_init()
        .is_ok();
    if installed {
        let _ = WRITER_GUARDS.set((file_guard, stdout_guard));
        info!(
            service = service_name,
            log_dir = %directory.display(),
            format = ?config.format,
            "tracing initialised"
        );
    }
    Ok(())
}

/// Stderr-only subscriber for one-shot commands and tests. Repeat calls are no-ops.
pub fn init_console() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_prefers_monitor_variable_then_rust_log() {
        let some = |value: &str| Some(value.to_owned());
        assert_eq!(pick_directive(some("cw_core=debug"), some("warn")), "cw_core=debug");
        assert_eq!(pick_directive(some("  "), some("warn")), "warn");
        assert_eq!(pick_directive(None, None), DEFAULT_DIRECTIVE);
    }

    #[test]
    fn file_name_falls_back_to_service_name() {
        let mut config = LoggingConfig::default();
        assert_eq!(log_file_name("cwatchd", &config), "cwatchd.log");
        config.file_prefix = Some("station-7".into());
        assert_eq!(log_file_name("cwatchd", &config), "station-7.log");
    }

    #[test]
    fn init_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            format: LogFormat::StructuredJson,
            file_prefix: Some("cw-test".into()),
        };
        init_tracing("cw-test", &config).unwrap();
        assert!(config.directory.is_dir());
        init_console();
    }
}
