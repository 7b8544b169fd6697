use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

pub const DEFAULT_FILTER: &str = "info,cutlane_core=trace,cutlane_cli=debug";
const DEFAULT_FILE_PREFIX: &str = "cutlane";

/// Keeps the non-blocking log writer flushing until dropped.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    pub log_file: PathBuf,
    _file_guard: WorkerGuard,
}

/// Per-session JSON log file under `log_dir`, plus a compact stdout layer
/// unless `config.stdout` is off. `RUST_LOG` overrides the configured filter;
/// an unparsable configured filter falls back to [`DEFAULT_FILTER`].
pub fn init_tracing(
    log_dir: impl AsRef<Path>,
    config: &DiagnosticsConfig,
) -> anyhow::Result<TelemetryGuard> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let session_id = Uuid::new_v4();
    let file_name = log_file_name(&config.trace_file_prefix, Utc::now());
    let log_file = log_dir.join(&file_name);
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let (env_filter, rejected_filter) = session_filter(&config.rust_log_filter);

    let stdout_layer = config.stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_thread_ids(true)
            .with_target(true)
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_writer);

    if let Err(error) = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
    {
        warn!(?error, "global tracing subscriber already initialized");
    } else {
        info!(%session_id, log_file = %log_file.display(), "tracing initialized");
    }
    if let Some(filter) = rejected_filter {
        warn!(%filter, fallback = DEFAULT_FILTER, "configured log filter rejected");
    }

    Ok(TelemetryGuard {
        session_id,
        log_file,
        _file_guard: file_guard,
    })
}

/// `RUST_LOG` first, then the configured directives. The second value is
/// the configured filter when it failed to parse.
fn session_filter(configured: &str) -> (EnvFilter, Option<String>) {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return (filter, None);
    }
    match EnvFilter::try_new(configured) {
        Ok(filter) => (filter, None),
        Err(_) => (EnvFilter::new(DEFAULT_FILTER), Some(configured.to_string())),
    }
}

fn log_file_name(prefix: &str, started: DateTime<Utc>) -> String {
    let prefix: String = prefix
        .trim()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    let prefix = if prefix.is_empty() {
        DEFAULT_FILE_PREFIX
    } else {
        prefix.as_str()
    };
    format!("{prefix}-{}.log", started.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn log_files_are_named_by_prefix_and_start_time() {
        let started = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).single().expect("timestamp");
        assert_eq!(log_file_name("render-farm", started), "render-farm-20260314-092653.log");
        assert_eq!(log_file_name("  ", started), "cutlane-20260314-092653.log");
        assert_eq!(log_file_name("a/b c", started), "a_b_c-20260314-092653.log");
    }
}
