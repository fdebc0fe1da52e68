use std::io;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::paths;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";

/// Where log records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// `<data dir>/logs/<name>`, keeping the terminal free for the UI.
    File(&'static str),
}

pub struct LoggingHandle {
    pub log_path: Option<PathBuf>,
    pub guard: WorkerGuard,
}

pub fn init_logging(target: LogTarget) -> anyhow::Result<LoggingHandle> {
    let filter = std::env::var("TASKDECK_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let (writer, guard, log_path) = match target {
        LogTarget::Stderr => {
            let (writer, guard) = tracing_appender::non_blocking(io::stderr());
            (writer, guard, None)
        }
        LogTarget::File(name) => {
            let log_dir = paths::log_dir();
            std::fs::create_dir_all(&log_dir)?;
            let appender = tracing_appender::rolling::never(&log_dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (writer, guard, Some(log_dir.join(name)))
        }
    };

    let format = std::env::var("TASKDECK_LOG_FORMAT").unwrap_or_else(|_| match target {
        LogTarget::Stderr => "pretty".into(),
        LogTarget::File(_) => "json".into(),
    });

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("pretty") {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(target == LogTarget::Stderr)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .init();
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = ?log_path,
        format = %format,
        filter = %std::env::var("TASKDECK_LOG_FILTER")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    );

    Ok(LoggingHandle { log_path, guard })
}
