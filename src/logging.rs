use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "kiosk=info,sqlx=warn";
const LOG_FILE_PREFIX: &str = "kiosk.log";

fn env_filter() -> EnvFilter {
    std::env::var("KIOSK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn json_requested() -> bool {
    std::env::var("KIOSK_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Install the global subscriber: stderr output, plus a daily-rolling file
/// under `log_dir` when one is given.
///
/// Safe to call more than once; later calls are no-ops. Keep the returned
/// guard alive for the life of the process or buffered file lines are lost.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let json = json_requested();

    let stderr_layer = if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match log_dir.map(|dir| (dir, std::fs::create_dir_all(dir))) {
        Some((dir, Ok(()))) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        Some((dir, Err(err))) => {
            eprintln!("kiosk: cannot create log directory {}: {err}", dir.display());
            (None, None)
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(target: "kiosk", event = "logging_ready", json, file_sink = guard.is_some());
        guard
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_into_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = tmp.path().join("logs");
        let _guard = init_logging(Some(&logs));
        assert!(logs.is_dir());
    }
}
