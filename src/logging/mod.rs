//! Logging init (ambient stack, spec SPEC_FULL §1): `tracing` +
//! `tracing-subscriber` with an `EnvFilter`, following the teacher's
//! precedence (`RUST_LOG` overrides the configured level). Log files are
//! rotated daily via `tracing-appender`, mirroring a long-running service
//! process rather than the teacher's TUI-buffered mode (RTDS has no TUI).

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber. `level` is the configured
/// `LOG_LEVEL` default filter; `RUST_LOG`, if set, takes precedence.
/// `log_dir`, when given, also writes rotated files there; `None` logs to
/// stdout only (used by the forwarder/consumer binaries, which are expected
/// to run under a process supervisor that captures stdout).
///
/// Returns a `WorkerGuard` that must be kept alive for the process lifetime
/// — dropping it flushes and detaches the non-blocking file writer.
pub fn init(binary_name: &str, level: &str, log_dir: Option<&std::path::Path>) -> Option<WorkerGuard> {
    let default_filter = format!("{binary_name}={level},rtds={level}");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    match log_dir {
        Some(dir) => {
            let _ = std::fs::create_dir_all(dir);
            let file_appender = tracing_appender::rolling::daily(dir, binary_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();

            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    }
}
