//! Logging setup for the `ckpt-eval` binary
//!
//! The coordinator logs at `info` to stderr and to a log file in the
//! evaluation output directory. Other ranks only report errors, to stderr.
//! `RUST_LOG` overrides the level in both cases.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter directive for a rank
pub fn default_directive(is_coordinator: bool) -> &'static str {
    if is_coordinator {
        "info"
    } else {
        "error"
    }
}

/// Install the global subscriber
///
/// The returned guard must be held until exit so buffered file output is
/// written.
pub fn init_tracing(is_coordinator: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let directive = default_directive(is_coordinator);
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let (file_layer, guard) = match log_file.filter(|_| is_coordinator) {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path.file_name().unwrap_or(path.as_os_str());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // Ignore a subscriber installed earlier in the same process
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}
