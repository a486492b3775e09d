use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::driver::HdpAlignerError;

fn level_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy()
}

/// Install the global subscriber, logging to STDERR and, if given, to `log_file`.
///
/// The returned guard must be held until the program exits so buffered file records are
/// flushed.
pub fn configure_log(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, HdpAlignerError> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let handle = fs::File::create(path)?;
            let (writer, guard) = tracing_appender::non_blocking(handle);
            let layer = fmt::layer()
                .compact()
                .with_ansi(false)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(writer)
                .with_filter(level_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(io::stderr)
                .with_filter(level_filter()),
        )
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| HdpAlignerError::LoggingError(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| HdpAlignerError::LoggingError(e.to_string()))?;
    Ok(guard)
}
