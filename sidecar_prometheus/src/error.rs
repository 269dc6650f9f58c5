use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::warn;

/// The scraped text did not conform to the exposition format.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("line {line}: invalid sample `{content}`")]
    InvalidSample { line: usize, content: String },
    #[error("line {line}: `{name}` is missing its `{label}` label")]
    MissingLabel {
        line: usize,
        name: String,
        label: &'static str,
    },
}

/// Whether to log the full cause chain of scrape errors.
/// Use the `DEBUG` env var or `--debug` flag to enable.
static ERROR_LOGGER: AtomicBool = AtomicBool::new(false);

pub fn debug_error_enabled(enabled: bool) {
    ERROR_LOGGER.store(enabled, Ordering::Relaxed);
}

pub fn debug_error(err: &(dyn std::error::Error + 'static)) {
    if ERROR_LOGGER.load(Ordering::Relaxed) {
        warn!("{}", err);
        let mut source = err.source();
        while let Some(cause) = source {
            warn!("caused by: {}", cause);
            source = cause.source();
        }
    }
}
