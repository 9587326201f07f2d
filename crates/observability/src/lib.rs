//! Tracing/logging setup shared by every FundHub binary.

/// Initialize process-wide logging with the format chosen by
/// `FUNDHUB_LOG_FORMAT` (`json` by default, `pretty` for local runs).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Subscriber construction (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;
