//! Tracing subscriber setup

use crate::error::CorralResult;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "corral=info,warn";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl LogFormat {
    /// Reads `CORRAL_LOG_FORMAT` (`json` or `plain`, default plain).
    pub fn from_env() -> Self {
        match std::env::var("CORRAL_LOG_FORMAT") {
            Ok(s) if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Plain,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Idempotent: if a global subscriber is already installed it is kept and
/// this returns `Ok(())`.
pub fn init_tracing(format: LogFormat) -> CorralResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if let Err(e) = result {
        tracing::debug!(
            format = ?format,
            error = %e,
            "Tracing subscriber already installed"
        );
        return Ok(());
    }

    tracing::info!(format = ?format, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_a_no_op() {
        assert!(init_tracing(LogFormat::Plain).is_ok());
        assert!(init_tracing(LogFormat::Json).is_ok());
    }

    #[test]
    fn test_log_format_default_is_plain() {
        assert_eq!(LogFormat::default(), LogFormat::Plain);
    }
}
