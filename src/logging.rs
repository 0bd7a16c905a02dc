//! Logging - tracing subscriber on stderr (stdout carries command output).

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_JSON: &str = "WALLETFLOW_LOG_JSON";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

impl LogFormat {
    /// `1`, `true` or `json` select JSON; anything else is pretty.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("1" | "true" | "json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var(ENV_LOG_JSON).ok().as_deref())
    }
}

/// Install the global subscriber with the format from `WALLETFLOW_LOG_JSON`.
pub fn init_logging() {
    init_logging_with(LogFormat::from_env());
}

/// `RUST_LOG` filters, default `info`. A second call is a no-op.
pub fn init_logging_with(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::Subscriber::builder().with_env_filter(env_filter).with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_selection() {
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some(" 1 ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("0")), LogFormat::Pretty);
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging_with(LogFormat::Json);
        init_logging_with(LogFormat::Pretty);
    }
}
