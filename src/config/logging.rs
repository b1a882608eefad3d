use serde::Deserialize;
use tracing_subscriber::{EnvFilter, filter::ParseError};

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// Emit one JSON object per event instead of plain lines.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    /// `RUST_LOG` when set, the configured level otherwise.
    pub fn env_filter(&self) -> Result<EnvFilter, ParseError> {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&self.level))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LoggingConfig::default_level(),
            json: false,
        }
    }
}
