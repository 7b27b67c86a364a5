use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(String),

    #[error("invalid value for env var {name}: {value:?} ({reason})")]
    Invalid { name: String, value: String, reason: String },
}
