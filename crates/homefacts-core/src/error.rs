use thiserror::Error;

use crate::source::SourceId;

/// Validation errors raised while building queries and domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("query must include an address or a postcode")]
    EmptyQuery,

    #[error("postcode cannot be empty")]
    EmptyPostcode,
    #[error("postcode length {len} must be between {min} and {max} characters")]
    PostcodeLength { len: usize, min: usize, max: usize },
    #[error("postcode contains invalid character '{ch}' at index {index}")]
    PostcodeInvalidChar { ch: char, index: usize },
    #[error("postcode outward code is malformed: '{value}'")]
    PostcodeInvalidOutward { value: String },
    #[error("postcode inward code must be digit-letter-letter: '{value}'")]
    PostcodeInvalidInward { value: String },

    #[error("invalid source '{value}'")]
    InvalidSource { value: String },
    #[error("invalid strategy '{value}', expected one of priority, all")]
    InvalidStrategy { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
}

/// Startup configuration errors. These fail fast and are never produced per query.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("source '{source_id}' requires a credential; set {env_var}")]
    MissingCredential {
        source_id: SourceId,
        env_var: &'static str,
    },

    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("source '{source_id}' is configured more than once")]
    DuplicateSource { source_id: SourceId },

    #[error("no sources are enabled")]
    NoSources,

    #[error("failed to read config file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
