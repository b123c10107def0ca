//! Error types for rate limit policy loading.

use thiserror::Error;

/// Errors raised while loading a rate limit policy.
///
/// Every variant is a load-time failure. Request-time evaluation never
/// produces a `PolicyError`; missing request attributes surface as `None`.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Configuration parse errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rule asked for a stage beyond the supported range
    #[error("rate limit rule {rule}: stage {stage} exceeds maximum stage number {max}")]
    StageOutOfRange { rule: usize, stage: u64, max: u64 },

    /// An action used a kind this engine does not know
    #[error("rate limit rule {rule}, action {action}: unsupported action kind '{kind}'")]
    UnsupportedAction {
        rule: usize,
        action: usize,
        kind: String,
    },

    /// A limit block used an override kind this engine does not know
    #[error("rate limit rule {rule}: unsupported limit override kind '{kind}'")]
    UnsupportedOverride { rule: usize, kind: String },

    /// A field was present but structurally invalid
    #[error("rate limit rule {rule}, field '{field}': {reason}")]
    InvalidField {
        rule: usize,
        field: String,
        reason: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PolicyError {
    pub(crate) fn invalid(rule: usize, field: impl Into<String>, reason: impl Into<String>) -> Self {
        PolicyError::InvalidField {
            rule,
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
