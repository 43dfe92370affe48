//! Error kinds for the market-map pipeline
//!
//! Core functions return `anyhow::Result`; these variants mark the failures
//! callers (and tests) need to tell apart via `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MmuError {
    /// Missing or inconsistent rule configuration (quote, provider, normalize target)
    #[error("configuration error: {0}")]
    Config(String),

    /// A market or market map failed structural validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Several markets failed validation; collected rather than fail-fast
    #[error("generated {count} invalid market(s): {}", details.join("; "))]
    InvalidMarkets { count: usize, details: Vec<String> },

    /// Internal contract broken, indicates a bug rather than bad input
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// External collaborator failed (HTTP, store, screening service)
    #[error("external service error: {0}")]
    External(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MmuError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Returns true when `err` (or anything in its chain) is an invariant violation
    pub fn is_invariant_violation(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<MmuError>(),
                Some(MmuError::InvariantViolation(_))
            )
        })
    }

    /// Returns true when `err` (or anything in its chain) is a configuration error
    pub fn is_config(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(cause.downcast_ref::<MmuError>(), Some(MmuError::Config(_)))
        })
    }
}
