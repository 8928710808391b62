//! Error taxonomy for the core domain.
//!
//! Three-way split: precondition failures are terminal for an invocation,
//! infrastructure failures are retryable by the task runtime, and
//! best-effort live delivery failures are swallowed at the broadcast
//! boundary (see `carelink-realtime`).

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("{resource} {id} is in state {state}, expected {expected}")]
    InvalidState {
        resource: &'static str,
        id: String,
        state: String,
        expected: String,
    },

    #[error("store operation failed: {0}")]
    Store(String),

    #[error("{service} collaborator failed: {reason}")]
    Collaborator {
        service: &'static str,
        reason: String,
    },

    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Shorthand for a typed not-found error.
    pub fn not_found(resource: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Shorthand for a collaborator failure.
    pub fn collaborator(service: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            service,
            reason: reason.to_string(),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
