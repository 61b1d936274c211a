use thiserror::Error;

use crate::domain::conversation::ConversationStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid conversation transition from {from:?} to {to:?}")]
    InvalidConversationTransition { from: ConversationStatus, to: ConversationStatus },
    #[error("conversation is resolved and immutable")]
    ConversationResolved,
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Processing-layer taxonomy. Only `Validation` is ever visible to the
/// upstream provider; everything else degrades to a safe default and is
/// recorded for operators.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProcessingError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid payload: {0}")]
    Validation(String),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("language model failure: {0}")]
    Model(String),
    #[error("action `{action}` failed: {cause}")]
    ActionExecution { action: String, cause: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ProcessingError {
    /// Whether this failure may surface as a non-2xx response at the
    /// ingestion boundary.
    pub fn is_provider_visible(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{DomainError, ProcessingError};
    use crate::domain::conversation::ConversationStatus;

    #[test]
    fn only_validation_is_provider_visible() {
        assert!(ProcessingError::Validation("missing ticket".into()).is_provider_visible());
        assert!(!ProcessingError::Transport("connection reset".into()).is_provider_visible());
        assert!(!ProcessingError::Model("timeout".into()).is_provider_visible());
        assert!(!ProcessingError::ActionExecution {
            action: "create_order".into(),
            cause: "commerce 500".into()
        }
        .is_provider_visible());
        assert!(!ProcessingError::NotFound { entity: "conversation", key: "t9".into() }
            .is_provider_visible());
    }

    #[test]
    fn domain_error_converts_into_processing_error() {
        let error = ProcessingError::from(DomainError::InvalidConversationTransition {
            from: ConversationStatus::Resolved,
            to: ConversationStatus::Active,
        });
        assert!(matches!(error, ProcessingError::Domain(_)));
        assert!(!error.is_provider_visible());
    }
}
