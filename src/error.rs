//! Error types for the transfer orchestration core

use crate::channel::MessageType;
use crate::selector::SelectionField;
use crate::transfer::TransactionStatus;

use thiserror::Error;

/// Main error type for the orchestration core
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid {field}: {message}")]
    Validation {
        field: SelectionField,
        message: String,
    },

    #[error("No route available: {0}")]
    RouteComposition(String),

    #[error("{message_type} failed: {message}")]
    Remote {
        message_type: MessageType,
        message: String,
    },

    #[error("Rejected status patch for {id}: {from} -> {to}")]
    StateInconsistency {
        id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Message channel closed")]
    ChannelClosed,

    #[error("Transfer {id} not found")]
    NotFound { id: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Build a validation error tagged with the offending field
    pub fn validation(field: SelectionField, message: impl Into<String>) -> Self {
        TransferError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Check if the failed request could succeed when sent again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Timeout { .. } | TransferError::ChannelClosed
        )
    }

    /// Inconsistencies are logged and swallowed; everything else reaches the caller
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, TransferError::StateInconsistency { .. })
    }

    /// Field a validation error is attached to
    pub fn field(&self) -> Option<SelectionField> {
        match self {
            TransferError::Validation { field, .. } => Some(*field),
            _ => None,
        }
    }
}

/// Result type for orchestration operations
pub type TransferResult<T> = Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_carries_field() {
        let err = TransferError::validation(SelectionField::Amount, "exceeds balance");
        assert_eq!(err.field(), Some(SelectionField::Amount));
        assert_eq!(err.to_string(), "Invalid amount: exceeds balance");
        assert!(err.is_user_visible());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_remote_error_preserves_message() {
        let err = TransferError::Remote {
            message_type: MessageType::InitiateBridgeTransfer,
            message: "insufficient liquidity".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "INITIATE_BRIDGE_TRANSFER failed: insufficient liquidity"
        );
    }

    #[test]
    fn test_inconsistency_is_not_user_visible() {
        let err = TransferError::StateInconsistency {
            id: "b-1".to_string(),
            from: TransactionStatus::Confirmed,
            to: TransactionStatus::Pending,
        };
        assert!(!err.is_user_visible());
        assert!(TransferError::ChannelClosed.is_retryable());
    }
}
