//! ============================================================================
//! Transfer Errors - Validation, Pre-flight, On-chain and Transient failures
//! ============================================================================

use alloy_primitives::{Address, U256};

/// Every way a transfer attempt can stop before (or while) reaching the vault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    // Validation
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Intent not found: {0}")]
    IntentNotFound(String),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("Intent already executed: {0}")]
    DuplicateExecution(String),

    /// Failed, scheduled or recurring intents never go through single execution
    #[error("Intent {id} cannot be executed: {reason}")]
    IntentNotExecutable { id: String, reason: String },

    // Pre-flight
    #[error("Insufficient vault balance: need {needed} wei, have {available} wei")]
    InsufficientBalance { needed: U256, available: U256 },

    #[error("Signed request expired: deadline {deadline}, now {now}")]
    DeadlineExpired { deadline: U256, now: i64 },

    #[error("Recovered signer {recovered} does not match expected signer {expected}")]
    SignerMismatch { expected: Address, recovered: Address },

    #[error("Agent {0} is not verified in the identity registry")]
    AgentNotVerified(u64),

    // Submission rejected by the node or the contract before inclusion
    #[error("Transfer submission rejected: {0}")]
    Submission(String),

    // Network / node unavailable
    #[error("Network error: {0}")]
    Transient(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl TransferError {
    /// Only infrastructure failures are worth retrying with the same signature.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Transient(_))
    }

    pub fn storage(err: anyhow::Error) -> Self {
        TransferError::Storage(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_are_transient() {
        assert!(TransferError::Transient("connection reset".into()).is_transient());
        assert!(!TransferError::Submission("execution reverted".into()).is_transient());
        assert!(!TransferError::DuplicateExecution("i-1".into()).is_transient());
        assert!(!TransferError::InsufficientBalance {
            needed: U256::from(2),
            available: U256::from(1),
        }
        .is_transient());
    }

    #[test]
    fn test_storage_error_keeps_context() {
        let err = anyhow::anyhow!("disk full").context("Failed to commit");
        let mapped = TransferError::storage(err);
        assert_eq!(
            mapped,
            TransferError::Storage("Failed to commit: disk full".into())
        );
    }

    #[test]
    fn test_insufficient_balance_message() {
        let err = TransferError::InsufficientBalance {
            needed: U256::from(100),
            available: U256::from(50),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient vault balance: need 100 wei, have 50 wei"
        );
    }
}
