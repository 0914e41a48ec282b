//! Domain errors for the permission resolver.

use permission_resolver_sdk::{PermissionResolverError, TransactionStatus};

/// Internal domain errors.
#[derive(thiserror::Error, Debug)]
pub enum DomainError {
    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("transaction is not modifiable (status: {status:?})")]
    TransactionNotModifiable { status: TransactionStatus },

    #[error("aggregator for transaction {tx} is already {stage}")]
    AlreadyFlushed { tx: String, stage: &'static str },

    /// Error raised by a collaborator (row source, writer, transaction context).
    /// Converted back unchanged at the SDK boundary.
    #[error(transparent)]
    Collaborator(#[from] PermissionResolverError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<DomainError> for PermissionResolverError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::NoActiveTransaction => Self::NoActiveTransaction,
            DomainError::TransactionNotModifiable { status } => {
                Self::TransactionNotModifiable { status }
            }
            DomainError::AlreadyFlushed { .. } => Self::AlreadyFlushed,
            DomainError::Collaborator(inner) => inner,
            DomainError::Internal(reason) => Self::Internal(reason),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use permission_resolver_sdk::TargetRef;

    #[test]
    fn collaborator_error_round_trips_unchanged() {
        let original = PermissionResolverError::WriteFailed {
            target: TargetRef::new("emf:o1"),
            reason: "constraint violation".to_owned(),
        };
        let back: PermissionResolverError = DomainError::from(original).into();

        match back {
            PermissionResolverError::WriteFailed { target, reason } => {
                assert_eq!(target.id(), "emf:o1");
                assert_eq!(reason, "constraint violation");
            }
            other => panic!("Expected WriteFailed, got: {other:?}"),
        }
    }

    #[test]
    fn protocol_violations_map_to_illegal_state() {
        let flushed: PermissionResolverError = DomainError::AlreadyFlushed {
            tx: "tx".to_owned(),
            stage: "flushed",
        }
        .into();
        assert!(flushed.is_illegal_state());

        let no_tx: PermissionResolverError = DomainError::NoActiveTransaction.into();
        assert!(no_tx.is_illegal_state());
    }
}
