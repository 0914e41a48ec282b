//! Error types for the permission resolver module.

use thiserror::Error;

use crate::models::TargetRef;
use crate::transaction::TransactionStatus;

/// Errors that can occur when using the permission resolver API.
///
/// A resolution miss is not an error: unknown ids resolve to `None` or are
/// simply absent from batch results.
#[derive(Debug, Error)]
pub enum PermissionResolverError {
    /// A change builder was requested outside of any transaction.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// The current transaction can no longer accept permission changes.
    #[error("transaction is not modifiable (status: {status:?})")]
    TransactionNotModifiable { status: TransactionStatus },

    /// The permission changes of this transaction were already flushed.
    #[error("permission changes already flushed for this transaction")]
    AlreadyFlushed,

    /// A builder was mutated after its changes were handed to the writer.
    #[error("change builder for '{target}' is frozen")]
    BuilderFrozen { target: TargetRef },

    /// The row source failed to fetch closure or assignment rows.
    #[error("data access failed: {0}")]
    DataAccess(String),

    /// The change writer rejected or failed to apply a change set.
    #[error("failed to apply permission changes for '{target}': {reason}")]
    WriteFailed { target: TargetRef, reason: String },

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PermissionResolverError {
    /// Whether the error reports a violated transaction protocol
    /// (as opposed to an infrastructure failure).
    #[must_use]
    pub fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            Self::NoActiveTransaction
                | Self::TransactionNotModifiable { .. }
                | Self::AlreadyFlushed
                | Self::BuilderFrozen { .. }
        )
    }
}
