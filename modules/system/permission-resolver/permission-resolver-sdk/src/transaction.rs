//! Ambient transaction capability consumed by the change aggregator.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PermissionResolverError;

/// Opaque handle of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    MarkedRollback,
    Preparing,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Unknown,
}

impl TransactionStatus {
    /// Only an active transaction may still accept new work.
    #[must_use]
    pub fn is_modifiable(self) -> bool {
        matches!(self, Self::Active)
    }

    #[must_use]
    pub fn is_committed(self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Listener notified around the completion of one transaction.
#[async_trait]
pub trait TransactionSynchronization: Send + Sync {
    /// Called once before the transaction commits.
    ///
    /// # Errors
    ///
    /// Any error aborts the commit; the transaction rolls back.
    async fn before_completion(&self) -> Result<(), PermissionResolverError>;

    /// Called once after the transaction committed or rolled back.
    async fn after_completion(&self, status: TransactionStatus);
}

/// Access to the ambient transaction.
pub trait TransactionContext: Send + Sync {
    /// The transaction bound to the calling task, if any.
    fn current_transaction(&self) -> Option<TransactionId>;

    /// Status of `tx`. Unknown handles report [`TransactionStatus::Unknown`].
    fn status(&self, tx: TransactionId) -> TransactionStatus;

    /// Register `listener` for the completion callbacks of `tx`.
    ///
    /// # Errors
    ///
    /// - `NoActiveTransaction` if `tx` is not known
    /// - `TransactionNotModifiable` if `tx` is already completing
    fn register_synchronization(
        &self,
        tx: TransactionId,
        listener: Arc<dyn TransactionSynchronization>,
    ) -> Result<(), PermissionResolverError>;
}
