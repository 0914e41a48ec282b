//! In-process transaction manager.
//!
//! The current transaction is bound to the running task with a tokio
//! task-local, so every call made from inside [`LocalTransactionManager::transaction`]
//! sees it, including calls through other components.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use permission_resolver_sdk::{
    PermissionResolverError, TransactionContext, TransactionId, TransactionStatus,
    TransactionSynchronization,
};
use tracing::{debug, warn};

tokio::task_local! {
    static CURRENT_TX: TransactionId;
}

/// Future returned by a transaction body.
pub type BoxTxFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

struct TxEntry {
    status: TransactionStatus,
    listeners: Vec<Arc<dyn TransactionSynchronization>>,
}

/// Runs units of work as transactions and drives their synchronization
/// listeners.
///
/// A nested [`transaction`](Self::transaction) call starts an independent
/// transaction that shadows the outer one until it completes.
#[derive(Default)]
pub struct LocalTransactionManager {
    transactions: DashMap<TransactionId, TxEntry>,
}

impl LocalTransactionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `body` inside a new transaction.
    ///
    /// On success every registered listener's `before_completion` runs in
    /// registration order; the first failure rolls the transaction back. A body
    /// error or a rollback-only mark rolls back without `before_completion`.
    /// `after_completion` always runs for all listeners with the final status.
    ///
    /// # Errors
    ///
    /// The body's error, the first listener failure, or a rollback-only mark.
    ///
    /// ```ignore
    /// manager
    ///     .transaction(|_tx| {
    ///         Box::pin(async move {
    ///             changes.builder(&target)?.inherit_from_parent_change(true)?;
    ///             Ok(())
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<'a, T, F>(&self, body: F) -> anyhow::Result<T>
    where
        F: FnOnce(TransactionId) -> BoxTxFuture<'a, T>,
    {
        let tx = TransactionId::new_v4();
        self.transactions.insert(
            tx,
            TxEntry {
                status: TransactionStatus::Active,
                listeners: Vec::new(),
            },
        );
        debug!(%tx, "Transaction started");

        CURRENT_TX
            .scope(tx, async move {
                let outcome = body(tx).await;
                self.complete(tx, outcome).await
            })
            .await
    }

    /// Mark the current transaction so that it rolls back when the body returns.
    ///
    /// # Errors
    ///
    /// `NoActiveTransaction` outside of a transaction.
    pub fn set_rollback_only(&self) -> Result<(), PermissionResolverError> {
        let tx = self
            .current_transaction()
            .ok_or(PermissionResolverError::NoActiveTransaction)?;
        let mut entry = self
            .transactions
            .get_mut(&tx)
            .ok_or(PermissionResolverError::NoActiveTransaction)?;
        entry.status = TransactionStatus::MarkedRollback;
        Ok(())
    }

    /// Number of transactions that have not completed yet.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.transactions.len()
    }

    fn set_status(&self, tx: TransactionId, status: TransactionStatus) {
        if let Some(mut entry) = self.transactions.get_mut(&tx) {
            entry.status = status;
        }
    }

    fn listeners(&self, tx: TransactionId) -> Vec<Arc<dyn TransactionSynchronization>> {
        self.transactions
            .get(&tx)
            .map(|entry| entry.listeners.clone())
            .unwrap_or_default()
    }

    async fn complete<T>(
        &self,
        tx: TransactionId,
        outcome: anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let result = match outcome {
            Ok(_) if self.status(tx) == TransactionStatus::MarkedRollback => {
                debug!(%tx, "Transaction marked rollback-only");
                Err(anyhow::anyhow!("transaction {tx} was marked rollback-only"))
            }
            Ok(value) => match self.before_completion(tx).await {
                Ok(()) => Ok(value),
                Err(e) => {
                    warn!(%tx, error = %e, "Synchronization listener failed, rolling back");
                    Err(anyhow::Error::new(e).context(format!("transaction {tx} did not commit")))
                }
            },
            Err(e) => {
                debug!(%tx, error = %e, "Transaction body failed");
                Err(e)
            }
        };

        let status = if result.is_ok() {
            TransactionStatus::Committed
        } else {
            self.set_status(tx, TransactionStatus::RollingBack);
            TransactionStatus::RolledBack
        };

        let listeners = self
            .transactions
            .remove(&tx)
            .map(|(_, entry)| entry.listeners)
            .unwrap_or_default();
        for listener in listeners {
            listener.after_completion(status).await;
        }

        debug!(%tx, ?status, "Transaction completed");
        result
    }

    async fn before_completion(&self, tx: TransactionId) -> Result<(), PermissionResolverError> {
        self.set_status(tx, TransactionStatus::Preparing);
        // registration is closed from here on, the snapshot is complete
        for listener in self.listeners(tx) {
            listener.before_completion().await?;
        }
        self.set_status(tx, TransactionStatus::Committing);
        Ok(())
    }
}

impl TransactionContext for LocalTransactionManager {
    fn current_transaction(&self) -> Option<TransactionId> {
        CURRENT_TX.try_with(|tx| *tx).ok()
    }

    fn status(&self, tx: TransactionId) -> TransactionStatus {
        self.transactions
            .get(&tx)
            .map_or(TransactionStatus::Unknown, |entry| entry.status)
    }

    fn register_synchronization(
        &self,
        tx: TransactionId,
        listener: Arc<dyn TransactionSynchronization>,
    ) -> Result<(), PermissionResolverError> {
        let mut entry = self
            .transactions
            .get_mut(&tx)
            .ok_or(PermissionResolverError::NoActiveTransaction)?;
        if !entry.status.is_modifiable() {
            return Err(PermissionResolverError::TransactionNotModifiable {
                status: entry.status,
            });
        }
        entry.listeners.push(listener);
        Ok(())
    }
}
