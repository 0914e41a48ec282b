//! Transaction-scoped registry of change aggregators.

use std::sync::Arc;

use dashmap::DashMap;
use permission_resolver_sdk::{
    ChangeBuilder, PermissionChangeWriter, TargetRef, TransactionContext, TransactionId,
};
use tracing::debug;

use super::aggregator::{AggregatorState, ChangeAggregator};
use super::error::DomainError;

pub(crate) type AggregatorTable = DashMap<TransactionId, Arc<ChangeAggregator>>;

/// Hands out change builders bound to the caller's current transaction.
///
/// Each transaction gets its own [`ChangeAggregator`]; the entry is removed
/// when that transaction completes.
pub struct TransactionalPermissionChanges {
    context: Arc<dyn TransactionContext>,
    writer: Arc<dyn PermissionChangeWriter>,
    aggregators: Arc<AggregatorTable>,
}

impl TransactionalPermissionChanges {
    #[must_use]
    pub fn new(
        context: Arc<dyn TransactionContext>,
        writer: Arc<dyn PermissionChangeWriter>,
    ) -> Self {
        Self {
            context,
            writer,
            aggregators: Arc::new(DashMap::new()),
        }
    }

    /// The builder for `target` in the current transaction.
    ///
    /// # Errors
    ///
    /// `NoActiveTransaction` outside of a transaction, otherwise whatever the
    /// transaction's aggregator reports.
    pub fn builder(&self, target: &TargetRef) -> Result<Arc<ChangeBuilder>, DomainError> {
        let tx = self
            .context
            .current_transaction()
            .ok_or(DomainError::NoActiveTransaction)?;

        let aggregator = self.aggregator_for(tx);
        let result = aggregator.builder(target);
        if result.is_err() {
            // never registered, so nothing would ever remove it
            self.aggregators
                .remove_if(&tx, |_, a| a.state() == AggregatorState::Unregistered);
        }
        result
    }

    /// Number of transactions with a live aggregator.
    #[must_use]
    pub fn pending_transactions(&self) -> usize {
        self.aggregators.len()
    }

    fn aggregator_for(&self, tx: TransactionId) -> Arc<ChangeAggregator> {
        let entry = self.aggregators.entry(tx).or_insert_with(|| {
            debug!(%tx, "Creating permission change aggregator");
            ChangeAggregator::with_registry(
                tx,
                Arc::clone(&self.context),
                Arc::clone(&self.writer),
                Arc::downgrade(&self.aggregators),
            )
        });
        Arc::clone(entry.value())
    }
}
