//! Per-transaction permission change aggregator.
//!
//! One aggregator observes one transaction. It registers itself as a
//! synchronization listener when the first builder is requested, applies every
//! non-empty builder exactly once before completion (in the order the builders
//! were first requested) and refuses further work afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use permission_resolver_sdk::{
    ChangeBuilder, PermissionChangeWriter, PermissionResolverError, TargetRef, TransactionContext,
    TransactionId, TransactionStatus, TransactionSynchronization,
};
use tracing::{debug, info, warn};

use super::changes::AggregatorTable;
use super::error::DomainError;

/// Lifecycle of a [`ChangeAggregator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// No builder requested yet, not registered with the transaction.
    Unregistered,
    /// Registered for completion callbacks, accepting builders.
    Registered,
    /// Applying the accumulated changes.
    Flushing,
    /// Terminal. No further builders or flushes.
    Flushed,
}

impl AggregatorState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Flushing => "flushing",
            Self::Flushed => "flushed",
        }
    }
}

struct AggregatorInner {
    state: AggregatorState,
    builders: Vec<Arc<ChangeBuilder>>,
    by_target: HashMap<TargetRef, usize>,
    // leading builders already handed to the writer
    written: usize,
}

pub struct ChangeAggregator {
    tx: TransactionId,
    context: Arc<dyn TransactionContext>,
    writer: Arc<dyn PermissionChangeWriter>,
    registry: Weak<AggregatorTable>,
    inner: Mutex<AggregatorInner>,
}

impl ChangeAggregator {
    /// Aggregator for `tx`, not yet registered with it.
    #[must_use]
    pub fn new(
        tx: TransactionId,
        context: Arc<dyn TransactionContext>,
        writer: Arc<dyn PermissionChangeWriter>,
    ) -> Arc<Self> {
        Self::with_registry(tx, context, writer, Weak::new())
    }

    pub(crate) fn with_registry(
        tx: TransactionId,
        context: Arc<dyn TransactionContext>,
        writer: Arc<dyn PermissionChangeWriter>,
        registry: Weak<AggregatorTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tx,
            context,
            writer,
            registry,
            inner: Mutex::new(AggregatorInner {
                state: AggregatorState::Unregistered,
                builders: Vec::new(),
                by_target: HashMap::new(),
                written: 0,
            }),
        })
    }

    #[must_use]
    pub fn transaction(&self) -> TransactionId {
        self.tx
    }

    #[must_use]
    pub fn state(&self) -> AggregatorState {
        self.inner.lock().state
    }

    /// The builder for `target`, created on first request.
    ///
    /// The first call registers the aggregator with its transaction.
    ///
    /// # Errors
    ///
    /// - `NoActiveTransaction` if the aggregator's transaction is not the current one
    /// - `TransactionNotModifiable` if the transaction is already completing
    /// - `AlreadyFlushed` once flushing has started
    pub fn builder(self: &Arc<Self>, target: &TargetRef) -> Result<Arc<ChangeBuilder>, DomainError> {
        let mut inner = self.inner.lock();
        match inner.state {
            AggregatorState::Unregistered => {
                self.register()?;
                inner.state = AggregatorState::Registered;
            }
            AggregatorState::Registered => {}
            state @ (AggregatorState::Flushing | AggregatorState::Flushed) => {
                return Err(DomainError::AlreadyFlushed {
                    tx: self.tx.to_string(),
                    stage: state.as_str(),
                });
            }
        }

        if let Some(&pos) = inner.by_target.get(target) {
            return Ok(Arc::clone(&inner.builders[pos]));
        }

        let builder = Arc::new(ChangeBuilder::new(target.clone()));
        let pos = inner.builders.len();
        inner.builders.push(Arc::clone(&builder));
        inner.by_target.insert(target.clone(), pos);
        debug!(tx = %self.tx, target_id = %target, "Created permission change builder");
        Ok(builder)
    }

    fn register(self: &Arc<Self>) -> Result<(), DomainError> {
        if self.context.current_transaction() != Some(self.tx) {
            return Err(DomainError::NoActiveTransaction);
        }
        let status = self.context.status(self.tx);
        if !status.is_modifiable() {
            return Err(DomainError::TransactionNotModifiable { status });
        }

        let listener: Arc<dyn TransactionSynchronization> = Arc::<Self>::clone(self);
        self.context.register_synchronization(self.tx, listener)?;
        debug!(tx = %self.tx, "Registered permission change aggregator");
        Ok(())
    }

    /// Apply every non-empty builder once, in creation order.
    ///
    /// A second call is ignored.
    ///
    /// # Errors
    ///
    /// The first writer failure, unchanged. Remaining builders are not applied.
    #[tracing::instrument(skip_all, fields(tx = %self.tx))]
    pub async fn flush(&self) -> Result<(), DomainError> {
        let builders = {
            let mut inner = self.inner.lock();
            match inner.state {
                AggregatorState::Unregistered | AggregatorState::Registered => {
                    inner.state = AggregatorState::Flushing;
                    inner.builders.clone()
                }
                state @ (AggregatorState::Flushing | AggregatorState::Flushed) => {
                    warn!(state = state.as_str(), "Repeated flush request ignored");
                    return Ok(());
                }
            }
        };

        let mut applied = 0usize;
        for (pos, builder) in builders.iter().enumerate() {
            let changes = builder.freeze();
            if !changes.is_empty() {
                debug!(
                    target_id = %builder.target(),
                    changes = changes.len(),
                    "Applying permission changes"
                );
                self.writer.apply_changes(builder.target(), changes).await?;
                applied += 1;
            }
            self.inner.lock().written = pos + 1;
        }

        info!(targets = applied, "Permission changes flushed");
        Ok(())
    }

    /// Enter the terminal state after the transaction finished either way.
    pub fn complete(&self, status: TransactionStatus) {
        let (written, builders) = {
            let mut inner = self.inner.lock();
            inner.state = AggregatorState::Flushed;
            inner.by_target.clear();
            (inner.written, std::mem::take(&mut inner.builders))
        };

        // a failed flush may have left later builders open
        let discarded: usize = builders
            .iter()
            .enumerate()
            .map(|(pos, builder)| {
                let pending = builder.freeze();
                if pos < written { 0 } else { pending.len() }
            })
            .sum();

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.tx);
        }

        if status.is_committed() {
            debug!(tx = %self.tx, "Permission change aggregator completed");
        } else {
            info!(
                tx = %self.tx,
                ?status,
                discarded,
                "Transaction did not commit, permission changes rolled back"
            );
        }
    }
}

#[async_trait]
impl TransactionSynchronization for ChangeAggregator {
    async fn before_completion(&self) -> Result<(), PermissionResolverError> {
        self.flush().await.map_err(Into::into)
    }

    async fn after_completion(&self, status: TransactionStatus) {
        self.complete(status);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use permission_resolver_sdk::PermissionsChange;
    use tracing_test::traced_test;

    /// Transaction context with one fixed transaction and recorded listeners.
    struct FixedTx {
        tx: Option<TransactionId>,
        status: Mutex<TransactionStatus>,
        listeners: Mutex<Vec<Arc<dyn TransactionSynchronization>>>,
    }

    impl FixedTx {
        fn active(tx: TransactionId) -> Arc<Self> {
            Arc::new(Self {
                tx: Some(tx),
                status: Mutex::new(TransactionStatus::Active),
                listeners: Mutex::new(Vec::new()),
            })
        }

        fn none() -> Arc<Self> {
            Arc::new(Self {
                tx: None,
                status: Mutex::new(TransactionStatus::Unknown),
                listeners: Mutex::new(Vec::new()),
            })
        }
    }

    impl TransactionContext for FixedTx {
        fn current_transaction(&self) -> Option<TransactionId> {
            self.tx
        }

        fn status(&self, _tx: TransactionId) -> TransactionStatus {
            *self.status.lock()
        }

        fn register_synchronization(
            &self,
            _tx: TransactionId,
            listener: Arc<dyn TransactionSynchronization>,
        ) -> Result<(), PermissionResolverError> {
            self.listeners.lock().push(listener);
            Ok(())
        }
    }

    /// Writer recording every call; optionally failing for one target.
    #[derive(Default)]
    struct RecordingWriter {
        calls: Mutex<Vec<(TargetRef, Vec<PermissionsChange>)>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl PermissionChangeWriter for RecordingWriter {
        async fn apply_changes(
            &self,
            target: &TargetRef,
            changes: Vec<PermissionsChange>,
        ) -> Result<(), PermissionResolverError> {
            if self.fail_for.as_deref() == Some(target.id()) {
                return Err(PermissionResolverError::WriteFailed {
                    target: target.clone(),
                    reason: "no manager left".to_owned(),
                });
            }
            self.calls.lock().push((target.clone(), changes));
            Ok(())
        }
    }

    fn add(authority: &str, role: &str) -> PermissionsChange {
        PermissionsChange::AddRoleAssignment {
            authority: authority.to_owned(),
            role: role.to_owned(),
        }
    }

    fn setup(writer: RecordingWriter) -> (Arc<ChangeAggregator>, Arc<FixedTx>, Arc<RecordingWriter>) {
        let tx = TransactionId::new_v4();
        let ctx = FixedTx::active(tx);
        let writer = Arc::new(writer);
        let aggregator = ChangeAggregator::new(tx, ctx.clone(), writer.clone());
        (aggregator, ctx, writer)
    }

    #[tokio::test]
    async fn same_target_accumulates_and_flushes_once() {
        let (aggregator, ctx, writer) = setup(RecordingWriter::default());
        let target = TargetRef::new("refX");

        aggregator
            .builder(&target)
            .unwrap()
            .add_role_assignment_change("u1", "CONSUMER")
            .unwrap();
        aggregator
            .builder(&target)
            .unwrap()
            .add_role_assignment_change("u2", "MANAGER")
            .unwrap();

        assert_eq!(aggregator.state(), AggregatorState::Registered);
        assert_eq!(ctx.listeners.lock().len(), 1);

        aggregator.before_completion().await.unwrap();
        assert_eq!(aggregator.state(), AggregatorState::Flushing);

        let calls = writer.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, target);
        assert_eq!(calls[0].1, vec![add("u1", "CONSUMER"), add("u2", "MANAGER")]);
    }

    #[tokio::test]
    async fn flush_follows_builder_creation_order() {
        let (aggregator, _ctx, writer) = setup(RecordingWriter::default());

        for id in ["zeta", "alpha", "mid"] {
            aggregator
                .builder(&TargetRef::new(id))
                .unwrap()
                .inherit_from_parent_change(true)
                .unwrap();
        }
        // Touching an existing builder does not move it.
        aggregator
            .builder(&TargetRef::new("zeta"))
            .unwrap()
            .inherit_from_library_change(false)
            .unwrap();

        aggregator.flush().await.unwrap();

        let order: Vec<String> = writer
            .calls
            .lock()
            .iter()
            .map(|(target, _)| target.id().to_owned())
            .collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn empty_builders_are_not_written() {
        let (aggregator, _ctx, writer) = setup(RecordingWriter::default());

        let _ = aggregator.builder(&TargetRef::new("untouched")).unwrap();
        aggregator
            .builder(&TargetRef::new("touched"))
            .unwrap()
            .parent_change(None)
            .unwrap();

        aggregator.flush().await.unwrap();

        let calls = writer.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.id(), "touched");
    }

    #[tokio::test]
    async fn builder_after_flush_is_illegal_state() {
        let (aggregator, _ctx, _writer) = setup(RecordingWriter::default());
        let target = TargetRef::new("refX");
        let builder = aggregator.builder(&target).unwrap();

        aggregator.flush().await.unwrap();
        assert!(matches!(
            aggregator.builder(&target),
            Err(DomainError::AlreadyFlushed { stage: "flushing", .. })
        ));

        aggregator.complete(TransactionStatus::Committed);
        assert_eq!(aggregator.state(), AggregatorState::Flushed);
        let err: PermissionResolverError = aggregator.builder(&target).unwrap_err().into();
        assert!(err.is_illegal_state());

        assert!(builder.add_role_assignment_change("u1", "CONSUMER").is_err());
    }

    #[tokio::test]
    async fn second_flush_is_ignored() {
        let (aggregator, _ctx, writer) = setup(RecordingWriter::default());
        aggregator
            .builder(&TargetRef::new("refX"))
            .unwrap()
            .add_role_assignment_change("u1", "CONSUMER")
            .unwrap();

        aggregator.flush().await.unwrap();
        aggregator.flush().await.unwrap();

        assert_eq!(writer.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn builder_without_transaction_is_illegal_state() {
        let aggregator = ChangeAggregator::new(
            TransactionId::new_v4(),
            FixedTx::none(),
            Arc::new(RecordingWriter::default()),
        );

        assert!(matches!(
            aggregator.builder(&TargetRef::new("refX")),
            Err(DomainError::NoActiveTransaction)
        ));
        assert_eq!(aggregator.state(), AggregatorState::Unregistered);
    }

    #[tokio::test]
    async fn builder_in_completing_transaction_is_illegal_state() {
        let (aggregator, ctx, _writer) = setup(RecordingWriter::default());
        *ctx.status.lock() = TransactionStatus::Committing;

        match aggregator.builder(&TargetRef::new("refX")) {
            Err(DomainError::TransactionNotModifiable { status }) => {
                assert_eq!(status, TransactionStatus::Committing);
            }
            other => panic!("Expected TransactionNotModifiable, got: {other:?}"),
        }
        assert!(ctx.listeners.lock().is_empty());
    }

    #[tokio::test]
    async fn write_failure_propagates_and_completion_still_terminates() {
        let (aggregator, _ctx, writer) = setup(RecordingWriter {
            fail_for: Some("second".to_owned()),
            ..Default::default()
        });
        for id in ["first", "second", "third"] {
            aggregator
                .builder(&TargetRef::new(id))
                .unwrap()
                .add_role_assignment_change("u1", "MANAGER")
                .unwrap();
        }

        let err = aggregator.before_completion().await.unwrap_err();
        assert!(matches!(err, PermissionResolverError::WriteFailed { .. }));
        assert_eq!(writer.calls.lock().len(), 1);

        aggregator.after_completion(TransactionStatus::RolledBack).await;
        assert_eq!(aggregator.state(), AggregatorState::Flushed);

        // no second attempt
        aggregator.before_completion().await.unwrap();
        assert_eq!(writer.calls.lock().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_flush_reports_unwritten_changes_as_discarded() {
        let (aggregator, _ctx, writer) = setup(RecordingWriter {
            fail_for: Some("second".to_owned()),
            ..Default::default()
        });
        aggregator
            .builder(&TargetRef::new("first"))
            .unwrap()
            .add_role_assignment_change("u1", "MANAGER")
            .unwrap();
        aggregator
            .builder(&TargetRef::new("second"))
            .unwrap()
            .add_role_assignment_change("u1", "MANAGER")
            .unwrap();
        let third = aggregator.builder(&TargetRef::new("third")).unwrap();
        third
            .add_role_assignment_change("u1", "MANAGER")
            .unwrap()
            .inherit_from_parent_change(true)
            .unwrap();

        aggregator.flush().await.unwrap_err();
        assert!(!third.is_frozen());

        aggregator.complete(TransactionStatus::RolledBack);

        assert!(third.is_frozen());
        assert_eq!(writer.calls.lock().len(), 1);
        assert!(logs_contain("discarded=3"));
    }

    #[tokio::test]
    async fn rollback_without_flush_discards_changes() {
        let (aggregator, _ctx, writer) = setup(RecordingWriter::default());
        let builder = aggregator.builder(&TargetRef::new("refX")).unwrap();
        builder.add_role_assignment_change("u1", "MANAGER").unwrap();

        aggregator.complete(TransactionStatus::RolledBack);

        assert!(builder.is_frozen());
        assert!(writer.calls.lock().is_empty());
        aggregator.flush().await.unwrap();
        assert!(writer.calls.lock().is_empty());
    }
}
