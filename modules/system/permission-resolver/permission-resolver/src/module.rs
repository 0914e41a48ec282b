//! Permission resolver module wiring.

use std::sync::Arc;

use permission_resolver_sdk::{
    PermissionChangeWriter, PermissionChangesClient, PermissionResolverClient, PermissionRowSource,
    TransactionContext,
};
use tracing::info;

use crate::config::PermissionResolverConfig;
use crate::domain::{
    HierarchyResolver, PermissionChangesLocalClient, PermissionResolverLocalClient,
    TransactionalPermissionChanges,
};
use crate::infra::{InMemoryPermissionStore, LocalTransactionManager};

/// Permission resolver module.
///
/// Owns the read client (hierarchy reconstruction) and the write client
/// (per-transaction change aggregation) built on top of the given
/// collaborators.
pub struct PermissionResolverModule {
    resolver: Arc<dyn PermissionResolverClient>,
    changes: Arc<dyn PermissionChangesClient>,
}

/// In-process collaborators created by [`PermissionResolverModule::in_process`].
pub struct InProcessInfra {
    pub store: Arc<InMemoryPermissionStore>,
    pub transactions: Arc<LocalTransactionManager>,
}

impl PermissionResolverModule {
    pub const MODULE_NAME: &'static str = "permission-resolver";

    #[must_use]
    #[tracing::instrument(skip_all, fields(true_code = cfg.flag_encoding.true_code))]
    pub fn new(
        cfg: &PermissionResolverConfig,
        source: Arc<dyn PermissionRowSource>,
        writer: Arc<dyn PermissionChangeWriter>,
        context: Arc<dyn TransactionContext>,
    ) -> Self {
        info!("Initializing {} module", Self::MODULE_NAME);

        let resolver = Arc::new(HierarchyResolver::new(source, cfg.flag_encoding));
        let changes = Arc::new(TransactionalPermissionChanges::new(context, writer));

        let resolver: Arc<dyn PermissionResolverClient> =
            Arc::new(PermissionResolverLocalClient::new(resolver));
        let changes: Arc<dyn PermissionChangesClient> =
            Arc::new(PermissionChangesLocalClient::new(changes));

        info!("{} module initialized successfully", Self::MODULE_NAME);
        Self { resolver, changes }
    }

    /// Module backed by the in-memory store seeded from `cfg` and the local
    /// transaction manager.
    #[must_use]
    pub fn in_process(cfg: &PermissionResolverConfig) -> (Self, InProcessInfra) {
        let store = Arc::new(InMemoryPermissionStore::seeded(
            cfg.flag_encoding,
            cfg.seed.scopes.iter().cloned(),
            cfg.seed.assignments.iter().cloned(),
        ));
        info!(scopes = store.len(), "Seeded in-memory permission store");
        let transactions = Arc::new(LocalTransactionManager::new());

        let module = Self::new(cfg, store.clone(), store.clone(), transactions.clone());
        (
            module,
            InProcessInfra {
                store,
                transactions,
            },
        )
    }

    #[must_use]
    pub fn resolver_client(&self) -> Arc<dyn PermissionResolverClient> {
        Arc::clone(&self.resolver)
    }

    #[must_use]
    pub fn changes_client(&self) -> Arc<dyn PermissionChangesClient> {
        Arc::clone(&self.changes)
    }
}
