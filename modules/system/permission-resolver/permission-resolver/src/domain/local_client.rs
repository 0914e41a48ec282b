//! Local (in-process) clients for the permission resolver.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use permission_resolver_sdk::{
    ChangeBuilder, PermissionChangesClient, PermissionModelType, PermissionResolverClient,
    PermissionResolverError, PermissionsSnapshot, TargetId, TargetRef,
};

use super::{DomainError, HierarchyResolver, TransactionalPermissionChanges};

/// Read client wrapping the hierarchy resolver.
pub struct PermissionResolverLocalClient {
    resolver: Arc<HierarchyResolver>,
}

impl PermissionResolverLocalClient {
    #[must_use]
    pub fn new(resolver: Arc<HierarchyResolver>) -> Self {
        Self { resolver }
    }
}

/// Write client wrapping the transactional change registry.
pub struct PermissionChangesLocalClient {
    changes: Arc<TransactionalPermissionChanges>,
}

impl PermissionChangesLocalClient {
    #[must_use]
    pub fn new(changes: Arc<TransactionalPermissionChanges>) -> Self {
        Self { changes }
    }
}

fn log_and_convert(op: &str, e: DomainError) -> PermissionResolverError {
    tracing::error!(operation = op, error = ?e, "permission_resolver call failed");
    e.into()
}

#[async_trait]
impl PermissionResolverClient for PermissionResolverLocalClient {
    async fn get_permissions(
        &self,
        target_id: &str,
    ) -> Result<Option<PermissionsSnapshot>, PermissionResolverError> {
        self.resolver
            .resolve_snapshot(target_id)
            .await
            .map_err(|e| log_and_convert("get_permissions", e))
    }

    async fn get_permissions_batch(
        &self,
        target_ids: &[TargetId],
    ) -> Result<HashMap<TargetId, PermissionsSnapshot>, PermissionResolverError> {
        self.resolver
            .resolve_snapshots(target_ids)
            .await
            .map_err(|e| log_and_convert("get_permissions_batch", e))
    }

    async fn get_permission_model(
        &self,
        target_id: &str,
    ) -> Result<PermissionModelType, PermissionResolverError> {
        self.resolver
            .permission_model(target_id)
            .await
            .map_err(|e| log_and_convert("get_permission_model", e))
    }

    async fn is_root(&self, target_id: &str) -> Result<bool, PermissionResolverError> {
        self.resolver
            .is_root(target_id)
            .await
            .map_err(|e| log_and_convert("is_root", e))
    }
}

impl PermissionChangesClient for PermissionChangesLocalClient {
    fn builder(&self, target: &TargetRef) -> Result<Arc<ChangeBuilder>, PermissionResolverError> {
        self.changes
            .builder(target)
            .map_err(|e| log_and_convert("builder", e))
    }
}
