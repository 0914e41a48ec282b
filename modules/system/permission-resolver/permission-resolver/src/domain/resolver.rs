//! Hierarchy resolver service.
//!
//! Fetches closure and assignment rows once per call and reconstructs a
//! [`PermissionGraph`](super::hierarchy::PermissionGraph) from them. Nothing
//! is cached between calls.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use permission_resolver_sdk::{
    FlagEncoding, PermissionModelType, PermissionRowSource, PermissionsSnapshot, TargetId,
};
use tracing::debug;

use super::error::DomainError;
use super::hierarchy::{GraphBuilder, PermissionNode};

pub struct HierarchyResolver {
    source: Arc<dyn PermissionRowSource>,
    encoding: FlagEncoding,
}

impl HierarchyResolver {
    #[must_use]
    pub fn new(source: Arc<dyn PermissionRowSource>, encoding: FlagEncoding) -> Self {
        Self { source, encoding }
    }

    /// Resolve one scope with its parent and library chains attached.
    ///
    /// # Errors
    ///
    /// Row source failures. An unknown id yields `Ok(None)`.
    #[tracing::instrument(skip_all, fields(target_id = %target_id))]
    pub async fn resolve(&self, target_id: &str) -> Result<Option<PermissionNode>, DomainError> {
        let mut resolved = self.resolve_batch(&[target_id.to_owned()]).await?;
        Ok(resolved.remove(target_id))
    }

    /// Resolve several scopes from a single pair of fetches.
    ///
    /// Ancestors and libraries reachable from more than one requested id are
    /// the same node instance in every result. Unknown and empty ids are absent
    /// from the returned map.
    ///
    /// Requested ids are linked in ascending id order and a node keeps the links
    /// of the first traversal that reaches it. Inside a loop the batch may
    /// therefore cut a different edge than a single-id lookup would.
    ///
    /// # Errors
    ///
    /// Row source failures.
    #[tracing::instrument(skip_all, fields(requested = target_ids.len()))]
    pub async fn resolve_batch(
        &self,
        target_ids: &[TargetId],
    ) -> Result<HashMap<TargetId, PermissionNode>, DomainError> {
        let requested: BTreeSet<TargetId> = target_ids
            .iter()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect();
        if requested.is_empty() {
            return Ok(HashMap::new());
        }

        let closure = self.source.fetch_closure_rows(&requested).await?;
        if closure.is_empty() {
            debug!("No closure rows for requested targets");
            return Ok(HashMap::new());
        }

        let closure_ids: BTreeSet<TargetId> =
            closure.iter().map(|row| row.target_id.clone()).collect();
        let assignments = self.source.fetch_assignment_rows(&closure_ids).await?;

        let mut builder = GraphBuilder::new(closure, assignments, self.encoding);
        let found: Vec<&TargetId> = requested
            .iter()
            .filter(|id| builder.link_from(id))
            .collect();
        let graph = builder.finish();

        let resolved: HashMap<TargetId, PermissionNode> = found
            .into_iter()
            .filter_map(|id| graph.node(id).map(|node| (id.clone(), node)))
            .collect();

        debug!(
            found = resolved.len(),
            nodes = graph.len(),
            "Resolved permission hierarchy"
        );

        Ok(resolved)
    }

    /// Flatten a resolved node. Pure.
    #[must_use]
    pub fn snapshot(node: &PermissionNode) -> PermissionsSnapshot {
        node.snapshot()
    }

    /// Resolve and flatten one scope. An empty id yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Row source failures.
    pub async fn resolve_snapshot(
        &self,
        target_id: &str,
    ) -> Result<Option<PermissionsSnapshot>, DomainError> {
        if target_id.is_empty() {
            return Ok(None);
        }
        Ok(self.resolve(target_id).await?.as_ref().map(Self::snapshot))
    }

    /// Resolve and flatten several scopes.
    ///
    /// # Errors
    ///
    /// Row source failures.
    pub async fn resolve_snapshots(
        &self,
        target_ids: &[TargetId],
    ) -> Result<HashMap<TargetId, PermissionsSnapshot>, DomainError> {
        Ok(self
            .resolve_batch(target_ids)
            .await?
            .into_iter()
            .map(|(id, node)| (id, node.snapshot()))
            .collect())
    }

    /// # Errors
    ///
    /// Row source failures.
    pub async fn permission_model(
        &self,
        target_id: &str,
    ) -> Result<PermissionModelType, DomainError> {
        if target_id.is_empty() {
            return Ok(PermissionModelType::UNDEFINED);
        }
        Ok(self
            .resolve(target_id)
            .await?
            .map_or(PermissionModelType::UNDEFINED, |node| {
                node.permission_model()
            }))
    }

    /// `true` when the scope resolves without a parent link.
    ///
    /// # Errors
    ///
    /// Row source failures.
    pub async fn is_root(&self, target_id: &str) -> Result<bool, DomainError> {
        if target_id.is_empty() {
            return Ok(false);
        }
        Ok(self
            .resolve(target_id)
            .await?
            .is_some_and(|node| node.parent().is_none()))
    }
}
