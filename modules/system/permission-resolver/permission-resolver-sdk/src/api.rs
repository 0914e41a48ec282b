//! API traits for the permission resolver.
//!
//! Two traits describe collaborators the module consumes (row fetch, change
//! application) and two describe what it exposes to the rest of the platform.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::changes::{ChangeBuilder, PermissionsChange};
use crate::error::PermissionResolverError;
use crate::models::{
    AssignmentRow, ClosureRow, PermissionModelType, PermissionsSnapshot, TargetId, TargetRef,
};

/// Data-access capability returning raw permission rows.
#[async_trait]
pub trait PermissionRowSource: Send + Sync {
    /// Closure rows for `target_ids` and everything reachable from them through
    /// parent and library links.
    ///
    /// Rows missing from the result are treated as unresolved links, not errors.
    ///
    /// # Errors
    ///
    /// `DataAccess` if the underlying store fails.
    async fn fetch_closure_rows(
        &self,
        target_ids: &BTreeSet<TargetId>,
    ) -> Result<Vec<ClosureRow>, PermissionResolverError>;

    /// Assignment rows owned by `target_ids`.
    ///
    /// # Errors
    ///
    /// `DataAccess` if the underlying store fails.
    async fn fetch_assignment_rows(
        &self,
        target_ids: &BTreeSet<TargetId>,
    ) -> Result<Vec<AssignmentRow>, PermissionResolverError>;
}

/// Persistence capability applying a coalesced change set to one target.
#[async_trait]
pub trait PermissionChangeWriter: Send + Sync {
    /// # Errors
    ///
    /// Any error is propagated to the transaction, which then rolls back.
    async fn apply_changes(
        &self,
        target: &TargetRef,
        changes: Vec<PermissionsChange>,
    ) -> Result<(), PermissionResolverError>;
}

/// Public read API.
#[async_trait]
pub trait PermissionResolverClient: Send + Sync {
    /// Permissions of one scope, or `None` when the id is unknown.
    ///
    /// # Errors
    ///
    /// `DataAccess` if rows cannot be fetched.
    async fn get_permissions(
        &self,
        target_id: &str,
    ) -> Result<Option<PermissionsSnapshot>, PermissionResolverError>;

    /// Permissions of several scopes with a single fetch. Unknown ids are absent
    /// from the result.
    ///
    /// # Errors
    ///
    /// `DataAccess` if rows cannot be fetched.
    async fn get_permissions_batch(
        &self,
        target_ids: &[TargetId],
    ) -> Result<HashMap<TargetId, PermissionsSnapshot>, PermissionResolverError>;

    /// Which sources feed the scope's permissions.
    /// Unknown ids report [`PermissionModelType::UNDEFINED`].
    ///
    /// # Errors
    ///
    /// `DataAccess` if rows cannot be fetched.
    async fn get_permission_model(
        &self,
        target_id: &str,
    ) -> Result<PermissionModelType, PermissionResolverError>;

    /// Whether the scope exists and has no parent.
    ///
    /// # Errors
    ///
    /// `DataAccess` if rows cannot be fetched.
    async fn is_root(&self, target_id: &str) -> Result<bool, PermissionResolverError>;
}

/// Public write API.
///
/// ```ignore
/// let changes = hub.get::<dyn PermissionChangesClient>()?;
/// changes
///     .builder(&TargetRef::new("emf:instance"))?
///     .add_role_assignment_change("u1", "CONSUMER")?;
/// ```
pub trait PermissionChangesClient: Send + Sync {
    /// The builder collecting changes for `target` in the current transaction.
    ///
    /// Repeated calls within one transaction return the same builder.
    ///
    /// # Errors
    ///
    /// - `NoActiveTransaction` outside of a transaction
    /// - `TransactionNotModifiable` if the transaction is already completing
    /// - `AlreadyFlushed` if the changes of this transaction were already applied
    fn builder(&self, target: &TargetRef) -> Result<Arc<ChangeBuilder>, PermissionResolverError>;
}
