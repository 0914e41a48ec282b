//! Permission change intents and the per-target change builder.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::PermissionResolverError;
use crate::models::{TargetId, TargetRef};

/// A single requested modification of a scope's permission model.
///
/// Intents are recorded verbatim; validating and applying them is the
/// [`PermissionChangeWriter`](crate::PermissionChangeWriter)'s job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermissionsChange {
    AddRoleAssignment { authority: String, role: String },
    RemoveRoleAssignment { authority: String, role: String },
    Parent { value: Option<TargetId> },
    Library { value: Option<TargetId> },
    InheritFromParent { value: bool },
    InheritFromLibrary { value: bool },
    LibraryIndicator { value: bool },
}

/// Append-only accumulator of change intents for one target within one
/// transaction.
///
/// Builders are handed out by a [`PermissionChangesClient`](crate::PermissionChangesClient)
/// and shared between every caller that asks for the same target. Once the
/// owning transaction flushes, the builder is frozen and further mutation fails
/// with [`PermissionResolverError::BuilderFrozen`].
#[derive(Debug)]
pub struct ChangeBuilder {
    target: TargetRef,
    inner: Mutex<BuilderState>,
}

#[derive(Debug, Default)]
struct BuilderState {
    changes: Vec<PermissionsChange>,
    frozen: bool,
}

impl ChangeBuilder {
    #[must_use]
    pub fn new(target: TargetRef) -> Self {
        Self {
            target,
            inner: Mutex::new(BuilderState::default()),
        }
    }

    #[must_use]
    pub fn target(&self) -> &TargetRef {
        &self.target
    }

    /// Grant `role` to `authority`.
    ///
    /// # Errors
    ///
    /// [`PermissionResolverError::BuilderFrozen`] after the transaction flushed.
    pub fn add_role_assignment_change(
        &self,
        authority: impl Into<String>,
        role: impl Into<String>,
    ) -> Result<&Self, PermissionResolverError> {
        self.push(PermissionsChange::AddRoleAssignment {
            authority: authority.into(),
            role: role.into(),
        })
    }

    /// Revoke `role` from `authority`.
    ///
    /// # Errors
    ///
    /// [`PermissionResolverError::BuilderFrozen`] after the transaction flushed.
    pub fn remove_role_assignment_change(
        &self,
        authority: impl Into<String>,
        role: impl Into<String>,
    ) -> Result<&Self, PermissionResolverError> {
        self.push(PermissionsChange::RemoveRoleAssignment {
            authority: authority.into(),
            role: role.into(),
        })
    }

    /// # Errors
    ///
    /// [`PermissionResolverError::BuilderFrozen`] after the transaction flushed.
    pub fn parent_change(
        &self,
        parent: Option<TargetId>,
    ) -> Result<&Self, PermissionResolverError> {
        self.push(PermissionsChange::Parent { value: parent })
    }

    /// # Errors
    ///
    /// [`PermissionResolverError::BuilderFrozen`] after the transaction flushed.
    pub fn library_change(
        &self,
        library: Option<TargetId>,
    ) -> Result<&Self, PermissionResolverError> {
        self.push(PermissionsChange::Library { value: library })
    }

    /// # Errors
    ///
    /// [`PermissionResolverError::BuilderFrozen`] after the transaction flushed.
    pub fn inherit_from_parent_change(&self, value: bool) -> Result<&Self, PermissionResolverError> {
        self.push(PermissionsChange::InheritFromParent { value })
    }

    /// # Errors
    ///
    /// [`PermissionResolverError::BuilderFrozen`] after the transaction flushed.
    pub fn inherit_from_library_change(
        &self,
        value: bool,
    ) -> Result<&Self, PermissionResolverError> {
        self.push(PermissionsChange::InheritFromLibrary { value })
    }

    /// # Errors
    ///
    /// [`PermissionResolverError::BuilderFrozen`] after the transaction flushed.
    pub fn set_library_indicator_change(
        &self,
        value: bool,
    ) -> Result<&Self, PermissionResolverError> {
        self.push(PermissionsChange::LibraryIndicator { value })
    }

    /// Copy of the recorded intents, in the order they were added.
    #[must_use]
    pub fn changes(&self) -> Vec<PermissionsChange> {
        self.inner.lock().changes.clone()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().changes.is_empty()
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.inner.lock().frozen
    }

    /// Stop accepting changes and return everything recorded so far.
    ///
    /// Called once by the aggregator when the transaction flushes. Freezing an
    /// already frozen builder returns the same sequence again.
    #[must_use]
    pub fn freeze(&self) -> Vec<PermissionsChange> {
        let mut state = self.inner.lock();
        state.frozen = true;
        state.changes.clone()
    }

    fn push(&self, change: PermissionsChange) -> Result<&Self, PermissionResolverError> {
        let mut state = self.inner.lock();
        if state.frozen {
            tracing::warn!(target_id = %self.target, ?change, "Change rejected, builder is frozen");
            return Err(PermissionResolverError::BuilderFrozen {
                target: self.target.clone(),
            });
        }
        state.changes.push(change);
        Ok(self)
    }
}
