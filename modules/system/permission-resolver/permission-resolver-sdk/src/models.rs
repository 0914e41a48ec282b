//! Domain models for the permission resolver module.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a permission scope (content item or library).
pub type TargetId = String;

/// An `(authority, role)` pair granted directly on a scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Assignment {
    /// User or group identifier.
    pub authority: String,
    /// Role identifier (e.g., `MANAGER`, `COLLABORATOR`, `CONSUMER`).
    pub role: String,
}

impl Assignment {
    pub fn new(authority: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            role: role.into(),
        }
    }
}

/// Reference to the scope a set of permission changes is issued against.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetRef(TargetId);

impl TargetRef {
    pub fn new(id: impl Into<TargetId>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TargetRef {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One row of the permission closure, as returned by the data-access layer.
///
/// Flag columns carry the raw stored codes; decode them with [`FlagEncoding`]
/// before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureRow {
    pub target_id: TargetId,
    #[serde(default)]
    pub parent_id: Option<TargetId>,
    #[serde(default)]
    pub inherit_from_parent: Option<i16>,
    #[serde(default)]
    pub library_id: Option<TargetId>,
    #[serde(default)]
    pub inherit_from_library: Option<i16>,
    #[serde(default)]
    pub is_library: Option<i16>,
}

/// One authority-role assignment row for a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub target_id: TargetId,
    pub authority: String,
    pub role: String,
}

impl AssignmentRow {
    pub fn new(
        target_id: impl Into<TargetId>,
        authority: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            authority: authority.into(),
            role: role.into(),
        }
    }
}

/// Decoded value of a stored flag column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagCode {
    True,
    False,
    /// A code outside the configured encoding. Reads as `false`.
    Unrecognized(i16),
}

impl FlagCode {
    #[must_use]
    pub fn as_bool(self) -> bool {
        matches!(self, Self::True)
    }
}

/// Mapping between raw flag codes and booleans.
///
/// A missing (`NULL`) code decodes to [`FlagCode::False`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlagEncoding {
    pub true_code: i16,
    pub false_code: i16,
}

impl Default for FlagEncoding {
    fn default() -> Self {
        Self {
            true_code: 1,
            false_code: 0,
        }
    }
}

impl FlagEncoding {
    #[must_use]
    pub fn decode(&self, raw: Option<i16>) -> FlagCode {
        match raw {
            None => FlagCode::False,
            Some(code) if code == self.true_code => FlagCode::True,
            Some(code) if code == self.false_code => FlagCode::False,
            Some(code) => FlagCode::Unrecognized(code),
        }
    }

    #[must_use]
    pub fn encode(&self, value: bool) -> i16 {
        if value {
            self.true_code
        } else {
            self.false_code
        }
    }
}

/// Flattened, read-only projection of one resolved permission scope.
///
/// Links are replaced by ids; nothing here refers back into a resolved graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsSnapshot {
    pub entity_id: TargetId,
    pub parent_id: Option<TargetId>,
    pub library_id: Option<TargetId>,
    pub inherit_from_parent: bool,
    pub inherit_from_library: bool,
    pub is_library: bool,
    assignments: Vec<Assignment>,
}

impl PermissionsSnapshot {
    #[must_use]
    pub fn new(
        entity_id: TargetId,
        parent_id: Option<TargetId>,
        library_id: Option<TargetId>,
        inherit_from_parent: bool,
        inherit_from_library: bool,
        is_library: bool,
        assignments: Vec<Assignment>,
    ) -> Self {
        Self {
            entity_id,
            parent_id,
            library_id,
            inherit_from_parent,
            inherit_from_library,
            is_library,
            assignments,
        }
    }

    /// The scope's own assignments. Every call yields a fresh iterator.
    #[must_use]
    pub fn assignments(&self) -> impl ExactSizeIterator<Item = &Assignment> + '_ {
        self.assignments.iter()
    }
}

/// Which sources contribute to a scope's effective permissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionModelType {
    /// Inherits from the structural parent.
    pub inherited: bool,
    /// Inherits from the library.
    pub library: bool,
    /// Has its own (special) assignments.
    pub special: bool,
}

impl PermissionModelType {
    /// Model of a scope that could not be resolved.
    pub const UNDEFINED: Self = Self {
        inherited: false,
        library: false,
        special: false,
    };

    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.inherited || self.library || self.special
    }
}
