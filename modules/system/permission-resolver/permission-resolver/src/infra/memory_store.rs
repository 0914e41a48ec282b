//! In-process permission row store.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;
use permission_resolver_sdk::{
    Assignment, AssignmentRow, ClosureRow, FlagEncoding, PermissionChangeWriter,
    PermissionResolverError, PermissionRowSource, PermissionsChange, TargetId, TargetRef,
};
use tracing::debug;

#[derive(Default)]
struct StoreData {
    rows: BTreeMap<TargetId, ClosureRow>,
    // authority -> role, one role per authority and scope
    assignments: BTreeMap<TargetId, BTreeMap<String, String>>,
}

/// Closure and assignment rows kept in memory.
///
/// Serves as both the row source and the change writer of the resolver, which
/// makes it suitable for tests and single-process deployments.
pub struct InMemoryPermissionStore {
    encoding: FlagEncoding,
    data: RwLock<StoreData>,
}

impl InMemoryPermissionStore {
    #[must_use]
    pub fn new(encoding: FlagEncoding) -> Self {
        Self {
            encoding,
            data: RwLock::new(StoreData::default()),
        }
    }

    /// Store pre-populated with `rows` and `assignments`.
    ///
    /// A later closure row for the same scope replaces an earlier one; a later
    /// assignment for the same authority replaces its role.
    #[must_use]
    pub fn seeded(
        encoding: FlagEncoding,
        rows: impl IntoIterator<Item = ClosureRow>,
        assignments: impl IntoIterator<Item = AssignmentRow>,
    ) -> Self {
        let store = Self::new(encoding);
        {
            let mut data = store.data.write();
            for row in rows {
                data.rows.insert(row.target_id.clone(), row);
            }
            for a in assignments {
                data.assignments
                    .entry(a.target_id)
                    .or_default()
                    .insert(a.authority, a.role);
            }
        }
        store
    }

    #[must_use]
    pub fn encoding(&self) -> FlagEncoding {
        self.encoding
    }

    #[must_use]
    pub fn closure_row(&self, target_id: &str) -> Option<ClosureRow> {
        self.data.read().rows.get(target_id).cloned()
    }

    #[must_use]
    pub fn assignments_of(&self, target_id: &str) -> BTreeSet<Assignment> {
        self.data
            .read()
            .assignments
            .get(target_id)
            .map(|roles| {
                roles
                    .iter()
                    .map(|(authority, role)| Assignment::new(authority.as_str(), role.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn empty_row(target_id: &str) -> ClosureRow {
    ClosureRow {
        target_id: target_id.to_owned(),
        parent_id: None,
        inherit_from_parent: None,
        library_id: None,
        inherit_from_library: None,
        is_library: None,
    }
}

#[async_trait]
impl PermissionRowSource for InMemoryPermissionStore {
    async fn fetch_closure_rows(
        &self,
        target_ids: &BTreeSet<TargetId>,
    ) -> Result<Vec<ClosureRow>, PermissionResolverError> {
        let data = self.data.read();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = target_ids.iter().map(String::as_str).collect();
        let mut out = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(row) = data.rows.get(id) else {
                continue;
            };
            for next in [row.parent_id.as_deref(), row.library_id.as_deref()]
                .into_iter()
                .flatten()
            {
                if !seen.contains(next) {
                    queue.push_back(next);
                }
            }
            out.push(row.clone());
        }

        debug!(
            requested = target_ids.len(),
            returned = out.len(),
            "Fetched closure rows"
        );
        Ok(out)
    }

    async fn fetch_assignment_rows(
        &self,
        target_ids: &BTreeSet<TargetId>,
    ) -> Result<Vec<AssignmentRow>, PermissionResolverError> {
        let data = self.data.read();
        Ok(target_ids
            .iter()
            .filter_map(|id| data.assignments.get(id).map(|roles| (id, roles)))
            .flat_map(|(id, roles)| {
                roles
                    .iter()
                    .map(move |(authority, role)| {
                        AssignmentRow::new(id.as_str(), authority.as_str(), role.as_str())
                    })
            })
            .collect())
    }
}

#[async_trait]
impl PermissionChangeWriter for InMemoryPermissionStore {
    async fn apply_changes(
        &self,
        target: &TargetRef,
        changes: Vec<PermissionsChange>,
    ) -> Result<(), PermissionResolverError> {
        let id = target.id();
        if id.is_empty() {
            return Err(PermissionResolverError::WriteFailed {
                target: target.clone(),
                reason: "empty target id".to_owned(),
            });
        }

        let count = changes.len();
        let mut data = self.data.write();
        let data = &mut *data;
        let row = data
            .rows
            .entry(id.to_owned())
            .or_insert_with(|| empty_row(id));

        for change in changes {
            match change {
                PermissionsChange::AddRoleAssignment { authority, role } => {
                    data.assignments
                        .entry(id.to_owned())
                        .or_default()
                        .insert(authority, role);
                }
                PermissionsChange::RemoveRoleAssignment { authority, role } => {
                    if let Some(roles) = data.assignments.get_mut(id) {
                        if roles.get(&authority) == Some(&role) {
                            roles.remove(&authority);
                        }
                        if roles.is_empty() {
                            data.assignments.remove(id);
                        }
                    }
                }
                PermissionsChange::Parent { value } => row.parent_id = value,
                PermissionsChange::Library { value } => row.library_id = value,
                PermissionsChange::InheritFromParent { value } => {
                    row.inherit_from_parent = Some(self.encoding.encode(value));
                }
                PermissionsChange::InheritFromLibrary { value } => {
                    row.inherit_from_library = Some(self.encoding.encode(value));
                }
                PermissionsChange::LibraryIndicator { value } => {
                    row.is_library = Some(self.encoding.encode(value));
                }
            }
        }

        debug!(target_id = %target, changes = count, "Applied permission changes");
        Ok(())
    }
}
