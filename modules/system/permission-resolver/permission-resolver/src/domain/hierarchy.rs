//! Permission graph reconstructed from flat closure and assignment rows.
//!
//! A [`PermissionGraph`] is an arena built by one resolution call. Every
//! target id maps to exactly one slot, so ancestors and libraries reachable
//! from several requested ids are shared. [`PermissionNode`] is a cheap handle
//! into the arena; its `parent` and `library` links are navigation only.
//!
//! Links are wired by walking from each requested root with the set of ids on
//! the current chain. A link that would revisit an id already on that chain is
//! dropped, which keeps every traversal finite even when the rows describe a
//! loop.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use permission_resolver_sdk::{
    Assignment, AssignmentRow, ClosureRow, FlagCode, FlagEncoding, PermissionModelType,
    PermissionsSnapshot, TargetId,
};
use tracing::{debug, warn};

struct NodeData {
    target_id: TargetId,
    parent: Option<usize>,
    library: Option<usize>,
    inherit_from_parent: bool,
    inherit_from_library: bool,
    is_library: bool,
    assignments: BTreeSet<Assignment>,
}

/// Arena of resolved permission scopes owned by one resolution call.
pub struct PermissionGraph {
    nodes: Vec<NodeData>,
    index: HashMap<TargetId, usize>,
}

impl PermissionGraph {
    /// The node for `target_id`, if a closure row for it was supplied.
    #[must_use]
    pub fn node(self: &Arc<Self>, target_id: &str) -> Option<PermissionNode> {
        self.index.get(target_id).map(|&idx| PermissionNode {
            graph: Arc::clone(self),
            idx,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl fmt::Debug for PermissionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGraph")
            .field("nodes", &self.nodes.len())
            .field("index", &self.index.len())
            .finish()
    }
}

/// A resolved permission scope.
///
/// Cloning a node clones the handle, not the scope. Use
/// [`PermissionNode::ptr_eq`] to check whether two handles denote the same
/// scope instance.
#[derive(Clone)]
pub struct PermissionNode {
    graph: Arc<PermissionGraph>,
    idx: usize,
}

impl PermissionNode {
    fn data(&self) -> &NodeData {
        &self.graph.nodes[self.idx]
    }

    fn sibling(&self, idx: usize) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            idx,
        }
    }

    #[must_use]
    pub fn target_id(&self) -> &str {
        &self.data().target_id
    }

    /// The structural parent, absent for roots, dangling ids and truncated loops.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.data().parent.map(|idx| self.sibling(idx))
    }

    /// The library this scope belongs to, absent under the same rules as `parent`.
    #[must_use]
    pub fn library(&self) -> Option<Self> {
        self.data().library.map(|idx| self.sibling(idx))
    }

    #[must_use]
    pub fn inherit_from_parent(&self) -> bool {
        self.data().inherit_from_parent
    }

    #[must_use]
    pub fn inherit_from_library(&self) -> bool {
        self.data().inherit_from_library
    }

    #[must_use]
    pub fn is_library(&self) -> bool {
        self.data().is_library
    }

    /// The scope's own, non-inherited assignments.
    #[must_use]
    pub fn assignments(&self) -> &BTreeSet<Assignment> {
        &self.data().assignments
    }

    /// Parent chain, nearest first. Always finite.
    #[must_use]
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: self.parent(),
        }
    }

    #[must_use]
    pub fn permission_model(&self) -> PermissionModelType {
        let data = self.data();
        PermissionModelType {
            inherited: data.inherit_from_parent,
            library: data.inherit_from_library,
            special: !data.assignments.is_empty(),
        }
    }

    /// Flattened copy with links replaced by ids.
    #[must_use]
    pub fn snapshot(&self) -> PermissionsSnapshot {
        let data = self.data();
        PermissionsSnapshot::new(
            data.target_id.clone(),
            self.parent().map(|p| p.target_id().to_owned()),
            self.library().map(|l| l.target_id().to_owned()),
            data.inherit_from_parent,
            data.inherit_from_library,
            data.is_library,
            data.assignments.iter().cloned().collect(),
        )
    }

    /// Whether both handles denote the same node of the same graph.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.graph, &b.graph) && a.idx == b.idx
    }
}

impl fmt::Debug for PermissionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data();
        f.debug_struct("PermissionNode")
            .field("target_id", &data.target_id)
            .field("parent", &self.parent().map(|p| p.target_id().to_owned()))
            .field("library", &self.library().map(|l| l.target_id().to_owned()))
            .field("inherit_from_parent", &data.inherit_from_parent)
            .field("inherit_from_library", &data.inherit_from_library)
            .field("is_library", &data.is_library)
            .field("assignments", &data.assignments)
            .finish()
    }
}

/// Iterator over a node's parent chain.
pub struct Ancestors {
    next: Option<PermissionNode>,
}

impl Iterator for Ancestors {
    type Item = PermissionNode;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Parent,
    Library,
}

impl Edge {
    fn following(self) -> Option<Self> {
        match self {
            Self::Parent => Some(Self::Library),
            Self::Library => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Library => "library",
        }
    }
}

struct PendingLinks {
    parent_id: Option<TargetId>,
    library_id: Option<TargetId>,
}

/// Two-pass construction: node table first, then link wiring per root.
pub(crate) struct GraphBuilder {
    nodes: Vec<NodeData>,
    index: HashMap<TargetId, usize>,
    pending: Vec<PendingLinks>,
    wired: Vec<bool>,
}

impl GraphBuilder {
    pub(crate) fn new(
        closure: Vec<ClosureRow>,
        assignments: Vec<AssignmentRow>,
        encoding: FlagEncoding,
    ) -> Self {
        let mut grouped: HashMap<TargetId, BTreeSet<Assignment>> = HashMap::new();
        for row in assignments {
            grouped
                .entry(row.target_id)
                .or_default()
                .insert(Assignment::new(row.authority, row.role));
        }

        let mut builder = Self {
            nodes: Vec::with_capacity(closure.len()),
            index: HashMap::with_capacity(closure.len()),
            pending: Vec::with_capacity(closure.len()),
            wired: Vec::with_capacity(closure.len()),
        };

        for row in closure {
            if builder.index.contains_key(&row.target_id) {
                debug!(target_id = %row.target_id, "Duplicate closure row ignored");
                continue;
            }
            let idx = builder.nodes.len();
            let assignments = grouped.remove(&row.target_id).unwrap_or_default();
            builder.nodes.push(NodeData {
                inherit_from_parent: decode_flag(
                    encoding,
                    &row.target_id,
                    "inherit_from_parent",
                    row.inherit_from_parent,
                ),
                inherit_from_library: decode_flag(
                    encoding,
                    &row.target_id,
                    "inherit_from_library",
                    row.inherit_from_library,
                ),
                is_library: decode_flag(encoding, &row.target_id, "is_library", row.is_library),
                target_id: row.target_id.clone(),
                parent: None,
                library: None,
                assignments,
            });
            builder.pending.push(PendingLinks {
                parent_id: row.parent_id,
                library_id: row.library_id,
            });
            builder.wired.push(false);
            builder.index.insert(row.target_id, idx);
        }

        builder
    }

    /// Wire every link reachable from `root`. Returns `false` when `root` has no
    /// closure row.
    pub(crate) fn link_from(&mut self, root: &str) -> bool {
        let Some(&root_idx) = self.index.get(root) else {
            return false;
        };
        if self.wired[root_idx] {
            return true;
        }

        let mut on_chain: HashSet<usize> = HashSet::new();
        let mut stack: Vec<(usize, Option<Edge>)> = Vec::new();
        self.wired[root_idx] = true;
        on_chain.insert(root_idx);
        stack.push((root_idx, Some(Edge::Parent)));

        while let Some(frame) = stack.last_mut() {
            let (idx, next_edge) = *frame;
            let Some(edge) = next_edge else {
                stack.pop();
                on_chain.remove(&idx);
                continue;
            };
            frame.1 = edge.following();

            let Some(linked) = self.lookup(idx, edge) else {
                continue;
            };
            if on_chain.contains(&linked) {
                warn!(
                    root,
                    target_id = %self.nodes[idx].target_id,
                    linked_id = %self.nodes[linked].target_id,
                    edge = edge.as_str(),
                    "Permission hierarchy loop detected, link dropped"
                );
                continue;
            }

            match edge {
                Edge::Parent => self.nodes[idx].parent = Some(linked),
                Edge::Library => self.nodes[idx].library = Some(linked),
            }

            if !self.wired[linked] {
                self.wired[linked] = true;
                on_chain.insert(linked);
                stack.push((linked, Some(Edge::Parent)));
            }
        }

        true
    }

    fn lookup(&self, idx: usize, edge: Edge) -> Option<usize> {
        let pending = &self.pending[idx];
        let id = match edge {
            Edge::Parent => pending.parent_id.as_deref(),
            Edge::Library => pending.library_id.as_deref(),
        }?;
        let linked = self.index.get(id).copied();
        if linked.is_none() {
            debug!(
                target_id = %self.nodes[idx].target_id,
                linked_id = id,
                edge = edge.as_str(),
                "Dangling permission link left unresolved"
            );
        }
        linked
    }

    pub(crate) fn finish(self) -> Arc<PermissionGraph> {
        Arc::new(PermissionGraph {
            nodes: self.nodes,
            index: self.index,
        })
    }
}

fn decode_flag(
    encoding: FlagEncoding,
    target_id: &str,
    column: &'static str,
    raw: Option<i16>,
) -> bool {
    match encoding.decode(raw) {
        FlagCode::Unrecognized(code) => {
            warn!(
                target_id,
                column, code, "Unrecognized permission flag code, treating as false"
            );
            false
        }
        flag => flag.as_bool(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn row(id: &str, parent: Option<&str>, library: Option<&str>) -> ClosureRow {
        ClosureRow {
            target_id: id.to_owned(),
            parent_id: parent.map(str::to_owned),
            inherit_from_parent: Some(1),
            library_id: library.map(str::to_owned),
            inherit_from_library: Some(0),
            is_library: None,
        }
    }

    fn build(closure: Vec<ClosureRow>, roots: &[&str]) -> Arc<PermissionGraph> {
        let mut builder = GraphBuilder::new(closure, Vec::new(), FlagEncoding::default());
        for root in roots {
            builder.link_from(root);
        }
        builder.finish()
    }

    #[test]
    fn self_parent_is_truncated() {
        let graph = build(vec![row("a", Some("a"), None)], &["a"]);
        let a = graph.node("a").unwrap();
        assert!(a.parent().is_none());
        assert!(a.inherit_from_parent());
    }

    #[test]
    fn library_loop_is_truncated() {
        // a -lib-> b -parent-> a
        let graph = build(
            vec![row("a", None, Some("b")), row("b", Some("a"), None)],
            &["a"],
        );
        let a = graph.node("a").unwrap();
        let b = a.library().unwrap();
        assert_eq!(b.target_id(), "b");
        assert!(b.parent().is_none());
    }

    #[test]
    fn shared_ancestor_not_treated_as_loop() {
        // a -parent-> c, a -lib-> b -parent-> c
        let graph = build(
            vec![
                row("a", Some("c"), Some("b")),
                row("b", Some("c"), None),
                row("c", None, None),
            ],
            &["a"],
        );
        let a = graph.node("a").unwrap();
        let via_parent = a.parent().unwrap();
        let via_library = a.library().unwrap().parent().unwrap();
        assert!(PermissionNode::ptr_eq(&via_parent, &via_library));
    }

    #[test]
    fn duplicate_rows_collapse_to_first() {
        let graph = build(
            vec![row("a", Some("p1"), None), row("a", Some("p2"), None)],
            &["a"],
        );
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn unknown_root_is_not_linked() {
        let mut builder = GraphBuilder::new(Vec::new(), Vec::new(), FlagEncoding::default());
        assert!(!builder.link_from("missing"));
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn deep_chain_is_walked_without_recursion() {
        let depth = 10_000;
        let closure: Vec<ClosureRow> = (0..depth)
            .map(|i| {
                let parent = (i + 1 < depth).then(|| format!("n{}", i + 1));
                ClosureRow {
                    target_id: format!("n{i}"),
                    parent_id: parent,
                    inherit_from_parent: Some(1),
                    library_id: None,
                    inherit_from_library: None,
                    is_library: None,
                }
            })
            .collect();

        let graph = build(closure, &["n0"]);
        assert_eq!(graph.node("n0").unwrap().ancestors().count(), depth - 1);
    }

    #[test]
    fn permission_model_reflects_flags_and_assignments() {
        let mut builder = GraphBuilder::new(
            vec![row("a", None, None)],
            vec![AssignmentRow::new("a", "admin", "MANAGER")],
            FlagEncoding::default(),
        );
        builder.link_from("a");
        let graph = builder.finish();

        let model = graph.node("a").unwrap().permission_model();
        assert!(model.inherited);
        assert!(!model.library);
        assert!(model.special);
    }
}
