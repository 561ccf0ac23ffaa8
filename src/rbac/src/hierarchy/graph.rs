//! Hierarchy graph for roles, admin roles and organizational units
//!
//! Edges point from child to parent. Walking child → parent yields a node's
//! ascendants, parent → child its descendants. Every traversal tracks a
//! visited set, so a corrupt edge list containing a cycle still terminates.

use crate::error::{RbacError, Result};
use crate::types::{HierarchyKind, Relationship, TenantId};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Immutable directed acyclic graph of names
///
/// Graphs are built once from an edge list and then shared read-only.
/// Mutations return a new graph.
///
/// # Example
///
/// ```
/// use arbiter_rbac::hierarchy::HierarchyGraph;
/// use arbiter_rbac::HierarchyKind;
///
/// let graph = HierarchyGraph::from_edges(HierarchyKind::Role, "acme", [("Teller", "Supervisor")]);
/// assert!(graph.ascendants("Teller").contains("Supervisor"));
/// assert!(graph.with_added_edge("Supervisor", "Teller").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct HierarchyGraph {
    kind: HierarchyKind,

    tenant: TenantId,

    /// All known node names
    nodes: BTreeSet<String>,

    /// child -> parents
    parents: HashMap<String, BTreeSet<String>>,

    /// parent -> children
    children: HashMap<String, BTreeSet<String>>,
}

impl HierarchyGraph {
    /// Create an empty graph
    pub fn new(kind: HierarchyKind, tenant: impl Into<TenantId>) -> Self {
        Self {
            kind,
            tenant: tenant.into(),
            nodes: BTreeSet::new(),
            parents: HashMap::new(),
            children: HashMap::new(),
        }
    }

    /// Build a graph from a raw edge list
    ///
    /// Self-loops are dropped and duplicate edges collapsed. A cycle in the
    /// input is logged; queries still terminate.
    pub fn from_relationships<I>(kind: HierarchyKind, tenant: impl Into<TenantId>, edges: I) -> Self
    where
        I: IntoIterator<Item = Relationship>,
    {
        let mut graph = Self::new(kind, tenant);

        for edge in edges {
            if edge.child == edge.parent {
                warn!(kind = %kind, node = %edge.child, "Skipping self-referencing edge");
                continue;
            }
            if !graph.insert_edge(&edge.child, &edge.parent) {
                debug!(kind = %kind, child = %edge.child, parent = %edge.parent, "Duplicate edge collapsed");
            }
        }

        if let Some(cycle) = graph.detect_cycle() {
            warn!(
                kind = %kind,
                tenant = %graph.tenant,
                cycle = %cycle.join(" -> "),
                "Hierarchy edge list contains a cycle"
            );
        }

        graph
    }

    /// Convenience constructor from `(child, parent)` pairs
    pub fn from_edges<'a, I>(kind: HierarchyKind, tenant: impl Into<TenantId>, edges: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self::from_relationships(
            kind,
            tenant,
            edges
                .into_iter()
                .map(|(child, parent)| Relationship::new(child, parent)),
        )
    }

    /// Add a node with no edges
    pub fn with_node(mut self, name: impl Into<String>) -> Self {
        self.nodes.insert(name.into());
        self
    }

    /// Insert an edge; returns false if it already existed
    fn insert_edge(&mut self, child: &str, parent: &str) -> bool {
        self.nodes.insert(child.to_string());
        self.nodes.insert(parent.to_string());

        let added = self
            .parents
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string());
        self.children
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());

        added
    }

    pub fn kind(&self) -> HierarchyKind {
        self.kind
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    /// Node names in sorted order
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.parents.values().map(BTreeSet::len).sum()
    }

    /// True if the direct edge `child -> parent` exists
    pub fn has_edge(&self, child: &str, parent: &str) -> bool {
        self.parents
            .get(child)
            .is_some_and(|parents| parents.contains(parent))
    }

    /// All edges, sorted
    pub fn relationships(&self) -> Vec<Relationship> {
        let mut edges: Vec<Relationship> = self
            .parents
            .iter()
            .flat_map(|(child, parents)| {
                parents
                    .iter()
                    .map(move |parent| Relationship::new(child.clone(), parent.clone()))
            })
            .collect();
        edges.sort();
        edges
    }

    /// Direct parents of `name`
    pub fn parents(&self, name: &str) -> HashSet<String> {
        Self::neighbours(&self.parents, name)
    }

    /// Direct children of `name`
    pub fn children(&self, name: &str) -> HashSet<String> {
        Self::neighbours(&self.children, name)
    }

    pub fn num_children(&self, name: &str) -> usize {
        self.children.get(name).map_or(0, BTreeSet::len)
    }

    fn neighbours(edges: &HashMap<String, BTreeSet<String>>, name: &str) -> HashSet<String> {
        edges
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Transitive parents of `name`, excluding `name`
    pub fn ascendants(&self, name: &str) -> HashSet<String> {
        Self::closure(&self.parents, std::iter::once(name), false)
    }

    /// Transitive children of `name`, excluding `name`
    pub fn descendants(&self, name: &str) -> HashSet<String> {
        Self::closure(&self.children, std::iter::once(name), false)
    }

    /// `names` plus all their ascendants
    pub fn ascendants_of_all<'a, I>(&self, names: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::closure(&self.parents, names, true)
    }

    /// `names` plus all their descendants
    pub fn descendants_of_all<'a, I>(&self, names: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::closure(&self.children, names, true)
    }

    /// True if `candidate` is reachable from `name` following child -> parent edges
    pub fn is_ascendant(&self, name: &str, candidate: &str) -> bool {
        Self::reaches(&self.parents, name, candidate)
    }

    /// True if `candidate` is reachable from `name` following parent -> child edges
    pub fn is_descendant(&self, name: &str, candidate: &str) -> bool {
        Self::reaches(&self.children, name, candidate)
    }

    /// Breadth-first closure over `edges`
    fn closure<'a, I>(
        edges: &HashMap<String, BTreeSet<String>>,
        starts: I,
        include_starts: bool,
    ) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut starts_seen: Vec<&str> = Vec::new();

        for start in starts {
            starts_seen.push(start);
            queue.push_back(start);
        }

        while let Some(current) = queue.pop_front() {
            if let Some(next) = edges.get(current) {
                for node in next {
                    if visited.insert(node.clone()) {
                        queue.push_back(node.as_str());
                    }
                }
            }
        }

        if include_starts {
            visited.extend(starts_seen.into_iter().map(str::to_string));
        } else {
            // A corrupt graph may lead back to the start
            for start in starts_seen {
                visited.remove(start);
            }
        }

        visited
    }

    /// Breadth-first reachability with early exit
    fn reaches(edges: &HashMap<String, BTreeSet<String>>, from: &str, target: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            let Some(next) = edges.get(current) else {
                continue;
            };
            for node in next {
                if node == target {
                    return true;
                }
                if visited.insert(node.as_str()) {
                    queue.push_back(node.as_str());
                }
            }
        }

        false
    }

    /// Check a proposed relationship change is legal
    ///
    /// Fails if `child == parent`. With `must_exist`, fails unless `parent`
    /// is already an ascendant of `child`; without it, fails if it already is.
    pub fn validate_relationship(&self, child: &str, parent: &str, must_exist: bool) -> Result<()> {
        if child == parent {
            return Err(RbacError::RelationshipViolation {
                child: child.to_string(),
                parent: parent.to_string(),
                reason: "child and parent are the same node".to_string(),
            });
        }

        let related = self.is_ascendant(child, parent);
        match (must_exist, related) {
            (true, false) => Err(RbacError::RelationshipViolation {
                child: child.to_string(),
                parent: parent.to_string(),
                reason: format!("no {} relationship exists", self.kind),
            }),
            (false, true) => Err(RbacError::RelationshipViolation {
                child: child.to_string(),
                parent: parent.to_string(),
                reason: format!("{} relationship already exists", self.kind),
            }),
            _ => Ok(()),
        }
    }

    /// New graph with `child -> parent` added
    ///
    /// Fails with [`RbacError::Cycle`] if `child` is already an ascendant of
    /// `parent`. Adding an existing edge returns an identical graph.
    pub fn with_added_edge(&self, child: &str, parent: &str) -> Result<HierarchyGraph> {
        if child == parent || self.is_descendant(child, parent) {
            return Err(RbacError::Cycle {
                child: child.to_string(),
                parent: parent.to_string(),
            });
        }

        let mut graph = self.clone();
        graph.insert_edge(child, parent);
        Ok(graph)
    }

    /// New graph with the direct edge `child -> parent` removed
    pub fn with_removed_edge(&self, child: &str, parent: &str) -> Result<HierarchyGraph> {
        if !self.has_edge(child, parent) {
            return Err(RbacError::RelationshipViolation {
                child: child.to_string(),
                parent: parent.to_string(),
                reason: format!("no direct {} edge to remove", self.kind),
            });
        }

        let mut graph = self.clone();
        if let Some(parents) = graph.parents.get_mut(child) {
            parents.remove(parent);
            if parents.is_empty() {
                graph.parents.remove(child);
            }
        }
        if let Some(children) = graph.children.get_mut(parent) {
            children.remove(child);
            if children.is_empty() {
                graph.children.remove(parent);
            }
        }
        Ok(graph)
    }

    /// Find one cycle, if any, as a path that starts and ends on the same node
    ///
    /// Depth-first search with three colours: unvisited, on the current
    /// path, finished. Reaching a node on the current path closes a cycle.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            OnPath,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();

        for start in &self.nodes {
            if marks.contains_key(start.as_str()) {
                continue;
            }

            // Explicit stack of (node, remaining parents) to avoid recursion
            let mut path: Vec<&str> = vec![start.as_str()];
            let mut stack: Vec<Vec<&str>> = vec![self.parent_list(start)];
            marks.insert(start.as_str(), Mark::OnPath);

            while let Some(pending) = stack.last_mut() {
                match pending.pop() {
                    Some(next) => match marks.get(next) {
                        Some(Mark::OnPath) => {
                            let begin = path.iter().position(|n| *n == next).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[begin..].iter().map(|n| n.to_string()).collect();
                            cycle.push(next.to_string());
                            return Some(cycle);
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(next, Mark::OnPath);
                            path.push(next);
                            stack.push(self.parent_list(next));
                        }
                    },
                    None => {
                        stack.pop();
                        if let Some(done) = path.pop() {
                            marks.insert(done, Mark::Done);
                        }
                    }
                }
            }
        }

        None
    }

    fn parent_list(&self, name: &str) -> Vec<&str> {
        self.parents
            .get(name)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
