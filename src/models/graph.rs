//! Static dependency graph between collection kinds.
//!
//! A successful mutation on a source kind invalidates every declared target
//! kind for the same project scope. The table is built once at startup and
//! never mutated at runtime, so invalidation is centrally specified instead
//! of scattered across view code.

use std::collections::{BTreeSet, HashMap};

use super::CollectionKind;

/// Declared invalidation edges: `source kind -> set of target kinds`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<CollectionKind, BTreeSet<CollectionKind>>,
}

impl DependencyGraph {
    /// Create an empty graph (no invalidation cascades).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: declare that a successful mutation on `source` invalidates
    /// `target`. Duplicate declarations are a no-op.
    pub fn with_edge(mut self, source: CollectionKind, target: CollectionKind) -> Self {
        self.edges.entry(source).or_default().insert(target);
        self
    }

    /// The edge table for the project-management domain:
    ///
    /// | source | invalidates |
    /// |---|---|
    /// | tasks | milestones (same project) |
    /// | roles | project (team view) |
    ///
    /// Messages, comments, and milestones are terminal.
    pub fn project_defaults() -> Self {
        Self::new()
            .with_edge(CollectionKind::Tasks, CollectionKind::Milestones)
            .with_edge(CollectionKind::Roles, CollectionKind::Project)
    }

    /// Target kinds invalidated by a successful mutation on `source`.
    ///
    /// Returned in a stable order so dependent re-fetches are deterministic.
    pub fn edges_from(&self, source: CollectionKind) -> impl Iterator<Item = CollectionKind> + '_ {
        self.edges.get(&source).into_iter().flatten().copied()
    }

    /// Check whether `source` invalidates `target`.
    pub fn invalidates(&self, source: CollectionKind, target: CollectionKind) -> bool {
        self.edges
            .get(&source)
            .is_some_and(|targets| targets.contains(&target))
    }

    /// Total number of declared edges.
    pub fn len(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Check whether the graph declares no edges at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
