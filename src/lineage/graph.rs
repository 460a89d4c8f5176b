//! Lineage graphs in node-link form
//!
//! The chunkedgraph describes the edit history of one or more objects as a
//! directed graph: each node is a root ID stamped with the time it was
//! created, each link runs from a retired root to a successor.

use crate::ids::RootId;
use crate::timestamp::from_unix_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A root ID in the lineage graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageNode {
    pub id: RootId,
    /// Creation time in Unix seconds
    #[serde(default)]
    pub timestamp: Option<f64>,
    /// Edit that produced this root
    #[serde(default)]
    pub operation_id: Option<u64>,
}

impl LineageNode {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(from_unix_seconds)
    }
}

/// Directed edge from a retired root to its successor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageLink {
    pub source: RootId,
    pub target: RootId,
}

/// Edit history of a set of roots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageGraph {
    #[serde(default = "default_directed")]
    pub directed: bool,
    #[serde(default)]
    pub multigraph: bool,
    pub nodes: Vec<LineageNode>,
    pub links: Vec<LineageLink>,
}

fn default_directed() -> bool {
    true
}

impl LineageGraph {
    pub fn node(&self, id: RootId) -> Option<&LineageNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Successor roots of `id`
    pub fn successors(&self, id: RootId) -> Vec<RootId> {
        let mut out: Vec<RootId> = self
            .links
            .iter()
            .filter(|l| l.source == id)
            .map(|l| l.target)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Predecessor roots of `id`
    pub fn predecessors(&self, id: RootId) -> Vec<RootId> {
        let mut out: Vec<RootId> = self
            .links
            .iter()
            .filter(|l| l.target == id)
            .map(|l| l.source)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Roots with no successor in the graph (the latest state)
    pub fn leaves(&self) -> Vec<RootId> {
        let sources: BTreeSet<RootId> = self.links.iter().map(|l| l.source).collect();
        self.sorted_ids().into_iter().filter(|id| !sources.contains(id)).collect()
    }

    /// Roots with no predecessor in the graph (the earliest state)
    pub fn sources(&self) -> Vec<RootId> {
        let targets: BTreeSet<RootId> = self.links.iter().map(|l| l.target).collect();
        self.sorted_ids().into_iter().filter(|id| !targets.contains(id)).collect()
    }

    /// Drop nodes created before `past` or after `future`, along with any
    /// links that touch them. Nodes without a timestamp are kept.
    pub fn clip(&mut self, past: Option<DateTime<Utc>>, future: Option<DateTime<Utc>>) {
        let dropped: BTreeSet<RootId> = self
            .nodes
            .iter()
            .filter(|n| match n.created_at() {
                Some(ts) => past.is_some_and(|p| ts < p) || future.is_some_and(|f| ts > f),
                None => false,
            })
            .map(|n| n.id)
            .collect();
        if dropped.is_empty() {
            return;
        }
        self.nodes.retain(|n| !dropped.contains(&n.id));
        self.links
            .retain(|l| !dropped.contains(&l.source) && !dropped.contains(&l.target));
    }

    /// In/out degree per node
    pub fn degrees(&self) -> BTreeMap<RootId, (usize, usize)> {
        let mut degrees: BTreeMap<RootId, (usize, usize)> =
            self.nodes.iter().map(|n| (n.id, (0, 0))).collect();
        for link in &self.links {
            degrees.entry(link.target).or_default().0 += 1;
            degrees.entry(link.source).or_default().1 += 1;
        }
        degrees
    }

    fn sorted_ids(&self) -> Vec<RootId> {
        let ids: BTreeSet<RootId> = self.nodes.iter().map(|n| n.id).collect();
        ids.into_iter().collect()
    }
}
