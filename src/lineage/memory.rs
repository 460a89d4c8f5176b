//! In-process lineage oracle
//!
//! Models a chunkedgraph's edit history directly: roots are created and
//! retired by merges and splits, supervoxels move between roots. Every call is
//! recorded so tests can check batching and sentinel handling.

use super::traits::{LineageOracle, PastIdMapping};
use crate::error::{CaveError, CaveResult};
use crate::ids::{RootId, SupervoxelId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

/// Which oracle operation a call or injected failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineageOp {
    IsLatest,
    CreatedAt,
    PastIds,
    OwningRoot,
}

/// Arguments of every call made against an [`InMemoryLineage`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallLog {
    pub is_latest: Vec<Vec<RootId>>,
    pub created_at: Vec<Vec<RootId>>,
    pub past_ids: Vec<Vec<RootId>>,
    pub owning_root: Vec<Vec<SupervoxelId>>,
}

impl CallLog {
    pub fn total(&self) -> usize {
        self.is_latest.len() + self.created_at.len() + self.past_ids.len() + self.owning_root.len()
    }

    /// Whether any call carried the `0` sentinel
    pub fn saw_sentinel(&self) -> bool {
        let roots = self
            .is_latest
            .iter()
            .chain(&self.created_at)
            .chain(&self.past_ids)
            .flatten()
            .any(|id| id.is_sentinel());
        let svs = self.owning_root.iter().flatten().any(|id| id.is_sentinel());
        roots || svs
    }
}

#[derive(Debug, Clone)]
struct RootRecord {
    created_at: DateTime<Utc>,
    retired_at: Option<DateTime<Utc>>,
    parents: Vec<RootId>,
    children: Vec<RootId>,
    members: BTreeSet<SupervoxelId>,
}

impl RootRecord {
    fn valid_at(&self, ts: DateTime<Utc>) -> bool {
        self.created_at <= ts && self.retired_at.map_or(true, |r| ts < r)
    }
}

/// Deterministic lineage oracle backed by an explicit edit history
#[derive(Debug, Default)]
pub struct InMemoryLineage {
    roots: BTreeMap<RootId, RootRecord>,
    /// Ownership history per supervoxel, ordered by time
    assignments: BTreeMap<SupervoxelId, Vec<(DateTime<Utc>, RootId)>>,
    failing: Option<LineageOp>,
    calls: Mutex<CallLog>,
}

impl InMemoryLineage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root created at `at` containing `supervoxels`
    pub fn with_root(mut self, id: u64, at: DateTime<Utc>, supervoxels: &[u64]) -> Self {
        let members: BTreeSet<SupervoxelId> =
            supervoxels.iter().copied().map(SupervoxelId::new).collect();
        self.create(RootId::new(id), at, Vec::new(), members);
        self
    }

    /// Merge `parents` into a new root `child` at `at`
    pub fn with_merge(mut self, parents: &[u64], child: u64, at: DateTime<Utc>) -> Self {
        let parents: Vec<RootId> = parents.iter().copied().map(RootId::new).collect();
        let mut members = BTreeSet::new();
        for parent in &parents {
            if let Some(record) = self.roots.get(parent) {
                members.extend(record.members.iter().copied());
            }
        }
        self.retire(&parents, at);
        self.create(RootId::new(child), at, parents, members);
        self
    }

    /// Split `parent` at `at` into children owning the listed supervoxels
    pub fn with_split(mut self, parent: u64, children: &[(u64, &[u64])], at: DateTime<Utc>) -> Self {
        let parent = RootId::new(parent);
        self.retire(&[parent], at);
        for (child, supervoxels) in children {
            let members = supervoxels.iter().copied().map(SupervoxelId::new).collect();
            self.create(RootId::new(*child), at, vec![parent], members);
        }
        self
    }

    /// Make every call of `op` fail with a server error
    pub fn with_failure(mut self, op: LineageOp) -> Self {
        self.failing = Some(op);
        self
    }

    /// Snapshot of the calls made so far
    pub fn calls(&self) -> CallLog {
        self.calls.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn create(
        &mut self,
        id: RootId,
        at: DateTime<Utc>,
        parents: Vec<RootId>,
        members: BTreeSet<SupervoxelId>,
    ) {
        for parent in &parents {
            if let Some(record) = self.roots.get_mut(parent) {
                record.children.push(id);
            }
        }
        for sv in &members {
            self.assignments.entry(*sv).or_default().push((at, id));
        }
        self.roots.insert(
            id,
            RootRecord {
                created_at: at,
                retired_at: None,
                parents,
                children: Vec::new(),
                members,
            },
        );
    }

    fn retire(&mut self, ids: &[RootId], at: DateTime<Utc>) {
        for id in ids {
            if let Some(record) = self.roots.get_mut(id) {
                record.retired_at = Some(at);
            }
        }
    }

    fn record(&self, op: LineageOp, apply: impl FnOnce(&mut CallLog)) -> CaveResult<()> {
        if let Ok(mut log) = self.calls.lock() {
            apply(&mut log);
        }
        if self.failing == Some(op) {
            return Err(CaveError::ServerError {
                status: 500,
                url: format!("memory://{op:?}"),
                message: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn lookup(&self, id: RootId) -> CaveResult<&RootRecord> {
        self.roots.get(&id).ok_or_else(|| CaveError::NotFound {
            url: format!("memory://root/{id}"),
        })
    }

    /// Walk the lineage from `id` in one direction, collecting the first
    /// roots valid at `ts` on every path.
    fn related_at(&self, id: RootId, ts: DateTime<Utc>, backwards: bool) -> Vec<RootId> {
        let mut found = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            let Some(record) = self.roots.get(&current) else {
                continue;
            };
            if record.valid_at(ts) {
                found.insert(current);
                continue;
            }
            let next = if backwards { &record.parents } else { &record.children };
            queue.extend(next.iter().copied());
        }
        found.into_iter().collect()
    }
}

#[async_trait]
impl LineageOracle for InMemoryLineage {
    async fn is_latest(&self, ids: &[RootId], at: DateTime<Utc>) -> CaveResult<Vec<bool>> {
        self.record(LineageOp::IsLatest, |log| log.is_latest.push(ids.to_vec()))?;
        Ok(ids
            .iter()
            .map(|id| {
                self.roots
                    .get(id)
                    .is_some_and(|r| r.retired_at.map_or(true, |retired| at < retired))
            })
            .collect())
    }

    async fn created_at(&self, ids: &[RootId]) -> CaveResult<Vec<DateTime<Utc>>> {
        self.record(LineageOp::CreatedAt, |log| log.created_at.push(ids.to_vec()))?;
        ids.iter()
            .map(|id| self.lookup(*id).map(|r| r.created_at))
            .collect()
    }

    async fn past_ids(
        &self,
        ids: &[RootId],
        past: DateTime<Utc>,
        future: DateTime<Utc>,
    ) -> CaveResult<PastIdMapping> {
        self.record(LineageOp::PastIds, |log| log.past_ids.push(ids.to_vec()))?;
        let mut mapping = PastIdMapping::default();
        for id in ids {
            mapping.past_id_map.insert(*id, self.related_at(*id, past, true));
            mapping.future_id_map.insert(*id, self.related_at(*id, future, false));
        }
        Ok(mapping)
    }

    async fn owning_root(
        &self,
        supervoxels: &[SupervoxelId],
        at: DateTime<Utc>,
    ) -> CaveResult<Vec<RootId>> {
        self.record(LineageOp::OwningRoot, |log| log.owning_root.push(supervoxels.to_vec()))?;
        supervoxels
            .iter()
            .map(|sv| {
                if sv.is_sentinel() {
                    return Ok(RootId::SENTINEL);
                }
                self.assignments
                    .get(sv)
                    .and_then(|history| history.iter().rev().find(|(ts, _)| *ts <= at))
                    .map(|(_, root)| *root)
                    .ok_or_else(|| CaveError::NotFound {
                        url: format!("memory://supervoxel/{sv}"),
                    })
            })
            .collect()
    }
}
