//! Lineage oracle trait: the contract a chunkedgraph backend implements

use crate::error::CaveResult;
use crate::ids::{RootId, SupervoxelId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Related root IDs across a time interval.
///
/// `past_id_map` maps each queried root to the roots valid at the past
/// timestamp that share its lineage; `future_id_map` goes the other way.
/// An empty list means the lineage could not be traced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PastIdMapping {
    pub past_id_map: BTreeMap<RootId, Vec<RootId>>,
    pub future_id_map: BTreeMap<RootId, Vec<RootId>>,
}

impl PastIdMapping {
    /// Ancestors of `id` valid at the past timestamp (empty if unknown)
    pub fn past_of(&self, id: RootId) -> &[RootId] {
        self.past_id_map.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Answers questions about root-ID validity and history.
///
/// Every method is batched: callers pass all IDs at once and get parallel
/// results back, so the number of remote calls does not grow with the
/// number of IDs.
#[async_trait]
pub trait LineageOracle: Send + Sync {
    /// Whether each root has no successor as of `at`
    async fn is_latest(&self, ids: &[RootId], at: DateTime<Utc>) -> CaveResult<Vec<bool>>;

    /// Creation time of each root
    async fn created_at(&self, ids: &[RootId]) -> CaveResult<Vec<DateTime<Utc>>>;

    /// Roots valid at `past` related to each root valid at `future`
    async fn past_ids(
        &self,
        ids: &[RootId],
        past: DateTime<Utc>,
        future: DateTime<Utc>,
    ) -> CaveResult<PastIdMapping>;

    /// Root owning each supervoxel at `at`
    async fn owning_root(
        &self,
        supervoxels: &[SupervoxelId],
        at: DateTime<Utc>,
    ) -> CaveResult<Vec<RootId>>;
}
