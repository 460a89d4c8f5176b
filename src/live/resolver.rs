//! Root-ID time travel
//!
//! A query posed at `timestamp_future` names root IDs that may not have
//! existed when the snapshot at `timestamp_past` was materialized. The
//! resolver rewrites the filters onto the ancestors of those roots, runs the
//! query against the snapshot, then brings every returned root ID forward to
//! `timestamp_future` through its supervoxel.

use super::query::{QueryExecutor, Snapshot, TableQuery};
use crate::error::{CaveError, CaveResult, ValidationError};
use crate::filter::{FilterValue, QueryFilters};
use crate::ids::{is_root_column, RootId, SupervoxelId};
use crate::lineage::{LineageOracle, PastIdMapping};
use crate::table::{CellValue, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Filters rewritten onto the past, with the lineage used to do it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedFilters {
    pub filters: QueryFilters,
    pub mapping: PastIdMapping,
}

/// Outcome of a live query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Rows with root IDs valid at the query time
    pub table: Table,
    /// Filters actually sent to the snapshot
    pub past_filters: QueryFilters,
    pub past_id_map: BTreeMap<RootId, Vec<RootId>>,
    pub future_id_map: BTreeMap<RootId, Vec<RootId>>,
    pub snapshot: Snapshot,
}

/// Rewrites queries across time using a lineage oracle
#[derive(Clone)]
pub struct RootIdResolver {
    oracle: Arc<dyn LineageOracle>,
}

impl RootIdResolver {
    pub fn new(oracle: Arc<dyn LineageOracle>) -> Self {
        Self { oracle }
    }

    /// Rewrite root-ID filters valid at `future` onto their ancestors at `past`.
    ///
    /// Every referenced root must be latest at `future` and created before
    /// it. When the two timestamps coincide the filters come back unchanged
    /// and the oracle is not consulted.
    pub async fn map_filters(
        &self,
        filters: &QueryFilters,
        past: DateTime<Utc>,
        future: DateTime<Utc>,
    ) -> CaveResult<MappedFilters> {
        check_order(past, future)?;
        if past == future {
            return Ok(MappedFilters {
                filters: filters.clone(),
                mapping: PastIdMapping::default(),
            });
        }

        let ids: Vec<RootId> = filters
            .root_ids()?
            .into_iter()
            .filter(|id| !id.is_sentinel())
            .collect();

        let mapping = if ids.is_empty() {
            PastIdMapping::default()
        } else {
            self.check_valid_at(&ids, future).await?;
            debug!(count = ids.len(), "looking up past root ids");
            self.oracle.past_ids(&ids, past, future).await?
        };

        Ok(MappedFilters {
            filters: rewrite(filters, &mapping),
            mapping,
        })
    }

    /// Fail unless every root is latest at `at` and was created before it
    async fn check_valid_at(&self, ids: &[RootId], at: DateTime<Utc>) -> CaveResult<()> {
        let latest = self.oracle.is_latest(ids, at).await?;
        let created = self.oracle.created_at(ids).await?;
        expect_len("is_latest", ids.len(), latest.len())?;
        expect_len("created_at", ids.len(), created.len())?;

        let mut expired = Vec::new();
        let mut too_recent = Vec::new();
        for ((id, is_latest), created_at) in ids.iter().zip(latest).zip(created) {
            if !is_latest {
                expired.push(*id);
            }
            if created_at >= at {
                too_recent.push(*id);
            }
        }
        if expired.is_empty() && too_recent.is_empty() {
            return Ok(());
        }
        Err(ValidationError::IncompatibleRoots { expired, too_recent }.into())
    }

    /// Bring every root-ID column with a supervoxel partner forward to `at`.
    ///
    /// One `is_latest` call covers the distinct stored roots, one
    /// `owning_root` call covers the supervoxels of all stale rows. Returns
    /// the number of cells rewritten.
    pub async fn update_root_ids(&self, table: &mut Table, at: DateTime<Utc>) -> CaveResult<usize> {
        let pairs = table.id_column_pairs();
        if pairs.is_empty() || table.is_empty() {
            return Ok(0);
        }

        let stored: BTreeSet<RootId> = pairs
            .iter()
            .flat_map(|(_, root_col)| table.column_values(root_col))
            .filter_map(CellValue::as_u64)
            .map(RootId::new)
            .filter(|id| !id.is_sentinel())
            .collect();
        if stored.is_empty() {
            return Ok(0);
        }
        let stored: Vec<RootId> = stored.into_iter().collect();
        let latest = self.oracle.is_latest(&stored, at).await?;
        expect_len("is_latest", stored.len(), latest.len())?;
        let stale: BTreeSet<RootId> = stored
            .iter()
            .zip(latest)
            .filter(|(_, is_latest)| !is_latest)
            .map(|(id, _)| *id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        // (row, root column, supervoxel) for every stale cell
        let mut targets: Vec<(usize, &str, SupervoxelId)> = Vec::new();
        let mut unresolved = 0;
        for (index, row) in table.rows().iter().enumerate() {
            for (sv_col, root_col) in &pairs {
                let root = row.get(root_col).and_then(CellValue::as_u64).map(RootId::new);
                if !root.is_some_and(|r| stale.contains(&r)) {
                    continue;
                }
                match row.get(sv_col).and_then(CellValue::as_u64) {
                    Some(sv) => targets.push((index, root_col.as_str(), SupervoxelId::new(sv))),
                    None => unresolved += 1,
                }
            }
        }
        if unresolved > 0 {
            warn!(cells = unresolved, "expired root ids without a supervoxel were left as stored");
        }

        let supervoxels: Vec<SupervoxelId> = targets
            .iter()
            .map(|(_, _, sv)| *sv)
            .filter(|sv| !sv.is_sentinel())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut owners: BTreeMap<SupervoxelId, RootId> = BTreeMap::new();
        if !supervoxels.is_empty() {
            debug!(stale = stale.len(), supervoxels = supervoxels.len(), "remapping stale roots");
            let roots = self.oracle.owning_root(&supervoxels, at).await?;
            expect_len("owning_root", supervoxels.len(), roots.len())?;
            owners.extend(supervoxels.into_iter().zip(roots));
        }

        let updates: Vec<(usize, String, RootId)> = targets
            .into_iter()
            .map(|(index, root_col, sv)| {
                let root = owners.get(&sv).copied().unwrap_or(RootId::SENTINEL);
                (index, root_col.to_string(), root)
            })
            .collect();
        let rows = table.rows_mut();
        for (index, root_col, root) in &updates {
            rows[*index].insert(root_col.clone(), CellValue::from(*root));
        }
        Ok(updates.len())
    }

    /// Drop rows whose root-ID columns hold an excluded root.
    ///
    /// Root exclusions are not sent to the snapshot, so this runs after
    /// remapping whether or not the query is post-filtered.
    pub fn apply_root_exclusions(table: &mut Table, filters: &QueryFilters) {
        let excluded: Vec<(&String, &Vec<CellValue>)> = filters
            .exclude
            .iter()
            .filter(|(column, _)| is_root_column(column))
            .collect();
        if excluded.is_empty() {
            return;
        }
        let null = CellValue::Null;
        let before = table.len();
        table.retain(|row| {
            !excluded
                .iter()
                .any(|(column, values)| values.contains(row.get(*column).unwrap_or(&null)))
        });
        debug!(dropped = before - table.len(), "applied root-id exclusions");
    }

    /// Drop rows that fail the include/exclude predicates of `filters`
    pub fn post_filter(table: &mut Table, filters: &QueryFilters) {
        let before = table.len();
        table.retain(|row| filters.matches_row(row));
        debug!(dropped = before - table.len(), "post-filtered rows");
    }

    /// Answer `query` as of `timestamp` using the materialized `snapshot`.
    ///
    /// Filters are mapped onto the snapshot's time, the query runs through
    /// `executor`, stale roots are brought forward, and with `post_filter`
    /// the rows are checked against the original filters.
    pub async fn resolve(
        &self,
        executor: &dyn QueryExecutor,
        query: &TableQuery,
        snapshot: &Snapshot,
        timestamp: DateTime<Utc>,
        post_filter: bool,
    ) -> CaveResult<Resolution> {
        check_order(snapshot.timestamp, timestamp)?;
        if snapshot.timestamp == timestamp {
            let table = executor.execute(query, snapshot).await?;
            return Ok(Resolution {
                table,
                past_filters: query.filters.clone(),
                past_id_map: BTreeMap::new(),
                future_id_map: BTreeMap::new(),
                snapshot: *snapshot,
            });
        }

        query.check_remappable()?;
        let mapped = self.map_filters(&query.filters, snapshot.timestamp, timestamp).await?;
        let past_query = TableQuery {
            filters: mapped.filters.clone(),
            ..query.clone()
        };
        let mut table = executor.execute(&past_query, snapshot).await?;
        let updated = self.update_root_ids(&mut table, timestamp).await?;
        Self::apply_root_exclusions(&mut table, &query.filters);
        if post_filter {
            Self::post_filter(&mut table, &query.filters);
        }
        info!(
            table = %query.table,
            version = snapshot.version,
            rows = table.len(),
            updated,
            "resolved live query"
        );

        Ok(Resolution {
            table,
            past_filters: mapped.filters,
            past_id_map: mapped.mapping.past_id_map,
            future_id_map: mapped.mapping.future_id_map,
            snapshot: *snapshot,
        })
    }
}

fn check_order(past: DateTime<Utc>, future: DateTime<Utc>) -> Result<(), ValidationError> {
    if past > future {
        return Err(ValidationError::TimestampOrder { past, future });
    }
    Ok(())
}

fn expect_len(op: &str, expected: usize, got: usize) -> CaveResult<()> {
    if expected != got {
        return Err(CaveError::Decode(format!(
            "{op} returned {got} results for {expected} ids"
        )));
    }
    Ok(())
}

/// Apply the ancestor mapping to every root-ID column filter.
///
/// Inclusions widen to the union of ancestors. An ancestor may have been
/// split, so excluding it would also drop rows now owned by a sibling;
/// root exclusions keep only the sentinel and are otherwise enforced after
/// remapping.
fn rewrite(filters: &QueryFilters, mapping: &PastIdMapping) -> QueryFilters {
    let mut out = filters.clone();
    for (column, value) in out.include.iter_mut() {
        if is_root_column(column) {
            *value = FilterValue::OneOf(ancestors(value.values(), mapping));
        }
    }
    out.exclude.retain(|column, values| {
        if !is_root_column(column) {
            return true;
        }
        values.retain(|v| v.as_u64().is_some_and(|id| RootId::new(id).is_sentinel()));
        !values.is_empty()
    });
    out
}

/// Sorted, de-duplicated union of the ancestors of `values`.
///
/// The sentinel maps to itself; a root with no known ancestors contributes
/// nothing.
fn ancestors(values: &[CellValue], mapping: &PastIdMapping) -> Vec<CellValue> {
    let mut union = BTreeSet::new();
    for id in values.iter().filter_map(CellValue::as_u64).map(RootId::new) {
        if id.is_sentinel() {
            union.insert(id);
        } else {
            union.extend(mapping.past_of(id).iter().copied());
        }
    }
    union.into_iter().map(CellValue::from).collect()
}
