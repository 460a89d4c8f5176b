//! Table queries, materialization snapshots, and the executor seam

use crate::error::{CaveResult, ValidationError};
use crate::filter::QueryFilters;
use crate::ids::{is_root_column, supervoxel_column_for};
use crate::table::Table;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A query against one annotation table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQuery {
    pub table: String,
    #[serde(default)]
    pub filters: QueryFilters,
    /// Columns to return; `None` returns all
    #[serde(default)]
    pub select_columns: Option<Vec<String>>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    /// Voxel resolution (nm) the positions should be expressed in
    #[serde(default)]
    pub desired_resolution: Option<[f64; 3]>,
    /// Keep `_x`/`_y`/`_z` position columns separate
    #[serde(default)]
    pub split_positions: bool,
}

impl TableQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: QueryFilters::default(),
            select_columns: None,
            offset: None,
            limit: None,
            desired_resolution: None,
            split_positions: false,
        }
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn select(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.select_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn desired_resolution(mut self, resolution: [f64; 3]) -> Self {
        self.desired_resolution = Some(resolution);
        self
    }

    pub fn split_positions(mut self, split: bool) -> Self {
        self.split_positions = split;
        self
    }

    /// Check that every selected root column can be remapped.
    ///
    /// A root ID can only be brought forward in time through its supervoxel,
    /// so selecting `pt_root_id` requires `pt_supervoxel_id` as well.
    pub fn check_remappable(&self) -> Result<(), ValidationError> {
        let Some(columns) = &self.select_columns else {
            return Ok(());
        };
        for column in columns.iter().filter(|c| is_root_column(c)) {
            let partner = supervoxel_column_for(column);
            if !partner.is_some_and(|sv| columns.contains(&sv)) {
                return Err(ValidationError::RootWithoutSupervoxel(column.clone()));
            }
        }
        Ok(())
    }
}

/// A materialized version of the datastack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(version: u32, timestamp: DateTime<Utc>) -> Self {
        Self { version, timestamp }
    }
}

/// Runs a table query against a materialized snapshot
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Return the rows of `query.table` at `snapshot` matching `query`.
    ///
    /// An include filter of `OneOf([])` matches no rows.
    async fn execute(&self, query: &TableQuery, snapshot: &Snapshot) -> CaveResult<Table>;
}
