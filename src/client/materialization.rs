//! Materialization engine client
//!
//! Serves frozen snapshots of annotation tables. Queries at an arbitrary
//! time go through [`MaterializationClient::live_query`], which picks the
//! closest earlier snapshot and lets the [`RootIdResolver`] bridge the gap.

use super::endpoints::{MaterializationEndpoints, MATERIALIZATION_VERSIONS};
use super::session::Session;
use crate::cache::{TtlCache, DEFAULT_TTL};
use crate::error::{CaveError, CaveResult, ValidationError};
use crate::filter::{BoundingBox, FilterValue, QueryFilters};
use crate::lineage::LineageOracle;
use crate::live::{QueryExecutor, Resolution, RootIdResolver, Snapshot, TableQuery};
use crate::table::{concatenate_positions, scale_positions, CellValue, Table};
use crate::timestamp::service_format;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Response header set when the server already rescaled positions
const DATAFRAME_RESOLUTION_HEADER: &str = "dataframe_resolution";

/// Metadata of one materialized version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub version: u32,
    /// Monotonic row id; orders versions by creation
    pub id: u64,
    #[serde(with = "service_format")]
    pub time_stamp: DateTime<Utc>,
    #[serde(default, with = "service_format::option")]
    pub expires_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub datastack: Option<String>,
}

impl VersionMetadata {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.version, self.time_stamp)
    }
}

/// Metadata of one table at one version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTableMetadata")]
pub struct TableMetadata {
    pub table_name: Option<String>,
    pub schema_type: Option<String>,
    pub description: Option<String>,
    /// Table whose rows this table annotates, if any
    pub reference_table: Option<String>,
    /// Voxel resolution (nm) of stored positions
    pub voxel_resolution: Option<[f64; 3]>,
}

#[derive(Deserialize)]
struct RawTableMetadata {
    #[serde(default)]
    table_name: Option<String>,
    #[serde(default, alias = "schema")]
    schema_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    reference_table: Option<String>,
    #[serde(default)]
    voxel_resolution_x: Option<f64>,
    #[serde(default)]
    voxel_resolution_y: Option<f64>,
    #[serde(default)]
    voxel_resolution_z: Option<f64>,
}

impl From<RawTableMetadata> for TableMetadata {
    fn from(raw: RawTableMetadata) -> Self {
        let voxel_resolution = match (raw.voxel_resolution_x, raw.voxel_resolution_y, raw.voxel_resolution_z) {
            (Some(x), Some(y), Some(z)) => Some([x, y, z]),
            _ => None,
        };
        Self {
            table_name: raw.table_name,
            schema_type: raw.schema_type,
            description: raw.description,
            reference_table: raw.reference_table.filter(|t| !t.is_empty()),
            voxel_resolution,
        }
    }
}

/// Metadata lookups cached per client, keyed on the lookup parameters
#[derive(Debug)]
pub struct MetadataCache {
    /// `(datastack, expired)`
    pub versions: TtlCache<(String, bool), Vec<VersionMetadata>>,
    /// `(datastack, version, table)`
    pub tables: TtlCache<(String, u32, String), TableMetadata>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            versions: TtlCache::new(ttl),
            tables: TtlCache::new(ttl),
        }
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// Request body of a single-table query
#[derive(Debug, Default, Serialize)]
struct QueryBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_in_dict: Option<BTreeMap<&'a str, BTreeMap<&'a str, &'a [CellValue]>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_notin_dict: Option<BTreeMap<&'a str, BTreeMap<&'a str, &'a [CellValue]>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_equal_dict: Option<BTreeMap<&'a str, BTreeMap<&'a str, &'a CellValue>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_spatial_dict: Option<BTreeMap<&'a str, BTreeMap<&'a str, &'a BoundingBox>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_regex_dict: Option<BTreeMap<&'a str, BTreeMap<&'a str, &'a str>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    select_columns: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    desired_resolution: Option<[f64; 3]>,
}

/// Wrap `{column: value}` under the table name, or `None` if empty
fn nested<'a, V>(
    table: &'a str,
    entries: BTreeMap<&'a str, V>,
) -> Option<BTreeMap<&'a str, BTreeMap<&'a str, V>>> {
    if entries.is_empty() {
        None
    } else {
        Some(BTreeMap::from([(table, entries)]))
    }
}

impl<'a> QueryBody<'a> {
    fn new(query: &'a TableQuery) -> Self {
        let table = query.table.as_str();
        let filters: &QueryFilters = &query.filters;
        let mut equal = BTreeMap::new();
        let mut within = BTreeMap::new();
        for (column, value) in &filters.include {
            match value {
                FilterValue::Equals(v) => {
                    equal.insert(column.as_str(), v);
                }
                FilterValue::OneOf(vs) => {
                    within.insert(column.as_str(), vs.as_slice());
                }
            }
        }
        let excluded = filters
            .exclude
            .iter()
            .map(|(c, vs)| (c.as_str(), vs.as_slice()))
            .collect();
        let spatial = filters.spatial.iter().map(|(c, b)| (c.as_str(), b)).collect();
        let regex = filters
            .regex
            .iter()
            .map(|(c, r)| (c.as_str(), r.as_str()))
            .collect();

        Self {
            filter_in_dict: nested(table, within),
            filter_notin_dict: nested(table, excluded),
            filter_equal_dict: nested(table, equal),
            filter_spatial_dict: nested(table, spatial),
            filter_regex_dict: nested(table, regex),
            select_columns: query.select_columns.as_deref(),
            offset: query.offset,
            limit: query.limit,
            desired_resolution: query.desired_resolution,
        }
    }
}

/// Client for one datastack's materialization engine
#[derive(Clone)]
pub struct MaterializationClient {
    session: Session,
    endpoints: MaterializationEndpoints,
    cache: Arc<MetadataCache>,
    lineage: Option<Arc<dyn LineageOracle>>,
}

impl std::fmt::Debug for MaterializationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializationClient")
            .field("endpoints", &self.endpoints)
            .field("has_lineage", &self.lineage.is_some())
            .finish()
    }
}

impl MaterializationClient {
    pub fn new(session: Session, endpoints: MaterializationEndpoints, cache: Arc<MetadataCache>) -> Self {
        Self {
            session,
            endpoints,
            cache,
            lineage: None,
        }
    }

    /// Build a client for `datastack`, negotiating the API version
    pub async fn connect(
        session: Session,
        server: &Url,
        datastack: impl Into<String>,
        cache: Arc<MetadataCache>,
        pinned_version: Option<u32>,
    ) -> CaveResult<Self> {
        let version = session
            .negotiate(
                "materialization",
                MaterializationEndpoints::api_versions(server)?,
                MATERIALIZATION_VERSIONS,
                pinned_version,
            )
            .await?;
        let endpoints = MaterializationEndpoints::new(server, datastack, version);
        debug!(datastack = endpoints.datastack(), version, "materialization client ready");
        Ok(Self::new(session, endpoints, cache))
    }

    /// Use `lineage` to answer live queries
    pub fn with_lineage(mut self, lineage: Arc<dyn LineageOracle>) -> Self {
        self.lineage = Some(lineage);
        self
    }

    pub fn datastack(&self) -> &str {
        self.endpoints.datastack()
    }

    /// Available version numbers
    pub async fn versions(&self, expired: bool) -> CaveResult<Vec<u32>> {
        let request = self
            .session
            .request(Method::GET, self.endpoints.versions()?)
            .query(&[("expired", expired)]);
        self.session.json(request).await
    }

    /// Metadata of every available version, cached
    pub async fn versions_metadata(&self, expired: bool) -> CaveResult<Vec<VersionMetadata>> {
        let key = (self.datastack().to_string(), expired);
        self.cache
            .versions
            .get_or_try_insert_with(key, move || async move {
                let request = self
                    .session
                    .request(Method::GET, self.endpoints.versions_metadata()?)
                    .query(&[("expired", expired)]);
                self.session.json::<Vec<VersionMetadata>>(request).await
            })
            .await
    }

    /// Metadata of `table` at `version`, cached
    pub async fn table_metadata(&self, table: &str, version: u32) -> CaveResult<TableMetadata> {
        let key = (self.datastack().to_string(), version, table.to_string());
        self.cache
            .tables
            .get_or_try_insert_with(key, move || async move {
                let request = self
                    .session
                    .request(Method::GET, self.endpoints.table_metadata(table, version)?);
                self.session.json::<TableMetadata>(request).await
            })
            .await
    }

    /// The most recent snapshot taken at or before `timestamp`
    pub async fn snapshot_at(&self, timestamp: DateTime<Utc>) -> CaveResult<Snapshot> {
        let metadata = self.versions_metadata(false).await?;
        select_snapshot(metadata, timestamp)
    }

    /// Query `table` as materialized at `version`
    pub async fn query_table(&self, query: &TableQuery, version: u32) -> CaveResult<Table> {
        query.filters.validate()?;
        if query.filters.matches_nothing() {
            debug!(table = %query.table, "filter matches nothing; skipping request");
            return Ok(Table::new(query.select_columns.clone().unwrap_or_default()));
        }

        let request = self
            .session
            .request(Method::POST, self.endpoints.simple_query(&query.table, version)?)
            .query(&[
                ("return_pyarrow", false),
                ("arrow_format", false),
                ("split_positions", true),
            ])
            .json(&QueryBody::new(query));
        let response = self.session.send(request).await?;
        let server_scaled = response.headers().contains_key(DATAFRAME_RESOLUTION_HEADER);
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CaveError::Decode(format!("query response: {e}")))?;
        let mut table = Table::from_json(body)?;

        if let Some(desired) = query.desired_resolution {
            if !server_scaled {
                let metadata = self.table_metadata(&query.table, version).await?;
                if let Some(given) = metadata.voxel_resolution {
                    scale_positions(&mut table, given, desired);
                }
            }
        }
        if !query.split_positions {
            concatenate_positions(&mut table);
        }
        debug!(table = %query.table, version, rows = table.len(), "query returned");
        Ok(table)
    }

    /// Answer `query` as of `timestamp`.
    ///
    /// Uses the newest snapshot at or before `timestamp`; an exact match is
    /// queried directly, anything else goes through root-ID time travel.
    pub async fn live_query(
        &self,
        query: &TableQuery,
        timestamp: DateTime<Utc>,
        post_filter: bool,
    ) -> CaveResult<Resolution> {
        let lineage = self.lineage.clone().ok_or_else(|| {
            CaveError::Config("live queries need a chunkedgraph client".to_string())
        })?;
        query.check_remappable()?;
        let snapshot = self.snapshot_at(timestamp).await?;
        info!(
            table = %query.table,
            version = snapshot.version,
            exact = snapshot.timestamp == timestamp,
            "live query"
        );
        RootIdResolver::new(lineage)
            .resolve(self, query, &snapshot, timestamp, post_filter)
            .await
    }
}

#[async_trait]
impl QueryExecutor for MaterializationClient {
    async fn execute(&self, query: &TableQuery, snapshot: &Snapshot) -> CaveResult<Table> {
        self.query_table(query, snapshot.version).await
    }
}

/// Latest version, by id order, whose timestamp is not after `timestamp`
pub fn select_snapshot(
    mut metadata: Vec<VersionMetadata>,
    timestamp: DateTime<Utc>,
) -> CaveResult<Snapshot> {
    metadata.sort_by_key(|md| md.id);
    metadata
        .iter()
        .filter(|md| md.time_stamp <= timestamp)
        .last()
        .map(VersionMetadata::snapshot)
        .ok_or_else(|| ValidationError::NoVersionBefore(timestamp).into())
}
