//! Chunked-graph (PyChunkedGraph) client
//!
//! Answers root-ID questions over HTTP and serves as the [`LineageOracle`]
//! for live queries.

use super::endpoints::{ChunkedGraphEndpoints, CHUNKEDGRAPH_VERSIONS};
use super::session::Session;
use crate::error::{CaveError, CaveResult};
use crate::ids::{RootId, SupervoxelId};
use crate::lineage::{LineageGraph, LineageOracle, PastIdMapping};
use crate::timestamp::{from_unix_seconds, to_unix_seconds};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

#[derive(Serialize)]
struct NodeIds<'a> {
    node_ids: &'a [RootId],
}

#[derive(Serialize)]
struct RootIds<'a> {
    root_ids: &'a [RootId],
}

#[derive(Deserialize)]
struct IsLatestResponse {
    is_latest: Vec<bool>,
}

#[derive(Deserialize)]
struct TimestampResponse {
    timestamp: Vec<f64>,
}

#[derive(Deserialize)]
struct RootResponse {
    root_id: RootId,
}

/// ID maps as sent by the server: JSON object keys are strings
#[derive(Deserialize)]
struct RawIdMapping {
    #[serde(default)]
    past_id_map: BTreeMap<String, Vec<RootId>>,
    #[serde(default)]
    future_id_map: BTreeMap<String, Vec<RootId>>,
}

/// Roots retired and created between two timestamps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRoots {
    pub old_roots: Vec<RootId>,
    pub new_roots: Vec<RootId>,
}

/// Client for one chunked-graph table
#[derive(Debug, Clone)]
pub struct ChunkedGraphClient {
    session: Session,
    endpoints: ChunkedGraphEndpoints,
}

impl ChunkedGraphClient {
    pub fn new(session: Session, endpoints: ChunkedGraphEndpoints) -> Self {
        Self { session, endpoints }
    }

    /// Build a client for `table_id`, negotiating the API version
    pub async fn connect(
        session: Session,
        server: &Url,
        table_id: impl Into<String>,
        pinned_version: Option<u32>,
    ) -> CaveResult<Self> {
        let version = session
            .negotiate(
                "chunkedgraph",
                ChunkedGraphEndpoints::api_versions(server)?,
                CHUNKEDGRAPH_VERSIONS,
                pinned_version,
            )
            .await?;
        let endpoints = ChunkedGraphEndpoints::new(server, table_id, version);
        debug!(table = endpoints.table_id(), version, "chunkedgraph client ready");
        Ok(Self::new(session, endpoints))
    }

    pub fn table_id(&self) -> &str {
        self.endpoints.table_id()
    }

    /// Root owning a single supervoxel, at `timestamp` or now
    pub async fn root_id(
        &self,
        supervoxel: SupervoxelId,
        timestamp: Option<DateTime<Utc>>,
    ) -> CaveResult<RootId> {
        if supervoxel.is_sentinel() {
            return Ok(RootId::SENTINEL);
        }
        let mut request = self
            .session
            .request(Method::GET, self.endpoints.node_root(supervoxel.get())?);
        if let Some(ts) = timestamp {
            request = request.query(&[("timestamp", to_unix_seconds(ts))]);
        }
        let response: RootResponse = self.session.json(request).await?;
        Ok(response.root_id)
    }

    /// Edit history of `ids`, optionally bounded in time
    pub async fn lineage_graph(
        &self,
        ids: &[RootId],
        past: Option<DateTime<Utc>>,
        future: Option<DateTime<Utc>>,
    ) -> CaveResult<LineageGraph> {
        let mut request = self
            .session
            .request(Method::POST, self.endpoints.lineage_graph_multiple()?)
            .json(&RootIds { root_ids: ids });
        if let Some(past) = past {
            request = request.query(&[("timestamp_past", to_unix_seconds(past))]);
        }
        if let Some(future) = future {
            request = request.query(&[("timestamp_future", to_unix_seconds(future))]);
        }
        self.session.json(request).await
    }

    /// Roots descended from (or, looking backwards, preceding) `root` at `timestamp`
    pub async fn latest_roots(
        &self,
        root: RootId,
        timestamp: Option<DateTime<Utc>>,
    ) -> CaveResult<Vec<RootId>> {
        let created = self
            .created_at(&[root])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CaveError::Decode(format!("no timestamp for root {root}")))?;
        let target = timestamp.unwrap_or_else(Utc::now);
        if created < target {
            let graph = self.lineage_graph(&[root], Some(created), Some(target)).await?;
            Ok(graph.leaves())
        } else {
            let graph = self.lineage_graph(&[root], Some(target), Some(created)).await?;
            Ok(graph.sources())
        }
    }

    /// Roots retired and created in `(past, future]`
    pub async fn delta_roots(
        &self,
        past: DateTime<Utc>,
        future: DateTime<Utc>,
    ) -> CaveResult<DeltaRoots> {
        let request = self
            .session
            .request(Method::GET, self.endpoints.delta_roots()?)
            .query(&[
                ("timestamp_past", to_unix_seconds(past)),
                ("timestamp_future", to_unix_seconds(future)),
            ]);
        self.session.json(request).await
    }
}

#[async_trait]
impl LineageOracle for ChunkedGraphClient {
    async fn is_latest(&self, ids: &[RootId], at: DateTime<Utc>) -> CaveResult<Vec<bool>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = self
            .session
            .request(Method::POST, self.endpoints.is_latest_roots()?)
            .query(&[("timestamp", to_unix_seconds(at))])
            .json(&NodeIds { node_ids: ids });
        let response: IsLatestResponse = self.session.json(request).await?;
        check_len("is_latest_roots", ids.len(), response.is_latest.len())?;
        Ok(response.is_latest)
    }

    async fn created_at(&self, ids: &[RootId]) -> CaveResult<Vec<DateTime<Utc>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = self
            .session
            .request(Method::POST, self.endpoints.root_timestamps()?)
            .query(&[("latest", "false")])
            .json(&NodeIds { node_ids: ids });
        let response: TimestampResponse = self.session.json(request).await?;
        check_len("root_timestamps", ids.len(), response.timestamp.len())?;
        response
            .timestamp
            .into_iter()
            .map(|secs| {
                from_unix_seconds(secs)
                    .ok_or_else(|| CaveError::Decode(format!("timestamp out of range: {secs}")))
            })
            .collect()
    }

    async fn past_ids(
        &self,
        ids: &[RootId],
        past: DateTime<Utc>,
        future: DateTime<Utc>,
    ) -> CaveResult<PastIdMapping> {
        if ids.is_empty() {
            return Ok(PastIdMapping::default());
        }
        let request = self
            .session
            .request(Method::GET, self.endpoints.past_id_mapping()?)
            .query(&[
                ("timestamp_past", to_unix_seconds(past)),
                ("timestamp_future", to_unix_seconds(future)),
            ])
            .json(&RootIds { root_ids: ids });
        let raw: RawIdMapping = self.session.json(request).await?;
        Ok(PastIdMapping {
            past_id_map: parse_id_map(raw.past_id_map)?,
            future_id_map: parse_id_map(raw.future_id_map)?,
        })
    }

    async fn owning_root(
        &self,
        supervoxels: &[SupervoxelId],
        at: DateTime<Utc>,
    ) -> CaveResult<Vec<RootId>> {
        let real: Vec<SupervoxelId> = supervoxels
            .iter()
            .copied()
            .filter(|sv| !sv.is_sentinel())
            .collect();
        let mut resolved = if real.is_empty() {
            Vec::new()
        } else {
            let request = self
                .session
                .request(Method::POST, self.endpoints.roots_binary()?)
                .query(&[("timestamp", to_unix_seconds(at))])
                .body(encode_ids(real.iter().map(|sv| sv.get())));
            let body = self.session.bytes(request).await?;
            let roots = decode_ids(&body)?;
            check_len("roots_binary", real.len(), roots.len())?;
            roots
        }
        .into_iter();

        // put the sentinels back in place
        supervoxels
            .iter()
            .map(|sv| {
                if sv.is_sentinel() {
                    Ok(RootId::SENTINEL)
                } else {
                    resolved
                        .next()
                        .map(RootId::new)
                        .ok_or_else(|| CaveError::Decode("roots_binary returned too few ids".into()))
                }
            })
            .collect()
    }
}

fn check_len(endpoint: &str, expected: usize, got: usize) -> CaveResult<()> {
    if expected != got {
        return Err(CaveError::Decode(format!(
            "{endpoint} returned {got} entries for {expected} ids"
        )));
    }
    Ok(())
}

fn parse_id_map(raw: BTreeMap<String, Vec<RootId>>) -> CaveResult<BTreeMap<RootId, Vec<RootId>>> {
    raw.into_iter()
        .map(|(key, mut ids)| {
            let id = key
                .parse::<u64>()
                .map_err(|_| CaveError::Decode(format!("id map key is not a root id: {key:?}")))?;
            ids.sort();
            ids.dedup();
            Ok((RootId::new(id), ids))
        })
        .collect()
}

/// Little-endian `u64` array, as `roots_binary` expects
pub(crate) fn encode_ids(ids: impl Iterator<Item = u64>) -> Vec<u8> {
    ids.flat_map(u64::to_le_bytes).collect()
}

pub(crate) fn decode_ids(bytes: &[u8]) -> CaveResult<Vec<u64>> {
    if bytes.len() % 8 != 0 {
        return Err(CaveError::Decode(format!(
            "binary id payload of {} bytes is not a multiple of 8",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            u64::from_le_bytes(buf)
        })
        .collect())
}
