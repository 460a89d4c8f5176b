//! The `CaveClient` façade: every service client, built up front

use super::chunkedgraph::ChunkedGraphClient;
use super::info::{DatastackInfo, InfoClient};
use super::materialization::{MaterializationClient, MetadataCache};
use super::session::Session;
use crate::config::ClientConfig;
use crate::error::CaveResult;
use std::sync::Arc;
use tracing::info;

/// Service clients for one datastack.
///
/// Built once by [`CaveClient::connect`]; the materialization client answers
/// live queries through the same chunked-graph client exposed here.
#[derive(Debug, Clone)]
pub struct CaveClient {
    pub info: InfoClient,
    pub datastack: DatastackInfo,
    pub chunkedgraph: Arc<ChunkedGraphClient>,
    pub materialize: MaterializationClient,
}

impl CaveClient {
    /// Connect with a fresh metadata cache sized from `config`
    pub async fn connect(config: &ClientConfig) -> CaveResult<Self> {
        let cache = Arc::new(MetadataCache::new(config.cache_ttl()));
        Self::connect_with_cache(config, cache).await
    }

    /// Connect sharing `cache` with other clients
    pub async fn connect_with_cache(
        config: &ClientConfig,
        cache: Arc<MetadataCache>,
    ) -> CaveResult<Self> {
        let datastack_name = config.datastack()?;
        let session = Session::new(config.resolve_token()?, config.timeout())?;
        if !session.has_token() {
            tracing::warn!("no auth token found; requests may be rejected");
        }

        let info = InfoClient::latest(session.clone(), &config.server_url()?);
        let datastack = info.datastack_info(datastack_name).await?;
        let local = datastack.local_server()?;
        let table_id = datastack.table_id()?.to_string();

        let chunkedgraph = Arc::new(
            ChunkedGraphClient::connect(
                session.clone(),
                &local,
                table_id,
                config.chunkedgraph_api_version,
            )
            .await?,
        );
        let materialize = MaterializationClient::connect(
            session,
            &local,
            datastack_name,
            cache,
            config.materialization_api_version,
        )
        .await?
        .with_lineage(chunkedgraph.clone());

        info!(
            datastack = datastack_name,
            server = %local,
            table = chunkedgraph.table_id(),
            "connected"
        );
        Ok(Self {
            info,
            datastack,
            chunkedgraph,
            materialize,
        })
    }
}
