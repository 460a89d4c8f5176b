//! URL templates for each service
//!
//! Every service hangs its API off a fixed prefix under its server address.
//! Builders here only assemble paths; query parameters are attached by the
//! caller.

use crate::error::CaveResult;
use url::Url;

/// API versions this client knows how to speak, per service
pub const CHUNKEDGRAPH_VERSIONS: &[u32] = &[1];
pub const MATERIALIZATION_VERSIONS: &[u32] = &[2, 3];
pub const INFO_VERSIONS: &[u32] = &[2];

fn join(base: &str, path: &str) -> CaveResult<Url> {
    Ok(Url::parse(&format!("{}/{}", base.trim_end_matches('/'), path))?)
}

/// `{cg}/segmentation/api/v{n}/table/{table_id}/...`
#[derive(Debug, Clone)]
pub struct ChunkedGraphEndpoints {
    server: String,
    table_id: String,
    version: u32,
}

impl ChunkedGraphEndpoints {
    pub fn new(server: &Url, table_id: impl Into<String>, version: u32) -> Self {
        Self {
            server: server.as_str().trim_end_matches('/').to_string(),
            table_id: table_id.into(),
            version,
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn api_versions(server: &Url) -> CaveResult<Url> {
        join(server.as_str(), "segmentation/api/versions")
    }

    fn table(&self, path: &str) -> CaveResult<Url> {
        join(
            &self.server,
            &format!("segmentation/api/v{}/table/{}/{path}", self.version, self.table_id),
        )
    }

    pub fn is_latest_roots(&self) -> CaveResult<Url> {
        self.table("is_latest_roots")
    }

    pub fn root_timestamps(&self) -> CaveResult<Url> {
        self.table("root_timestamps")
    }

    pub fn past_id_mapping(&self) -> CaveResult<Url> {
        self.table("past_id_mapping")
    }

    pub fn roots_binary(&self) -> CaveResult<Url> {
        self.table("roots_binary")
    }

    pub fn node_root(&self, supervoxel: u64) -> CaveResult<Url> {
        self.table(&format!("node/{supervoxel}/root"))
    }

    pub fn lineage_graph_multiple(&self) -> CaveResult<Url> {
        self.table("lineage_graph_multiple")
    }

    pub fn delta_roots(&self) -> CaveResult<Url> {
        self.table("delta_roots")
    }
}

/// `{me}/materialize/api/v{n}/datastack/{datastack}/...`
///
/// Version listings live under v2 regardless of the negotiated version;
/// queries and table metadata follow it.
#[derive(Debug, Clone)]
pub struct MaterializationEndpoints {
    server: String,
    datastack: String,
    version: u32,
}

impl MaterializationEndpoints {
    pub fn new(server: &Url, datastack: impl Into<String>, version: u32) -> Self {
        Self {
            server: server.as_str().trim_end_matches('/').to_string(),
            datastack: datastack.into(),
            version,
        }
    }

    pub fn datastack(&self) -> &str {
        &self.datastack
    }

    pub fn api_version(&self) -> u32 {
        self.version
    }

    pub fn api_versions(server: &Url) -> CaveResult<Url> {
        join(server.as_str(), "materialize/api/versions")
    }

    fn datastack_path(&self, version: u32, path: &str) -> CaveResult<Url> {
        join(
            &self.server,
            &format!("materialize/api/v{version}/datastack/{}/{path}", self.datastack),
        )
    }

    pub fn versions(&self) -> CaveResult<Url> {
        self.datastack_path(2, "versions")
    }

    pub fn versions_metadata(&self) -> CaveResult<Url> {
        self.datastack_path(2, "metadata")
    }

    pub fn table_metadata(&self, table: &str, version: u32) -> CaveResult<Url> {
        self.datastack_path(self.version, &format!("version/{version}/table/{table}/metadata"))
    }

    pub fn simple_query(&self, table: &str, version: u32) -> CaveResult<Url> {
        self.datastack_path(self.version, &format!("version/{version}/table/{table}/query"))
    }
}

/// `{i}/info/api/v{n}/...`
#[derive(Debug, Clone)]
pub struct InfoEndpoints {
    server: String,
    version: u32,
}

impl InfoEndpoints {
    pub fn new(server: &Url, version: u32) -> Self {
        Self {
            server: server.as_str().trim_end_matches('/').to_string(),
            version,
        }
    }

    pub fn datastack_info(&self, datastack: &str) -> CaveResult<Url> {
        join(
            &self.server,
            &format!("info/api/v{}/datastack/full/{datastack}", self.version),
        )
    }
}
