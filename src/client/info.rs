//! Info service client: datastack discovery

use super::endpoints::{InfoEndpoints, INFO_VERSIONS};
use super::session::Session;
use crate::error::{CaveResult, ValidationError};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Aligned image volume a datastack is built on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedVolume {
    pub name: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub image_source: Option<String>,
}

/// The services and sources that make up a datastack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastackInfo {
    /// Segmentation path, e.g. `graphene://https://host/segmentation/table/minnie3_v1`
    pub segmentation_source: String,
    /// Server hosting the chunkedgraph and materialization services
    pub local_server: String,
    #[serde(default)]
    pub aligned_volume: Option<AlignedVolume>,
    #[serde(default)]
    pub synapse_table: Option<String>,
    #[serde(default)]
    pub soma_table: Option<String>,
    #[serde(default)]
    pub viewer_site: Option<String>,
    #[serde(default)]
    pub viewer_resolution_x: Option<f64>,
    #[serde(default)]
    pub viewer_resolution_y: Option<f64>,
    #[serde(default)]
    pub viewer_resolution_z: Option<f64>,
}

impl DatastackInfo {
    /// Chunked-graph table: the last path component of the segmentation source
    pub fn table_id(&self) -> Result<&str, ValidationError> {
        self.segmentation_source
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty() && !id.contains(':'))
            .ok_or_else(|| ValidationError::MissingTableId(self.segmentation_source.clone()))
    }

    pub fn local_server(&self) -> CaveResult<Url> {
        Ok(Url::parse(&self.local_server)?)
    }

    pub fn viewer_resolution(&self) -> Option<[f64; 3]> {
        Some([
            self.viewer_resolution_x?,
            self.viewer_resolution_y?,
            self.viewer_resolution_z?,
        ])
    }
}

/// Client for the global info service
#[derive(Debug, Clone)]
pub struct InfoClient {
    session: Session,
    endpoints: InfoEndpoints,
}

impl InfoClient {
    pub fn new(session: Session, server: &Url, version: u32) -> Self {
        Self {
            session,
            endpoints: InfoEndpoints::new(server, version),
        }
    }

    /// Client speaking the newest info API this crate supports
    pub fn latest(session: Session, server: &Url) -> Self {
        let version = INFO_VERSIONS.iter().copied().max().unwrap_or(2);
        Self::new(session, server, version)
    }

    pub async fn datastack_info(&self, datastack: &str) -> CaveResult<DatastackInfo> {
        let request = self
            .session
            .request(Method::GET, self.endpoints.datastack_info(datastack)?);
        self.session.json(request).await
    }
}
