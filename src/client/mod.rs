//! HTTP clients for the CAVE services
//!
//! - [`ChunkedGraphClient`]: root-ID lineage, implements [`crate::LineageOracle`]
//! - [`MaterializationClient`]: snapshot queries and live queries,
//!   implements [`crate::QueryExecutor`]
//! - [`InfoClient`]: datastack discovery
//! - [`CaveClient`]: all of the above wired together from a [`crate::ClientConfig`]

mod chunkedgraph;
mod endpoints;
mod framework;
mod info;
mod materialization;
mod session;

pub use chunkedgraph::{ChunkedGraphClient, DeltaRoots};
pub use endpoints::{
    ChunkedGraphEndpoints, InfoEndpoints, MaterializationEndpoints, CHUNKEDGRAPH_VERSIONS,
    INFO_VERSIONS, MATERIALIZATION_VERSIONS,
};
pub use framework::CaveClient;
pub use info::{AlignedVolume, DatastackInfo, InfoClient};
pub use materialization::{
    select_snapshot, MaterializationClient, MetadataCache, TableMetadata, VersionMetadata,
};
pub use session::{select_version, Session, DEFAULT_TIMEOUT};
