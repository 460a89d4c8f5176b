//! caveclient: client for the CAVE connectomics services
//!
//! Materialized annotation tables are frozen snapshots of a segmentation
//! that keeps being proofread. This crate queries those snapshots and
//! answers *live* queries: a filter written against root IDs valid at one
//! time is rewritten into the IDs valid at the snapshot, the snapshot is
//! queried, and the root-ID columns of the result are brought forward to
//! the requested time.
//!
//! # Core Concepts
//!
//! - **Root IDs**: identifiers for whole segments; every proofreading edit
//!   retires the edited roots and creates new ones
//! - **Lineage oracle**: answers which roots are current, when they were
//!   created, how they map across time, and which root owns a supervoxel
//! - **Query executor**: runs a filtered table query against one snapshot
//! - **Resolver**: the time-travel logic joining the two
//!
//! # Example
//!
//! ```
//! use caveclient::{
//!     CellValue, InMemoryLineage, MemoryExecutor, QueryFilters, RootIdResolver, Row, Snapshot,
//!     TableQuery,
//! };
//! use chrono::{TimeZone, Utc};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> caveclient::CaveResult<()> {
//! let day = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
//! let oracle = InMemoryLineage::new()
//!     .with_root(100, day(1), &[1])
//!     .with_root(101, day(1), &[2])
//!     .with_merge(&[100, 101], 200, day(5));
//! let row: Row = [
//!     ("pre_pt_supervoxel_id".to_string(), CellValue::UInt(1)),
//!     ("pre_pt_root_id".to_string(), CellValue::UInt(100)),
//! ]
//! .into_iter()
//! .collect();
//! let executor = MemoryExecutor::new().with_table("synapses", 1, vec![row]);
//!
//! // Ask for root 200 on day 7 against a snapshot taken on day 3
//! let resolver = RootIdResolver::new(Arc::new(oracle));
//! let query = TableQuery::new("synapses")
//!     .with_filters(QueryFilters::new().equal("pre_pt_root_id", 200u64));
//! let live = resolver
//!     .resolve(&executor, &query, &Snapshot::new(1, day(3)), day(7), true)
//!     .await?;
//! assert_eq!(live.table.rows()[0]["pre_pt_root_id"], CellValue::UInt(200));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod ids;
pub mod lineage;
pub mod live;
pub mod table;
pub mod timestamp;

pub use cache::{TtlCache, DEFAULT_TTL};
pub use client::{
    CaveClient, ChunkedGraphClient, DatastackInfo, InfoClient, MaterializationClient,
    MetadataCache, Session, TableMetadata, VersionMetadata,
};
pub use config::{ClientConfig, ConfigError};
pub use error::{CaveError, CaveResult, ValidationError};
pub use filter::{FilterValue, QueryFilters};
pub use ids::{RootId, SupervoxelId};
pub use lineage::{InMemoryLineage, LineageGraph, LineageOracle, PastIdMapping};
pub use live::{MemoryExecutor, QueryExecutor, Resolution, RootIdResolver, Snapshot, TableQuery};
pub use table::{CellValue, Row, Table};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
