//! Live queries: answering a table query as of an arbitrary timestamp
//!
//! Materialized snapshots are frozen copies of annotation tables. The
//! [`RootIdResolver`] bridges the gap between a snapshot and the requested
//! time by mapping root IDs backwards through the lineage before the query
//! and forwards through supervoxel ownership after it.

mod memory;
mod query;
mod resolver;


pub use memory::MemoryExecutor;
pub use query::{QueryExecutor, Snapshot, TableQuery};
pub use resolver::{MappedFilters, Resolution, RootIdResolver};
