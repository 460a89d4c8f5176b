//! Root-ID lineage: the oracle seam, lineage graphs, and an in-process oracle

mod graph;
mod memory;
mod traits;

pub use graph::{LineageGraph, LineageLink, LineageNode};
pub use memory::{CallLog, InMemoryLineage, LineageOp};
pub use traits::{LineageOracle, PastIdMapping};
