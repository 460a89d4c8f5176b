//! Segment identifiers and the column naming conventions that carry them

use serde::{Deserialize, Serialize};

/// Column suffix marking a root ID column (e.g. `pre_pt_root_id`)
pub const ROOT_ID_SUFFIX: &str = "root_id";

/// Column suffix marking a supervoxel ID column (e.g. `pre_pt_supervoxel_id`)
pub const SUPERVOXEL_ID_SUFFIX: &str = "supervoxel_id";

/// Identifier of an agglomerated object at a point in time.
///
/// Root IDs are retired by merges and splits; `0` is the background sentinel
/// and never names a real object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootId(u64);

impl RootId {
    /// The background / "no object" sentinel
    pub const SENTINEL: RootId = RootId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// True for the `0` sentinel, which is never sent to the lineage service
    pub const fn is_sentinel(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for RootId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RootId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an atomic, time-invariant fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupervoxelId(u64);

impl SupervoxelId {
    pub const SENTINEL: SupervoxelId = SupervoxelId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_sentinel(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for SupervoxelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SupervoxelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a column holds root IDs
pub fn is_root_column(column: &str) -> bool {
    column.ends_with(ROOT_ID_SUFFIX)
}

/// Whether a column holds supervoxel IDs
pub fn is_supervoxel_column(column: &str) -> bool {
    column.ends_with(SUPERVOXEL_ID_SUFFIX)
}

/// The root ID column paired with a supervoxel column.
///
/// `pre_pt_supervoxel_id` pairs with `pre_pt_root_id`. Returns `None` when the
/// column is not a supervoxel column.
pub fn root_column_for(supervoxel_column: &str) -> Option<String> {
    supervoxel_column
        .strip_suffix(SUPERVOXEL_ID_SUFFIX)
        .map(|prefix| format!("{prefix}{ROOT_ID_SUFFIX}"))
}

/// The supervoxel column paired with a root ID column.
pub fn supervoxel_column_for(root_column: &str) -> Option<String> {
    root_column
        .strip_suffix(ROOT_ID_SUFFIX)
        .map(|prefix| format!("{prefix}{SUPERVOXEL_ID_SUFFIX}"))
}

/// Format a list of root IDs for error messages: `[1, 2, 3]`
pub fn format_ids(ids: &[RootId]) -> String {
    let parts: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_zero() {
        assert!(RootId::SENTINEL.is_sentinel());
        assert!(!RootId::new(864691135).is_sentinel());
        assert!(SupervoxelId::new(0).is_sentinel());
    }

    #[test]
    fn column_pairing() {
        assert_eq!(root_column_for("pre_pt_supervoxel_id").as_deref(), Some("pre_pt_root_id"));
        assert_eq!(supervoxel_column_for("pt_root_id").as_deref(), Some("pt_supervoxel_id"));
        assert_eq!(root_column_for("pt_position"), None);
        assert!(is_root_column("post_pt_root_id"));
        assert!(!is_root_column("cell_type"));
        assert!(is_supervoxel_column("supervoxel_id"));
    }

    #[test]
    fn root_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&RootId::new(42)).unwrap();
        assert_eq!(json, "42");
        let back: RootId = serde_json::from_str("42").unwrap();
        assert_eq!(back, RootId::new(42));
    }

    #[test]
    fn format_ids_lists_values() {
        assert_eq!(format_ids(&[RootId::new(1), RootId::new(22)]), "[1, 22]");
        assert_eq!(format_ids(&[]), "[]");
    }
}
