//! Query filters
//!
//! `QueryFilters` groups the predicates a table query can carry: inclusion
//! (equality or membership), exclusion, spatial bounding boxes and regexes.
//! Only inclusion and exclusion take part in root-ID rewriting and
//! post-filtering; spatial and regex filters are passed through to the
//! service untouched.

mod value;

pub use value::FilterValue;

use crate::error::{CaveResult, ValidationError};
use crate::ids::{is_root_column, RootId};
use crate::table::{CellValue, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Axis-aligned box `[[min_x, min_y, min_z], [max_x, max_y, max_z]]`
pub type BoundingBox = [[f64; 3]; 2];

/// The filters attached to one table query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Rows must satisfy every predicate
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub include: BTreeMap<String, FilterValue>,
    /// Rows must not hold any listed value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exclude: BTreeMap<String, Vec<CellValue>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spatial: BTreeMap<String, BoundingBox>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub regex: BTreeMap<String, String>,
}

impl QueryFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `column == value`
    pub fn equal(self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.include_value(column.into(), FilterValue::Equals(value.into()))
    }

    /// Require `column IN values`
    pub fn one_of(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<CellValue>>,
    ) -> Self {
        self.include_value(column.into(), FilterValue::one_of(values))
    }

    /// Require `column NOT IN values`
    pub fn exclude(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<CellValue>>,
    ) -> Self {
        let entry = self.exclude.entry(column.into()).or_default();
        for v in values {
            let v = v.into();
            if !entry.contains(&v) {
                entry.push(v);
            }
        }
        self
    }

    /// Restrict a point column to a bounding box
    pub fn within(mut self, column: impl Into<String>, bbox: BoundingBox) -> Self {
        self.spatial.insert(column.into(), bbox);
        self
    }

    /// Restrict a string column to a regex
    pub fn matching(mut self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.regex.insert(column.into(), pattern.into());
        self
    }

    /// Add an inclusion predicate; a second predicate on the same column is
    /// combined with the first by intersection.
    fn include_value(mut self, column: String, value: FilterValue) -> Self {
        let combined = match self.include.remove(&column) {
            Some(existing) => existing.intersect(value),
            None => value,
        };
        self.include.insert(column, combined);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
            && self.exclude.is_empty()
            && self.spatial.is_empty()
            && self.regex.is_empty()
    }

    /// True when some inclusion predicate can never be satisfied
    pub fn matches_nothing(&self) -> bool {
        self.include.values().any(FilterValue::matches_nothing)
    }

    /// Reject spatial boxes with `min > max` or non-finite corners, and empty regexes
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (column, [min, max]) in &self.spatial {
            let valid = min
                .iter()
                .zip(max)
                .all(|(lo, hi)| lo.is_finite() && hi.is_finite() && lo <= hi);
            if !valid {
                return Err(ValidationError::InvalidFilter {
                    column: column.clone(),
                    reason: format!("bounding box {min:?}..{max:?} is empty or not finite"),
                });
            }
        }
        if let Some((column, _)) = self.regex.iter().find(|(_, pattern)| pattern.is_empty()) {
            return Err(ValidationError::InvalidFilter {
                column: column.clone(),
                reason: "empty regex".into(),
            });
        }
        Ok(())
    }

    /// Distinct root IDs referenced by inclusion or exclusion filters on root columns.
    ///
    /// Fails if a root column filter holds anything but unsigned integers.
    pub fn root_ids(&self) -> CaveResult<BTreeSet<RootId>> {
        let mut ids = BTreeSet::new();
        for (column, value) in &self.include {
            if is_root_column(column) {
                collect_root_ids(column, value.values(), &mut ids)?;
            }
        }
        for (column, values) in &self.exclude {
            if is_root_column(column) {
                collect_root_ids(column, values, &mut ids)?;
            }
        }
        Ok(ids)
    }

    /// Whether a row satisfies the inclusion and exclusion predicates.
    ///
    /// Missing columns are treated as null.
    pub fn matches_row(&self, row: &Row) -> bool {
        let null = CellValue::Null;
        let included = self
            .include
            .iter()
            .all(|(column, pred)| pred.matches(row.get(column).unwrap_or(&null)));
        let excluded = self
            .exclude
            .iter()
            .any(|(column, values)| values.contains(row.get(column).unwrap_or(&null)));
        included && !excluded
    }
}

fn collect_root_ids(
    column: &str,
    values: &[CellValue],
    into: &mut BTreeSet<RootId>,
) -> CaveResult<()> {
    for value in values {
        let id = value.as_u64().ok_or_else(|| ValidationError::NotARootId {
            column: column.to_string(),
            value: value.to_string(),
        })?;
        into.insert(RootId::new(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaveError;

    fn row(pairs: &[(&str, CellValue)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn builder_intersects_repeated_columns() {
        let filters = QueryFilters::new()
            .one_of("pre_pt_root_id", [201u64, 103])
            .equal("pre_pt_root_id", 201u64);
        assert_eq!(
            filters.include.get("pre_pt_root_id"),
            Some(&FilterValue::Equals(CellValue::UInt(201)))
        );
    }

    #[test]
    fn conflicting_equals_fail_closed() {
        let filters = QueryFilters::new()
            .equal("pre_pt_root_id", 1u64)
            .equal("pre_pt_root_id", 2u64);
        assert!(filters.matches_nothing());
    }

    #[test]
    fn root_ids_collects_include_and_exclude() {
        let filters = QueryFilters::new()
            .one_of("pre_pt_root_id", [201u64, 103])
            .exclude("post_pt_root_id", [5u64])
            .equal("cell_type", "BC");
        let ids: Vec<u64> = filters.root_ids().unwrap().into_iter().map(RootId::get).collect();
        assert_eq!(ids, vec![5, 103, 201]);
    }

    #[test]
    fn root_ids_rejects_non_integer_values() {
        let filters = QueryFilters::new().equal("pt_root_id", "abc");
        let err = filters.root_ids().unwrap_err();
        assert!(matches!(
            err,
            CaveError::Validation(ValidationError::NotARootId { .. })
        ));
    }

    #[test]
    fn matches_row_applies_include_and_exclude() {
        let filters = QueryFilters::new()
            .one_of("pre_pt_root_id", [201u64])
            .exclude("post_pt_root_id", [7u64]);
        let keep = row(&[
            ("pre_pt_root_id", CellValue::UInt(201)),
            ("post_pt_root_id", CellValue::UInt(8)),
        ]);
        let drop_excluded = row(&[
            ("pre_pt_root_id", CellValue::UInt(201)),
            ("post_pt_root_id", CellValue::UInt(7)),
        ]);
        let drop_missing = row(&[("post_pt_root_id", CellValue::UInt(8))]);
        assert!(filters.matches_row(&keep));
        assert!(!filters.matches_row(&drop_excluded));
        assert!(!filters.matches_row(&drop_missing));
    }

    #[test]
    fn spatial_and_regex_do_not_affect_row_matching() {
        let filters = QueryFilters::new()
            .within("pt_position", [[0.0; 3], [1.0; 3]])
            .matching("cell_type", "^B");
        assert!(filters.matches_row(&Row::new()));
        assert!(!filters.is_empty());
    }

    #[test]
    fn inverted_bounding_box_is_invalid() {
        let ok = QueryFilters::new().within("pt_position", [[0.0, 0.0, 0.0], [10.0, 10.0, 1.0]]);
        assert!(ok.validate().is_ok());

        let inverted = QueryFilters::new().within("pt_position", [[5.0, 0.0, 0.0], [1.0, 10.0, 1.0]]);
        assert!(matches!(
            inverted.validate(),
            Err(ValidationError::InvalidFilter { column, .. }) if column == "pt_position"
        ));
    }

    #[test]
    fn empty_regex_is_invalid() {
        let filters = QueryFilters::new().matching("cell_type", "");
        assert!(filters.validate().is_err());
    }
}
