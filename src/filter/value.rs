//! Tagged filter values

use crate::table::CellValue;
use serde::{Deserialize, Serialize};

/// Predicate on a single column.
///
/// The variant is decided once when the filter is built. `OneOf` with an
/// empty list matches nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
    /// Column equals exactly this value
    Equals(CellValue),
    /// Column equals any of these values
    OneOf(Vec<CellValue>),
}

impl FilterValue {
    /// Build a `OneOf`, dropping duplicate values while keeping first-seen order
    pub fn one_of(values: impl IntoIterator<Item = impl Into<CellValue>>) -> Self {
        let mut out: Vec<CellValue> = Vec::new();
        for v in values {
            let v = v.into();
            if !out.contains(&v) {
                out.push(v);
            }
        }
        FilterValue::OneOf(out)
    }

    /// Whether a cell satisfies this predicate
    pub fn matches(&self, value: &CellValue) -> bool {
        match self {
            FilterValue::Equals(expected) => expected == value,
            FilterValue::OneOf(allowed) => allowed.contains(value),
        }
    }

    /// Values referenced by this predicate
    pub fn values(&self) -> &[CellValue] {
        match self {
            FilterValue::Equals(v) => std::slice::from_ref(v),
            FilterValue::OneOf(vs) => vs,
        }
    }

    /// True for the always-false `OneOf([])`
    pub fn matches_nothing(&self) -> bool {
        matches!(self, FilterValue::OneOf(vs) if vs.is_empty())
    }

    /// Conjunction of two predicates on the same column.
    ///
    /// `Equals(a) & Equals(b)` with `a != b` and disjoint `OneOf` sets both
    /// collapse to the always-false `OneOf([])`.
    pub fn intersect(self, other: FilterValue) -> FilterValue {
        match (self, other) {
            (FilterValue::Equals(a), FilterValue::Equals(b)) => {
                if a == b {
                    FilterValue::Equals(a)
                } else {
                    FilterValue::OneOf(Vec::new())
                }
            }
            (FilterValue::Equals(a), FilterValue::OneOf(set))
            | (FilterValue::OneOf(set), FilterValue::Equals(a)) => {
                if set.contains(&a) {
                    FilterValue::Equals(a)
                } else {
                    FilterValue::OneOf(Vec::new())
                }
            }
            (FilterValue::OneOf(left), FilterValue::OneOf(right)) => {
                FilterValue::OneOf(left.into_iter().filter(|v| right.contains(v)).collect())
            }
        }
    }
}
