//! Cell values carried by query results and filters

use serde::{Deserialize, Serialize};

/// A single value in a result table or filter.
///
/// Non-negative integers are always held as `UInt` so that equality does not
/// depend on whether a value was written by hand or parsed from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<CellValue>),
}

impl CellValue {
    /// Integer constructor that normalizes non-negative values to `UInt`
    pub fn int(v: i64) -> Self {
        if v >= 0 {
            CellValue::UInt(v as u64)
        } else {
            CellValue::Int(v)
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            CellValue::UInt(v) => Some(*v),
            CellValue::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::UInt(v) => Some(*v as f64),
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Parse a command-line token: integers first, then floats, then `true`/`false`,
    /// otherwise a string.
    pub fn parse_token(token: &str) -> Self {
        if let Ok(v) = token.parse::<u64>() {
            return CellValue::UInt(v);
        }
        if let Ok(v) = token.parse::<i64>() {
            return CellValue::int(v);
        }
        if let Ok(v) = token.parse::<f64>() {
            return CellValue::Float(v);
        }
        match token {
            "true" => CellValue::Bool(true),
            "false" => CellValue::Bool(false),
            _ => CellValue::String(token.to_string()),
        }
    }
}

impl From<u64> for CellValue {
    fn from(v: u64) -> Self {
        CellValue::UInt(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::int(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::int(v as i64)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::String(v)
    }
}

impl From<crate::ids::RootId> for CellValue {
    fn from(v: crate::ids::RootId) -> Self {
        CellValue::UInt(v.get())
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "null"),
            CellValue::Bool(v) => write!(f, "{}", v),
            CellValue::UInt(v) => write!(f, "{}", v),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::String(v) => write!(f, "{:?}", v),
            CellValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}
