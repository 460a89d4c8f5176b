//! Error taxonomy shared by the resolver and the service clients

use crate::ids::{format_ids, RootId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Input errors raised before (or instead of) any query runs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("timestamp_past {past} is after timestamp_future {future}")]
    TimestampOrder {
        past: DateTime<Utc>,
        future: DateTime<Utc>,
    },

    #[error("{}", incompatible_roots_message(.expired, .too_recent))]
    IncompatibleRoots {
        /// Roots with a successor at the reference time
        expired: Vec<RootId>,
        /// Roots created at or after the reference time
        too_recent: Vec<RootId>,
    },

    #[error("column {column} holds root IDs but filter value {value} is not an unsigned integer")]
    NotARootId { column: String, value: String },

    #[error("no materialization version exists at or before {0}")]
    NoVersionBefore(DateTime<Utc>),

    #[error("column {0} selects root IDs without the matching supervoxel column")]
    RootWithoutSupervoxel(String),

    #[error("cannot derive a chunkedgraph table from segmentation source {0:?}")]
    MissingTableId(String),

    #[error("invalid filter on {column}: {reason}")]
    InvalidFilter { column: String, reason: String },
}

fn incompatible_roots_message(expired: &[RootId], too_recent: &[RootId]) -> String {
    let mut msg = String::from("Timestamp incompatible with IDs: ");
    if !expired.is_empty() {
        msg.push_str(&format!("{} are expired, ", format_ids(expired)));
    }
    if !too_recent.is_empty() {
        msg.push_str(&format!("{} are too recent, ", format_ids(too_recent)));
    }
    msg.push_str("use the chunkedgraph client to find valid ID(s)");
    msg
}

/// Errors from any caveclient operation
#[derive(Debug, Error)]
pub enum CaveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("not authorized for {url}; check that a valid token is configured")]
    Unauthorized { url: String },

    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("{status} client error for {url}: {message}")]
    BadRequest {
        status: u16,
        url: String,
        message: String,
    },

    #[error("{status} server error for {url}: {message}")]
    ServerError {
        status: u16,
        url: String,
        message: String,
    },

    #[error("{service} supports API versions {client:?}, server offers {server:?}")]
    IncompatibleVersion {
        service: String,
        client: Vec<u32>,
        server: Vec<u32>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for caveclient operations
pub type CaveResult<T> = Result<T, CaveError>;

impl CaveError {
    /// Whether this error came from caller input rather than a remote service
    pub fn is_validation(&self) -> bool {
        matches!(self, CaveError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incompatible_roots_lists_both_groups() {
        let err = ValidationError::IncompatibleRoots {
            expired: vec![RootId::new(100)],
            too_recent: vec![RootId::new(303), RootId::new(304)],
        };
        let msg = err.to_string();
        assert!(msg.contains("[100] are expired"));
        assert!(msg.contains("[303, 304] are too recent"));
    }

    #[test]
    fn incompatible_roots_omits_empty_group() {
        let err = ValidationError::IncompatibleRoots {
            expired: vec![RootId::new(7)],
            too_recent: vec![],
        };
        assert!(!err.to_string().contains("too recent"));
    }

    #[test]
    fn validation_converts_into_cave_error() {
        let err: CaveError = ValidationError::RootWithoutSupervoxel("pt_root_id".into()).into();
        assert!(err.is_validation());
    }
}
