//! Fatal error types for the query core.
//!
//! Only data-integrity and syntax failures live here. Conditions such as
//! "category not found" or "concept cache unusable" are not errors: the
//! compilers degrade to an empty-result node and record a
//! [`CompileMessage`](crate::compiler::CompileMessage) instead.

use thiserror::Error;

/// Errors raised by the query core.
#[derive(Error, Debug)]
pub enum Error {
    /// A page serialization did not have the `dbkey#ns#iw#subobject` shape.
    #[error("invalid page serialization: {0:?}")]
    InvalidSerialization(String),

    /// A cached blob lacks an element every cache entry must carry.
    #[error("cache entry {key} is missing required element '{element}'")]
    MissingElement { key: String, element: &'static str },

    /// A cached blob element has the wrong shape.
    #[error("malformed cache entry {key}: {reason}")]
    MalformedCacheEntry { key: String, reason: String },

    /// The query string could not be parsed.
    #[error("query syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for query core operations.
pub type Result<T> = std::result::Result<T, Error>;
