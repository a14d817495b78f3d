//! # SMW Query Core
//!
//! Runtime-free logic for semantic wiki queries: the description AST and
//! its parser, the per-kind query compilers, SQL rendering of compiled
//! plans, and the query result cache.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Storage is
//! reached through the [`store::Store`], [`query::QueryEngine`], and
//! [`cache::blob::BlobStore`] traits.

pub mod cache;
pub mod compiler;
pub mod container;
pub mod description;
pub mod error;
pub mod parser;
pub mod query;
pub mod sql;
pub mod store;

pub use error::{Error, Result};
