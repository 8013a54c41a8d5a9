//! # Query Registry
//!
//! The validated set of named queries the input retrieves. Built once at
//! registration and shared read-only by every retrieval.

pub mod query_registry;

pub use query_registry::{QueryRegistry, QuerySpec};
