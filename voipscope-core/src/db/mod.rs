//! Database layer for voipscope
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Whole-snapshot persistence of the call index

pub mod repo;
pub mod schema;

pub use repo::Database;
