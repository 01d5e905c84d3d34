//! Database layer
//!
//! Storage for users, sessions, single-use tokens, OAuth links and short
//! links on SQLite (default, single file) or MySQL, selected by
//! `database.driver` in the configuration.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, is_unique_violation, DatabasePool, DynDatabasePool};
