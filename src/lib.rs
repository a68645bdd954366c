//! sqlcmdr - SQL batch execution and catalog introspection for PostgreSQL.
//!
//! The library exposes the executor, the catalog builder and their models for
//! the `sqlcmdr` binary and for integration tests.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod query;
