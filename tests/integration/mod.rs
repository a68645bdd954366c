//! Integration tests for sqlcmdr.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run them.

pub mod connection_test;
pub mod query_test;
pub mod schema_test;

use sqlcmdr::db::QueryRequest;
use sqlcmdr::query::QueryExecutor;
use tokio_util::sync::CancellationToken;

/// Helper to get test database URL from environment.
pub fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Returns a schema name no other test run will use.
pub fn unique_schema(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("{prefix}_{}_{nanos}", std::process::id())
}

/// Runs a setup or teardown batch and fails the test if it does not succeed.
pub async fn run_batch(url: &str, sql: &str) {
    let response = QueryExecutor::new()
        .execute(url, &QueryRequest::new(sql), &CancellationToken::new())
        .await
        .unwrap();
    assert!(
        response.success,
        "Batch failed: {:?}\n{sql}",
        response.error_message
    );
}
