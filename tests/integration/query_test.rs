//! Query execution integration tests.
//!
//! Runs batches through the executor against a live server.

use super::get_test_database_url;
use sqlcmdr::db::{QueryRequest, Value};
use sqlcmdr::query::QueryExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn execute(url: &str, request: QueryRequest) -> sqlcmdr::db::QueryResponse {
    QueryExecutor::new()
        .execute(url, &request, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_simple_select() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let response = execute(&url, QueryRequest::new("SELECT 1 AS num, 'hello' AS greeting")).await;

    assert!(response.success, "{:?}", response.error_message);
    assert_eq!(response.result_sets.len(), 1);
    let set = &response.result_sets[0];
    assert_eq!(set.columns, vec!["num", "greeting"]);
    assert_eq!(set.row_count, 1);
    assert_eq!(set.rows[0].get("greeting"), Some(&Value::from("hello")));
    assert_eq!(response.total_rows_returned, 1);
    assert!(!response.was_truncated);
}

#[tokio::test]
async fn test_multi_statement_batch_yields_each_set() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let response = execute(&url, QueryRequest::new("SELECT 1 AS a; SELECT 2 AS b")).await;

    assert!(response.success, "{:?}", response.error_message);
    assert_eq!(response.result_sets.len(), 2);
    assert_eq!(response.result_sets[0].columns, vec!["a"]);
    assert_eq!(response.result_sets[1].columns, vec!["b"]);
    assert_eq!(response.total_rows_returned, 2);
}

#[tokio::test]
async fn test_row_cap_and_truncation() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let response = execute(
        &url,
        QueryRequest::new("SELECT g FROM generate_series(1, 1000) AS g").with_result_limit(10),
    )
    .await;

    assert!(response.success);
    assert_eq!(response.result_sets[0].row_count, 10);
    assert_eq!(response.total_rows_returned, 10);
    assert!(response.was_truncated);

    let exact = execute(
        &url,
        QueryRequest::new("SELECT g FROM generate_series(1, 10) AS g").with_result_limit(10),
    )
    .await;
    assert!(!exact.was_truncated);
}

#[tokio::test]
async fn test_null_is_explicit() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let response = execute(&url, QueryRequest::new("SELECT NULL AS nothing")).await;

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(
        json["resultSets"][0]["rows"][0]["nothing"],
        serde_json::Value::Null
    );
    assert_eq!(
        response.result_sets[0].rows[0].get("nothing"),
        Some(&Value::Null)
    );
}

#[tokio::test]
async fn test_syntax_error_message_is_verbatim() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let response = execute(&url, QueryRequest::new("SELEC 1")).await;

    assert!(!response.success);
    assert!(response.result_sets.is_empty());
    assert!(response
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("syntax"));
}

#[tokio::test]
async fn test_notices_are_returned_as_messages() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let response = execute(
        &url,
        QueryRequest::new("DO $$ BEGIN RAISE NOTICE 'hello from the server'; END $$; SELECT 1"),
    )
    .await;

    assert!(response.success);
    assert_eq!(response.messages, vec!["hello from the server"]);
    assert_eq!(response.result_sets.len(), 1);
}

#[tokio::test]
async fn test_cancel_current_stops_long_query() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let executor = Arc::new(QueryExecutor::new());
    let task = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            executor
                .execute(
                    &url,
                    &QueryRequest::new("SELECT pg_sleep(60)"),
                    &CancellationToken::new(),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    executor.cancel_current();

    let response = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("cancelled query did not return promptly")
        .unwrap()
        .unwrap();

    assert!(!response.success);
    assert!(response
        .error_message
        .unwrap_or_default()
        .to_lowercase()
        .contains("cancel"));
}

#[tokio::test]
async fn test_pre_cancelled_token() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let token = CancellationToken::new();
    token.cancel();

    let response = QueryExecutor::new()
        .execute(&url, &QueryRequest::new("SELECT 1"), &token)
        .await
        .unwrap();

    assert!(response.is_cancelled());
}
