//! Query request and result types for sqlcmdr.
//!
//! Defines the values exchanged with the query executor. All of them are
//! created fresh per call and handed to the caller as-is.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Result limit applied when neither the request nor the settings supply one.
pub const DEFAULT_RESULT_LIMIT: usize = 100;

/// Error text reported when a batch is cancelled.
pub const CANCELLED_MESSAGE: &str = "Query was cancelled";

/// A request to run one ad-hoc SQL batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// SQL text, submitted to the server as a single batch.
    pub sql: String,

    /// Maximum rows collected per result set.
    #[serde(default)]
    pub result_limit: Option<usize>,
}

impl QueryRequest {
    /// Creates a request with no explicit result limit.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            result_limit: None,
        }
    }

    /// Sets the per-result-set row cap.
    pub fn with_result_limit(self, limit: usize) -> Self {
        Self {
            result_limit: Some(limit),
            ..self
        }
    }

    /// Fills in `limit` only when the request does not carry one already.
    pub fn or_result_limit(self, limit: usize) -> Self {
        Self {
            result_limit: self.result_limit.or(Some(limit)),
            ..self
        }
    }

    /// The row cap that applies to this request.
    pub fn effective_limit(&self) -> usize {
        self.result_limit.unwrap_or(DEFAULT_RESULT_LIMIT)
    }
}

/// A row of data keyed by column name.
///
/// Column order is carried by [`ResultSet::columns`]; when a result set has
/// duplicate column names the last value wins.
pub type Row = HashMap<String, Value>;

/// One tabular output produced by a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    /// Column names in server order.
    pub columns: Vec<String>,

    /// Collected rows, at most the request's result limit.
    pub rows: Vec<Row>,

    /// Number of rows in `rows`.
    pub row_count: usize,
}

impl ResultSet {
    /// Creates an empty result set with the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            row_count: 0,
        }
    }

    /// Appends a row and bumps the row count.
    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
        self.row_count += 1;
    }

    /// Returns true if the result set holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of a single `execute` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Server informational messages, in emission order.
    #[serde(default)]
    pub messages: Vec<String>,

    #[serde(default)]
    pub result_sets: Vec<ResultSet>,

    pub elapsed_milliseconds: u64,

    pub total_rows_returned: usize,

    /// True when any result set had rows beyond the cap.
    pub was_truncated: bool,
}

impl QueryResponse {
    /// Builds a successful response from the collected result sets.
    pub fn success(
        result_sets: Vec<ResultSet>,
        messages: Vec<String>,
        elapsed: Duration,
        was_truncated: bool,
    ) -> Self {
        let total_rows_returned = result_sets.iter().map(|set| set.row_count).sum();
        Self {
            success: true,
            error_message: None,
            messages,
            result_sets,
            elapsed_milliseconds: elapsed_millis(elapsed),
            total_rows_returned,
            was_truncated,
        }
    }

    /// Builds a failed response carrying the driver's message verbatim.
    pub fn failure(error_message: impl Into<String>, messages: Vec<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            error_message: Some(error_message.into()),
            messages,
            result_sets: Vec::new(),
            elapsed_milliseconds: elapsed_millis(elapsed),
            total_rows_returned: 0,
            was_truncated: false,
        }
    }

    /// Builds the response returned when the batch was cancelled.
    pub fn cancelled(messages: Vec<String>, elapsed: Duration) -> Self {
        Self::failure(CANCELLED_MESSAGE, messages, elapsed)
    }

    /// Returns true if this response reports a cancellation.
    pub fn is_cancelled(&self) -> bool {
        !self.success && self.error_message.as_deref() == Some(CANCELLED_MESSAGE)
    }
}

fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Outcome of a connection test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl ConnectionTestResult {
    /// Creates a successful connection test result.
    pub fn connected(
        server_version: impl Into<String>,
        database_name: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            error_message: None,
            server_version: Some(server_version.into()),
            database_name: Some(database_name.into()),
            user_name: Some(user_name.into()),
        }
    }

    /// Creates a failed connection test result.
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(error_message.into()),
            ..Self::default()
        }
    }
}

/// A column value as delivered by the simple-query protocol.
///
/// Every non-NULL value arrives as its text representation. Serializes
/// untagged, so `Null` becomes JSON `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    String(String),
}

impl Value {
    /// The text of a non-NULL value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Null => None,
            Value::String(s) => Some(s),
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Option<&str>> for Value {
    fn from(v: Option<&str>) -> Self {
        v.map_or(Value::Null, Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_value_from_text() {
        assert_eq!(Value::from("hello"), Value::String("hello".to_string()));
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(Value::from(Some("42")).as_str(), Some("42"));
        assert_eq!(Value::Null.as_str(), None);
    }

    #[test]
    fn test_null_serializes_as_json_null() {
        let mut row = Row::new();
        row.insert("a".to_string(), Value::Null);
        row.insert("b".to_string(), Value::from("1"));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["a"], serde_json::Value::Null);
        assert_eq!(json["b"], serde_json::json!("1"));
    }

    #[test]
    fn test_request_limit_fallback_chain() {
        assert_eq!(QueryRequest::new("SELECT 1").effective_limit(), 100);
        assert_eq!(
            QueryRequest::new("SELECT 1").or_result_limit(25).effective_limit(),
            25
        );
        assert_eq!(
            QueryRequest::new("SELECT 1")
                .with_result_limit(5)
                .or_result_limit(25)
                .effective_limit(),
            5
        );
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: QueryRequest =
            serde_json::from_str(r#"{"sql":"SELECT 1","resultLimit":10}"#).unwrap();
        assert_eq!(request, QueryRequest::new("SELECT 1").with_result_limit(10));
    }

    #[test]
    fn test_success_response_sums_row_counts() {
        let mut first = ResultSet::new(vec!["a".to_string()]);
        first.push(Row::new());
        first.push(Row::new());
        let mut second = ResultSet::new(vec!["b".to_string()]);
        second.push(Row::new());

        let response = QueryResponse::success(
            vec![first, second],
            vec![],
            Duration::from_millis(12),
            false,
        );

        assert!(response.success);
        assert_eq!(response.total_rows_returned, 3);
        assert_eq!(response.elapsed_milliseconds, 12);
        assert_eq!(response.result_sets.len(), 2);
    }

    #[test]
    fn test_cancelled_response() {
        let response =
            QueryResponse::cancelled(vec!["before".to_string()], Duration::from_millis(3));
        assert!(!response.success);
        assert!(response.is_cancelled());
        assert!(response
            .error_message
            .as_deref()
            .unwrap()
            .to_lowercase()
            .contains("cancel"));
        assert_eq!(response.messages, vec!["before"]);
        assert!(response.result_sets.is_empty());
    }

    #[test]
    fn test_response_json_shape() {
        let response = QueryResponse::failure("boom", vec![], Duration::ZERO);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], serde_json::json!(false));
        assert_eq!(json["errorMessage"], serde_json::json!("boom"));
        assert_eq!(json["resultSets"], serde_json::json!([]));
        assert_eq!(json["wasTruncated"], serde_json::json!(false));
    }

    #[test]
    fn test_connection_test_result_failed() {
        let result = ConnectionTestResult::failed("password authentication failed");
        assert!(!result.success);
        assert_eq!(result.server_version, None);
        assert_eq!(
            result.error_message.as_deref(),
            Some("password authentication failed")
        );
    }
}
