//! Database abstraction layer for sqlcmdr.
//!
//! The query executor talks to the server through the [`BatchDriver`] and
//! [`RowSource`] traits so its row-cap, truncation and cancellation logic can
//! run against [`MockBatchDriver`] as well as PostgreSQL. Catalog
//! introspection lives in [`catalog`].

pub mod catalog;
mod mock;
mod postgres;
mod schema;
mod tls;
mod type_format;
mod types;

pub use catalog::MetadataService;
pub use mock::{MockBatchDriver, MockRowSource};
pub use postgres::PostgresDriver;
pub use schema::{
    full_name, quote_ident, ColumnMetadata, DatabaseMetadata, ForeignKeyMetadata,
    ParameterDirection, ParameterMetadata, RoutineKind, StoredProcedureMetadata, TableMetadata,
    ViewMetadata,
};
pub use tls::SslMode;
pub use type_format::{display_type, UNBOUNDED_LENGTH};
pub use types::{
    ConnectionTestResult, QueryRequest, QueryResponse, ResultSet, Row, Value,
    CANCELLED_MESSAGE, DEFAULT_RESULT_LIMIT,
};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Positional values of one row, in the current result set's column order.
pub type RawRow = Vec<Value>;

/// Opens a connection and submits a batch on it.
#[async_trait]
pub trait BatchDriver: Send + Sync {
    /// Opens a new connection, applies `timeout` as the server-side statement
    /// timeout and submits `sql` as a single batch.
    ///
    /// Connection failures are reported as `SqlCmdrError::Connection`,
    /// submission failures as `SqlCmdrError::Query`.
    async fn open_batch(
        &self,
        connection_string: &str,
        sql: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RowSource>>;
}

/// A cursor over the result sets of one submitted batch.
///
/// Starts positioned before the first result set.
#[async_trait]
pub trait RowSource: Send {
    /// Moves to the next result set, discarding any unread rows of the
    /// current one. Returns `false` once the batch has no more result sets.
    async fn next_result_set(&mut self) -> Result<bool>;

    /// Column names of the current result set.
    fn columns(&self) -> Vec<String>;

    /// Reads the next row of the current result set.
    async fn next_row(&mut self) -> Result<Option<RawRow>>;

    /// Drains the informational messages the server has emitted so far.
    fn take_messages(&mut self) -> Vec<String>;

    /// Handle that asks the server to stop the running statement, if the
    /// driver supports it.
    fn remote_cancel(&self) -> Option<Arc<dyn RemoteCancel>>;
}

/// Out-of-band cancellation of a running statement.
#[async_trait]
pub trait RemoteCancel: Send + Sync {
    async fn cancel(&self) -> Result<()>;
}
