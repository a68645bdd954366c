//! PostgreSQL batch driver.
//!
//! Runs ad-hoc batches over the simple-query protocol with tokio-postgres,
//! which exposes what the executor needs from the wire: one
//! `RowDescription`/`CommandComplete` run per statement, `NOTICE` responses
//! and an out-of-band cancel key. Connections and cancel requests go
//! through the rustls connector `sslmode` selects.

use crate::db::tls;
use crate::db::{BatchDriver, RawRow, RemoteCancel, RowSource, Value};
use crate::error::{Result, SqlCmdrError};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_postgres::{
    AsyncMessage, CancelToken, Client, Connection, SimpleQueryMessage, SimpleQueryRow,
    SimpleQueryStream,
};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::debug;

/// Production [`BatchDriver`] for PostgreSQL.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BatchDriver for PostgresDriver {
    async fn open_batch(
        &self,
        connection_string: &str,
        sql: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RowSource>> {
        let (connection_string, ssl_mode) = tls::split_ssl_mode(connection_string)?;
        let connector = tls::make_connector(ssl_mode)?;
        debug!(?ssl_mode, "Connecting");

        let (client, connection) = tokio_postgres::connect(&connection_string, connector.clone())
            .await
            .map_err(|e| SqlCmdrError::connection(driver_message(&e)))?;

        let (notice_tx, notices) = mpsc::unbounded_channel();
        tokio::spawn(pump_connection(connection, notice_tx));

        client
            .batch_execute(&format!("SET statement_timeout = {}", timeout.as_millis()))
            .await
            .map_err(|e| SqlCmdrError::query(driver_message(&e)))?;

        let stream = client
            .simple_query_raw(sql)
            .await
            .map_err(|e| SqlCmdrError::query(driver_message(&e)))?;

        debug!("Batch submitted");

        Ok(Box::new(PgBatchSource {
            cancel_token: client.cancel_token(),
            connector,
            _client: client,
            stream: Box::pin(stream),
            columns: Vec::new(),
            pending: None,
            in_result_set: false,
            notices,
        }))
    }
}

/// Drives the connection and forwards server notices in arrival order.
///
/// A notice is forwarded before any response that follows it on the wire, so
/// by the time the batch stream ends every notice it raised is queued.
async fn pump_connection<S, T>(
    mut connection: Connection<S, T>,
    notices: mpsc::UnboundedSender<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut messages = futures::stream::poll_fn(move |cx| connection.poll_message(cx));

    while let Some(message) = messages.next().await {
        match message {
            Ok(AsyncMessage::Notice(notice)) => {
                let _ = notices.send(notice.message().to_string());
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Connection closed with error");
                break;
            }
        }
    }
}

/// Result-set cursor over a simple-query response stream.
struct PgBatchSource {
    cancel_token: CancelToken,
    connector: MakeRustlsConnect,
    // Keeps the request channel open until the batch is consumed.
    _client: Client,
    stream: Pin<Box<SimpleQueryStream>>,
    columns: Vec<String>,
    /// First row of a result set that arrived without a row description.
    pending: Option<SimpleQueryRow>,
    in_result_set: bool,
    notices: mpsc::UnboundedReceiver<String>,
}

impl PgBatchSource {
    async fn next_message(&mut self) -> Result<Option<SimpleQueryMessage>> {
        self.stream
            .try_next()
            .await
            .map_err(|e| SqlCmdrError::query(driver_message(&e)))
    }
}

#[async_trait]
impl RowSource for PgBatchSource {
    async fn next_result_set(&mut self) -> Result<bool> {
        // Rows left over from a truncated set are read off the wire and dropped.
        while self.in_result_set {
            self.next_row().await?;
        }

        loop {
            match self.next_message().await? {
                Some(SimpleQueryMessage::RowDescription(columns)) => {
                    self.columns = columns.iter().map(|c| c.name().to_string()).collect();
                    self.in_result_set = true;
                    return Ok(true);
                }
                Some(SimpleQueryMessage::Row(row)) => {
                    self.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    self.pending = Some(row);
                    self.in_result_set = true;
                    return Ok(true);
                }
                // CommandComplete of a statement that returns no rows.
                Some(_) => continue,
                None => return Ok(false),
            }
        }
    }

    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    async fn next_row(&mut self) -> Result<Option<RawRow>> {
        if !self.in_result_set {
            return Ok(None);
        }

        if let Some(row) = self.pending.take() {
            return Ok(Some(convert_row(&row)));
        }

        match self.next_message().await? {
            Some(SimpleQueryMessage::Row(row)) => Ok(Some(convert_row(&row))),
            _ => {
                self.in_result_set = false;
                Ok(None)
            }
        }
    }

    fn take_messages(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(message) = self.notices.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn remote_cancel(&self) -> Option<Arc<dyn RemoteCancel>> {
        Some(Arc::new(PgRemoteCancel {
            token: self.cancel_token.clone(),
            connector: self.connector.clone(),
        }))
    }
}

/// Converts a simple-query row to positional values; SQL NULL becomes `Value::Null`.
fn convert_row(row: &SimpleQueryRow) -> RawRow {
    (0..row.len())
        .map(|i| Value::from(row.get(i)))
        .collect()
}

/// Sends the cancel request with the connector the batch connected with.
struct PgRemoteCancel {
    token: CancelToken,
    connector: MakeRustlsConnect,
}

#[async_trait]
impl RemoteCancel for PgRemoteCancel {
    async fn cancel(&self) -> Result<()> {
        self.token
            .cancel_query(self.connector.clone())
            .await
            .map_err(|e| SqlCmdrError::connection(driver_message(&e)))
    }
}

/// Returns the server's own message for database errors, or the driver's
/// display text otherwise.
fn driver_message(error: &tokio_postgres::Error) -> String {
    match error.as_db_error() {
        Some(db_error) => db_error.message().to_string(),
        None => error.to_string(),
    }
}
