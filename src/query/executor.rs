//! Ad-hoc batch execution under a row cap.
//!
//! A [`QueryExecutor`] runs one batch per call on a fresh connection and
//! reports every database-side outcome, including cancellation, inside the
//! returned [`QueryResponse`]. Only argument validation fails with an error.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{
    BatchDriver, PostgresDriver, QueryRequest, QueryResponse, RemoteCancel, ResultSet, Row,
    RowSource, Value,
};
use crate::error::{Result, SqlCmdrError};

/// Server-side statement timeout applied to every batch.
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(300);

/// The command currently published for [`QueryExecutor::cancel_current`].
struct InFlightCommand {
    id: u64,
    abort: CancellationToken,
    /// Set once the batch has been submitted.
    remote: Option<Arc<dyn RemoteCancel>>,
    remote_requested: bool,
}

impl InFlightCommand {
    /// Asks the server to cancel the statement, at most once per command.
    fn cancel_remote(&mut self) {
        if self.remote_requested {
            return;
        }
        if let Some(remote) = &self.remote {
            self.remote_requested = true;
            spawn_remote_cancel(Arc::clone(remote));
        }
    }
}

/// Executes SQL batches and supports cancelling the one in flight.
///
/// One executor tracks a single in-flight command. If two `execute` calls
/// overlap on the same instance, `cancel_current` reaches whichever command
/// was published last.
pub struct QueryExecutor {
    driver: Arc<dyn BatchDriver>,
    current: Mutex<Option<InFlightCommand>>,
    next_id: AtomicU64,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExecutor {
    /// Creates an executor backed by PostgreSQL.
    pub fn new() -> Self {
        Self::with_driver(Arc::new(PostgresDriver::new()))
    }

    /// Creates an executor backed by the given driver.
    pub fn with_driver(driver: Arc<dyn BatchDriver>) -> Self {
        Self {
            driver,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Runs `request.sql` as a single batch.
    ///
    /// Returns `Err` only for a blank connection string or blank SQL.
    /// Connection failures, SQL errors and cancellation (through `cancel` or
    /// [`cancel_current`](Self::cancel_current)) produce a response with
    /// `success = false`.
    pub async fn execute(
        &self,
        connection_string: &str,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse> {
        if connection_string.trim().is_empty() {
            return Err(SqlCmdrError::invalid_argument(
                "Connection string cannot be null or empty.",
            ));
        }
        if request.sql.trim().is_empty() {
            return Err(SqlCmdrError::invalid_argument(
                "SQL query cannot be null or empty.",
            ));
        }

        let started = Instant::now();
        let limit = request.effective_limit();
        let abort = cancel.child_token();
        let id = self.publish(abort.clone());

        debug!(command = id, limit, "Executing batch");

        let mut source: Option<Box<dyn RowSource>> = None;
        let outcome = self
            .run_batch(id, connection_string, &request.sql, limit, &abort, &mut source)
            .await;

        let cancelled = matches!(outcome, Err(SqlCmdrError::Cancelled));
        if !self.finish(id, cancelled) && cancelled {
            // Replaced by an overlapping call; nothing else reaches this source.
            if let Some(remote) = source.as_ref().and_then(|s| s.remote_cancel()) {
                spawn_remote_cancel(remote);
            }
        }

        let messages = source
            .as_mut()
            .map(|source| source.take_messages())
            .unwrap_or_default();
        let elapsed = started.elapsed();

        let response = match outcome {
            Ok((result_sets, was_truncated)) => {
                let response =
                    QueryResponse::success(result_sets, messages, elapsed, was_truncated);
                info!(
                    command = id,
                    result_sets = response.result_sets.len(),
                    rows = response.total_rows_returned,
                    truncated = response.was_truncated,
                    elapsed_ms = response.elapsed_milliseconds,
                    "Batch completed"
                );
                response
            }
            Err(SqlCmdrError::Cancelled) => {
                info!(command = id, "Batch cancelled");
                QueryResponse::cancelled(messages, elapsed)
            }
            Err(e) => {
                warn!(command = id, error = %e, "Batch failed");
                QueryResponse::failure(e.driver_message(), messages, elapsed)
            }
        };

        Ok(response)
    }

    /// Cancels the command currently in flight, if any.
    ///
    /// Never fails and may be called any number of times, from any thread.
    pub fn cancel_current(&self) {
        let mut current = self.lock_current();
        let Some(command) = current.as_mut() else {
            debug!("No command in flight to cancel");
            return;
        };

        debug!(command = command.id, "Cancelling in-flight command");
        command.abort.cancel();
        command.cancel_remote();
    }

    /// Returns true while a command is published.
    pub fn is_in_flight(&self) -> bool {
        self.lock_current().is_some()
    }

    async fn run_batch(
        &self,
        id: u64,
        connection_string: &str,
        sql: &str,
        limit: usize,
        abort: &CancellationToken,
        slot: &mut Option<Box<dyn RowSource>>,
    ) -> Result<(Vec<ResultSet>, bool)> {
        let opened = guard(
            abort,
            self.driver.open_batch(connection_string, sql, BATCH_TIMEOUT),
        )
        .await?;

        self.attach_remote(id, opened.remote_cancel());
        let source = slot.insert(opened);

        collect_result_sets(&mut **source, limit, abort).await
    }

    fn publish(&self, abort: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.lock_current() = Some(InFlightCommand {
            id,
            abort,
            remote: None,
            remote_requested: false,
        });
        id
    }

    /// Stores the server-side cancel handle. A cancel that arrived while the
    /// batch was being opened is forwarded to the server now.
    fn attach_remote(&self, id: u64, remote: Option<Arc<dyn RemoteCancel>>) {
        let mut current = self.lock_current();
        if let Some(command) = current.as_mut().filter(|c| c.id == id) {
            command.remote = remote;
            if command.abort.is_cancelled() {
                command.cancel_remote();
            }
        }
    }

    /// Clears the published command if it is still the one with `id`, first
    /// sending the server-side cancel when the batch was cancelled.
    ///
    /// Returns false if an overlapping call has replaced the command.
    fn finish(&self, id: u64, cancelled: bool) -> bool {
        let mut current = self.lock_current();
        match current.as_mut().filter(|c| c.id == id) {
            Some(command) => {
                if cancelled {
                    command.cancel_remote();
                }
                *current = None;
                true
            }
            None => false,
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<InFlightCommand>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reads every result set of the batch, keeping at most `limit` rows of each.
///
/// After the cap, exactly one more row is read to detect truncation. That row
/// and the rest of the set are discarded.
async fn collect_result_sets(
    source: &mut dyn RowSource,
    limit: usize,
    abort: &CancellationToken,
) -> Result<(Vec<ResultSet>, bool)> {
    let mut result_sets = Vec::new();
    let mut was_truncated = false;

    while guard(abort, source.next_result_set()).await? {
        let columns = source.columns();
        let mut set = ResultSet::new(columns.clone());

        while set.row_count < limit {
            match guard(abort, source.next_row()).await? {
                Some(values) => set.push(to_row(&columns, values)),
                None => break,
            }
        }

        if set.row_count == limit && guard(abort, source.next_row()).await?.is_some() {
            warn!(
                result_set = result_sets.len(),
                limit, "Result set truncated"
            );
            was_truncated = true;
        }

        result_sets.push(set);
    }

    Ok((result_sets, was_truncated))
}

fn to_row(columns: &[String], values: Vec<Value>) -> Row {
    columns.iter().cloned().zip(values).collect()
}

/// Awaits `fut` unless `abort` fires first.
async fn guard<T>(
    abort: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(SqlCmdrError::Cancelled),
        result = fut => result,
    }
}

fn spawn_remote_cancel(remote: Arc<dyn RemoteCancel>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = remote.cancel().await {
                    debug!(error = %e, "Server-side cancel failed");
                }
            });
        }
        Err(_) => debug!("No runtime available for server-side cancel"),
    }
}
