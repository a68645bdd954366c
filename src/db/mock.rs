//! Mock batch driver for testing.
//!
//! Replays scripted result sets, messages and failures so the executor can be
//! tested without a server.

use super::{BatchDriver, RawRow, RemoteCancel, RowSource, Value};
use crate::error::{Result, SqlCmdrError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted result set.
#[derive(Debug, Clone, Default)]
struct ScriptedSet {
    columns: Vec<String>,
    rows: Vec<RawRow>,
}

/// A mock driver that hands out a fresh [`MockRowSource`] per batch.
#[derive(Debug, Clone, Default)]
pub struct MockBatchDriver {
    sets: Vec<ScriptedSet>,
    messages: Vec<String>,
    connect_error: Option<String>,
    /// Fails when the given result set index is reached.
    fail_at_set: Option<(usize, String)>,
    /// Blocks every row read until the batch is cancelled.
    stall: bool,
    opened: Arc<AtomicUsize>,
    rows_read: Arc<AtomicUsize>,
    remote_cancels: Arc<AtomicUsize>,
    last_timeout: Arc<Mutex<Option<Duration>>>,
}

impl MockBatchDriver {
    /// Creates a driver whose batches produce no result sets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a result set to the script.
    pub fn with_result_set(mut self, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.sets.push(ScriptedSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        });
        self
    }

    /// Appends a single-column result set with `count` rows numbered from 0.
    pub fn with_numbered_rows(self, column: &str, count: usize) -> Self {
        let rows = (0..count).map(|i| vec![Value::from(i.to_string())]).collect();
        self.with_result_set(&[column], rows)
    }

    /// Adds a server message emitted while the batch runs.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// Makes opening the connection fail with `message`.
    pub fn failing_connect(mut self, message: impl Into<String>) -> Self {
        self.connect_error = Some(message.into());
        self
    }

    /// Makes the batch fail with `message` when result set `index` is reached.
    pub fn failing_at_set(mut self, index: usize, message: impl Into<String>) -> Self {
        self.fail_at_set = Some((index, message.into()));
        self
    }

    /// Makes every row read hang, simulating a long-running statement.
    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Number of batches opened through this driver.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of rows handed to the executor, including truncation peeks.
    pub fn rows_read(&self) -> usize {
        self.rows_read.load(Ordering::SeqCst)
    }

    /// Number of server-side cancel requests issued.
    pub fn remote_cancels(&self) -> usize {
        self.remote_cancels.load(Ordering::SeqCst)
    }

    /// Statement timeout passed with the most recent batch.
    pub fn last_timeout(&self) -> Option<Duration> {
        *self
            .last_timeout
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl BatchDriver for MockBatchDriver {
    async fn open_batch(
        &self,
        _connection_string: &str,
        _sql: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RowSource>> {
        if let Some(message) = &self.connect_error {
            return Err(SqlCmdrError::connection(message.clone()));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        *self
            .last_timeout
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(timeout);

        Ok(Box::new(MockRowSource {
            sets: self.sets.iter().cloned().collect(),
            current: None,
            sets_started: 0,
            messages: self.messages.clone(),
            fail_at_set: self.fail_at_set.clone(),
            stall: self.stall,
            rows_read: Arc::clone(&self.rows_read),
            remote_cancels: Arc::clone(&self.remote_cancels),
        }))
    }
}

/// Row source replaying a [`MockBatchDriver`] script.
pub struct MockRowSource {
    sets: VecDeque<ScriptedSet>,
    current: Option<(Vec<String>, VecDeque<RawRow>)>,
    sets_started: usize,
    messages: Vec<String>,
    fail_at_set: Option<(usize, String)>,
    stall: bool,
    rows_read: Arc<AtomicUsize>,
    remote_cancels: Arc<AtomicUsize>,
}

#[async_trait]
impl RowSource for MockRowSource {
    async fn next_result_set(&mut self) -> Result<bool> {
        if let Some((index, message)) = &self.fail_at_set {
            if *index == self.sets_started {
                return Err(SqlCmdrError::query(message.clone()));
            }
        }

        match self.sets.pop_front() {
            Some(set) => {
                self.sets_started += 1;
                self.current = Some((set.columns, set.rows.into()));
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    fn columns(&self) -> Vec<String> {
        self.current
            .as_ref()
            .map(|(columns, _)| columns.clone())
            .unwrap_or_default()
    }

    async fn next_row(&mut self) -> Result<Option<RawRow>> {
        if self.stall {
            futures::future::pending::<()>().await;
        }

        let row = self
            .current
            .as_mut()
            .and_then(|(_, rows)| rows.pop_front());
        if row.is_some() {
            self.rows_read.fetch_add(1, Ordering::SeqCst);
        }
        Ok(row)
    }

    fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    fn remote_cancel(&self) -> Option<Arc<dyn RemoteCancel>> {
        Some(Arc::new(MockRemoteCancel {
            count: Arc::clone(&self.remote_cancels),
        }))
    }
}

struct MockRemoteCancel {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl RemoteCancel for MockRemoteCancel {
    async fn cancel(&self) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
