//! Spool manager: queue, worker, checker and the synchronous read path
//!
//! [`SpoolManager`] owns two database sessions with fixed roles. The write
//! session belongs to a background worker that drains the statement queue;
//! the read session serves synchronous queries. A periodic health checker
//! probes both and repairs dead sessions in place.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::SpoolConfig;
use crate::driver::{Connection, Driver};
use crate::error::{Error, Result};
use crate::queue::BoundedQueue;
use crate::statement::{ensure_insert_statement, rewrite_insert_type, InsertType};
use crate::types::{rows_to_json, Row};
use crate::{schema, security};

/// Delay before the worker's first drain attempt, giving the initial
/// connection a moment to settle
const STARTUP_GRACE: Duration = Duration::from_millis(100);

/// Backoff after a failed write or reconnect before the worker tries again
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Poll interval while a graceful stop waits for the queue to drain
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Number of attempts the read path makes before giving up
const READ_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between read attempts; scales linearly with the attempt number
const READ_RETRY_BASE: Duration = Duration::from_millis(100);

/// Which of the two sessions a slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Write,
    Read,
}

impl Role {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
        }
    }
}

/// One supervised session. The `Mutex<Option<..>>` is the single source of
/// truth for liveness; the generation counter increments on every
/// successful (re)connect.
struct ConnectionSlot {
    role: Role,
    conn: Mutex<Option<Box<dyn Connection>>>,
    generation: AtomicU64,
}

impl ConnectionSlot {
    fn new(role: Role) -> Self {
        Self {
            role,
            conn: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    async fn is_connected(&self) -> bool {
        match self.conn.lock().await.as_deref_mut() {
            Some(conn) => !conn.is_closed() && conn.is_valid().await,
            None => false,
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Establish a session into `guard` if none is live
    async fn ensure_locked(
        &self,
        guard: &mut Option<Box<dyn Connection>>,
        driver: &dyn Driver,
        config: &SpoolConfig,
    ) -> Result<()> {
        if matches!(guard.as_ref(), Some(conn) if !conn.is_closed()) {
            return Ok(());
        }
        let conn = driver.connect(config).await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            role = self.role.as_str(),
            generation,
            hostname = conn.hostname(),
            "session established"
        );
        *guard = Some(conn);
        Ok(())
    }

    async fn ensure_connected(&self, driver: &dyn Driver, config: &SpoolConfig) -> Result<()> {
        let mut guard = self.conn.lock().await;
        self.ensure_locked(&mut guard, driver, config).await
    }

    /// Drop the session so the next use reconnects
    async fn invalidate(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            if let Err(err) = conn.close().await {
                tracing::debug!(role = self.role.as_str(), error = %err, "close failed");
            }
        }
    }

    /// Probe the session and, when permitted, replace a dead one.
    ///
    /// Returns whether the slot ends up holding a live session.
    async fn check_and_repair(
        &self,
        driver: &dyn Driver,
        config: &SpoolConfig,
        autoreconnect: bool,
    ) -> bool {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_deref_mut() {
            if conn.is_valid().await {
                return true;
            }
            tracing::warn!(role = self.role.as_str(), "session failed health probe");
            *guard = None;
        }
        if !autoreconnect {
            return false;
        }
        match self.ensure_locked(&mut guard, driver, config).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(role = self.role.as_str(), error = %err, "reconnect failed");
                false
            }
        }
    }

    /// Execute a statement, connecting first if needed. A retriable failure
    /// drops the session so the next call reconnects.
    async fn execute(&self, driver: &dyn Driver, config: &SpoolConfig, sql: &str) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        self.ensure_locked(&mut guard, driver, config).await?;
        let conn = guard
            .as_deref_mut()
            .ok_or_else(|| Error::connection("no live session"))?;
        let result = conn.execute(sql).await;
        if matches!(&result, Err(err) if err.is_retriable()) {
            *guard = None;
        }
        result
    }

    async fn execute_transaction(
        &self,
        driver: &dyn Driver,
        config: &SpoolConfig,
        statements: &[String],
    ) -> Result<()> {
        let mut guard = self.conn.lock().await;
        self.ensure_locked(&mut guard, driver, config).await?;
        let conn = guard
            .as_deref_mut()
            .ok_or_else(|| Error::connection("no live session"))?;
        let result = conn.execute_transaction(statements).await;
        if matches!(&result, Err(err) if err.is_retriable()) {
            *guard = None;
        }
        result
    }

    /// Run a query over a session validated with a liveness probe first.
    /// A session that fails the probe is replaced before the query runs.
    async fn query_validated(
        &self,
        driver: &dyn Driver,
        config: &SpoolConfig,
        sql: &str,
    ) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_deref_mut() {
            if !conn.is_valid().await {
                tracing::warn!(role = self.role.as_str(), "stale session, reconnecting");
                *guard = None;
            }
        }
        self.ensure_locked(&mut guard, driver, config).await?;
        let conn = guard
            .as_deref_mut()
            .ok_or_else(|| Error::connection("no live session"))?;
        let result = conn.query(sql).await;
        if matches!(&result, Err(err) if err.is_retriable()) {
            *guard = None;
        }
        result
    }
}

/// State shared between the manager handle and its background tasks
struct Shared {
    config: SpoolConfig,
    driver: Box<dyn Driver>,
    queue: BoundedQueue<String>,
    write_slot: ConnectionSlot,
    read_slot: ConnectionSlot,
    worker_running: AtomicBool,
    checker_running: AtomicBool,
    multi_insert: AtomicBool,
    insert_type: std::sync::Mutex<InsertType>,
    error_count: AtomicU64,
    stop_signal: Notify,
}

/// Asynchronous write spool in front of a relational database.
///
/// Writes are queued through [`enqueue`](Self::enqueue) and applied in the
/// background; reads go through [`query`](Self::query) synchronously with
/// bounded retry. Call [`stop`](Self::stop) and then
/// [`shutdown`](Self::shutdown) to tear down cleanly.
pub struct SpoolManager {
    shared: Arc<Shared>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
    checker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SpoolManager {
    /// Validate the configuration, open the initial sessions and start the
    /// background worker and health checker.
    ///
    /// Initial connection failures are not fatal; the worker and checker
    /// keep retrying in the background.
    pub async fn connect(config: SpoolConfig, driver: impl Driver + 'static) -> Result<Self> {
        config.validate()?;

        let multi_insert = config.multi_insert;
        let shared = Arc::new(Shared {
            queue: BoundedQueue::new(config.queue_capacity),
            write_slot: ConnectionSlot::new(Role::Write),
            read_slot: ConnectionSlot::new(Role::Read),
            worker_running: AtomicBool::new(true),
            checker_running: AtomicBool::new(true),
            multi_insert: AtomicBool::new(multi_insert),
            insert_type: std::sync::Mutex::new(InsertType::Insert),
            error_count: AtomicU64::new(0),
            stop_signal: Notify::new(),
            driver: Box::new(driver),
            config,
        });

        for slot in [&shared.write_slot, &shared.read_slot] {
            if let Err(err) = slot
                .ensure_connected(shared.driver.as_ref(), &shared.config)
                .await
            {
                tracing::warn!(role = slot.role.as_str(), error = %err, "initial connect failed");
            }
        }

        let worker = tokio::spawn(worker_loop(Arc::clone(&shared)));
        let checker = tokio::spawn(checker_loop(Arc::clone(&shared)));

        Ok(Self {
            shared,
            worker: std::sync::Mutex::new(Some(worker)),
            checker: std::sync::Mutex::new(Some(checker)),
        })
    }

    /// Queue a write statement for background execution.
    ///
    /// With `check` set, the statement must pass the single-row
    /// INSERT/REPLACE shape gate; pass `false` to bypass the gate for
    /// statements the gate cannot express. The insert verb is rewritten to
    /// the manager's current [`InsertType`] either way.
    ///
    /// Returns `false` when the statement is rejected or the queue is full;
    /// a rejected statement is dropped, never partially queued.
    pub async fn enqueue(&self, sql: &str, check: bool) -> bool {
        if check {
            if let Err(err) = ensure_insert_statement(sql) {
                tracing::warn!(error = %err, "statement rejected by shape gate");
                return false;
            }
        }
        let target = *self
            .shared
            .insert_type
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let rewritten = rewrite_insert_type(sql, target);
        let accepted = self.shared.queue.enqueue(rewritten).await;
        if !accepted {
            tracing::warn!(
                capacity = self.shared.queue.capacity(),
                "queue full, statement dropped"
            );
        }
        accepted
    }

    /// Number of statements currently waiting in the queue
    pub async fn queue_size(&self) -> usize {
        self.shared.queue.len().await
    }

    /// Discard every queued statement; returns how many were dropped
    pub async fn clear_queue(&self) -> usize {
        let dropped = self.shared.queue.wipeout().await;
        if dropped > 0 {
            tracing::warn!(dropped, "queue cleared");
        }
        dropped
    }

    /// Stop the background tasks.
    ///
    /// With `force` the queue is discarded and the worker told to exit
    /// immediately. Without it, this waits for the worker to drain the
    /// queue before signalling the exit; pending writes are preserved.
    pub async fn stop(&self, force: bool) {
        self.shared.checker_running.store(false, Ordering::SeqCst);
        self.shared.stop_signal.notify_waiters();

        if force {
            self.shared.worker_running.store(false, Ordering::SeqCst);
            let dropped = self.shared.queue.wipeout().await;
            if dropped > 0 {
                tracing::warn!(dropped, "forced stop discarded queued statements");
            }
        } else {
            while !self.shared.queue.is_empty().await {
                tokio::time::sleep(DRAIN_POLL).await;
            }
            self.shared.worker_running.store(false, Ordering::SeqCst);
        }
    }

    /// Wait for the background tasks to exit and close both sessions.
    ///
    /// Calls [`stop`](Self::stop) gracefully first if it has not been
    /// called yet.
    pub async fn shutdown(&self) {
        if self.shared.worker_running.load(Ordering::SeqCst) {
            self.stop(false).await;
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = worker {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "worker task panicked");
            }
        }
        let checker = self
            .checker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = checker {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "checker task panicked");
            }
        }

        self.shared.write_slot.invalidate().await;
        self.shared.read_slot.invalidate().await;
        tracing::info!("spool manager shut down");
    }

    /// Whether both sessions are currently live
    pub async fn is_connected(&self) -> bool {
        self.shared.write_slot.is_connected().await && self.shared.read_slot.is_connected().await
    }

    /// Reconnect generations of the write and read sessions, in that order.
    ///
    /// Each counter increments on every successful (re)connect of its slot.
    pub fn connection_generations(&self) -> (u64, u64) {
        (
            self.shared.write_slot.generation(),
            self.shared.read_slot.generation(),
        )
    }

    /// Whether the background worker is (still) supposed to run
    pub fn is_worker_running(&self) -> bool {
        self.shared.worker_running.load(Ordering::SeqCst)
    }

    /// Whether the health checker is (still) supposed to run
    pub fn is_checker_running(&self) -> bool {
        self.shared.checker_running.load(Ordering::SeqCst)
    }

    /// Toggle batching mode at runtime; takes effect on the next drain cycle
    pub fn set_multi_insert(&self, enabled: bool) {
        self.shared.multi_insert.store(enabled, Ordering::SeqCst);
    }

    /// Whether the worker batches queued statements into transactions
    pub fn is_multi_insert(&self) -> bool {
        self.shared.multi_insert.load(Ordering::SeqCst)
    }

    /// Set the conflict semantics applied to subsequently queued statements
    pub fn set_insert_type(&self, insert_type: InsertType) {
        *self
            .shared
            .insert_type
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = insert_type;
    }

    /// Current conflict semantics for queued statements
    pub fn insert_type(&self) -> InsertType {
        *self
            .shared
            .insert_type
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of writes discarded since the last call; resets the counter
    pub fn take_error_count(&self) -> u64 {
        self.shared.error_count.swap(0, Ordering::SeqCst)
    }

    /// Run a query over the read session.
    ///
    /// Retries up to three times with linear backoff; a session that fails
    /// its liveness probe is replaced before each attempt. Returns the last
    /// error once the attempts are exhausted.
    pub async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let mut last_err = None;
        for attempt in 1..=READ_RETRY_ATTEMPTS {
            match self
                .shared
                .read_slot
                .query_validated(self.shared.driver.as_ref(), &self.shared.config, sql)
                .await
            {
                Ok(rows) => return Ok(rows),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "query attempt failed");
                    last_err = Some(err);
                    tokio::time::sleep(READ_RETRY_BASE * attempt).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::internal("query retries exhausted")))
    }

    /// Run a query and materialize the result set as a JSON array of
    /// objects, one per row, columns in driver-reported order
    pub async fn query_as_json(&self, sql: &str) -> Result<serde_json::Value> {
        Ok(rows_to_json(&self.query(sql).await?))
    }

    /// Run a query and return each row as a name → display-string map.
    ///
    /// Lossy by design: every value is coerced to text and NULL becomes the
    /// empty string.
    pub async fn select(&self, sql: &str) -> Result<Vec<HashMap<String, String>>> {
        let rows = self.query(sql).await?;
        Ok(rows.into_iter().map(Row::into_string_map).collect())
    }

    /// Probe the server over the read session with `SELECT 1`
    pub async fn ping(&self) -> bool {
        let result = self
            .shared
            .read_slot
            .query_validated(self.shared.driver.as_ref(), &self.shared.config, "SELECT 1")
            .await;
        match result {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.get(0))
                .and_then(crate::types::Value::as_i64)
                == Some(1),
            Err(err) => {
                tracing::warn!(error = %err, "ping failed");
                false
            }
        }
    }

    /// Create a table if it does not exist, executed over the write session
    pub async fn create_table(&self, table: &str, columns: &[(String, String)]) -> Result<()> {
        let sql = schema::create_table_sql(table, columns)?;
        self.execute_write(&sql).await.map(|_| ())
    }

    /// Drop a table if it exists
    pub async fn drop_table(&self, table: &str) -> Result<()> {
        let sql = schema::drop_table_sql(table)?;
        self.execute_write(&sql).await.map(|_| ())
    }

    /// Add columns to an existing table
    pub async fn add_columns(&self, table: &str, columns: &[(String, String)]) -> Result<()> {
        let sql = schema::add_columns_sql(table, columns)?;
        self.execute_write(&sql).await.map(|_| ())
    }

    /// Create an index over the given columns
    pub async fn create_index(
        &self,
        table: &str,
        index: &str,
        columns: &[String],
        unique: bool,
    ) -> Result<()> {
        let sql = schema::create_index_sql(table, index, columns, unique)?;
        self.execute_write(&sql).await.map(|_| ())
    }

    /// List a table's columns as `(name, TYPE)` pairs in definition order.
    ///
    /// Type specifications are uppercased; names are returned as reported.
    pub async fn get_table_columns(&self, table: &str) -> Result<Vec<(String, String)>> {
        security::validate_identifier(table)?;
        let sql = schema::table_columns_sql(table)?;
        let rows = self.query(&sql).await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row
                .get(0)
                .ok_or_else(|| {
                    Error::type_conversion("column listing row is missing the name cell")
                })?
                .to_coerced_string();
            let type_name = row
                .get(1)
                .ok_or_else(|| {
                    Error::type_conversion("column listing row is missing the type cell")
                })?
                .to_coerced_string()
                .to_uppercase();
            columns.push((name, type_name));
        }
        Ok(columns)
    }

    /// Run a DDL or administrative statement synchronously over the write
    /// session, bypassing the queue
    async fn execute_write(&self, sql: &str) -> Result<u64> {
        self.shared
            .write_slot
            .execute(self.shared.driver.as_ref(), &self.shared.config, sql)
            .await
    }
}

/// Background task draining the statement queue over the write session
async fn worker_loop(shared: Arc<Shared>) {
    tokio::time::sleep(STARTUP_GRACE).await;
    tracing::debug!("write worker started");

    while shared.worker_running.load(Ordering::SeqCst) {
        if shared.multi_insert.load(Ordering::SeqCst) {
            drain_batch(&shared).await;
        } else {
            drain_single(&shared).await;
        }
    }
    tracing::debug!("write worker exited");
}

/// One single-statement drain cycle: dequeue one, execute it.
///
/// A retriable failure re-queues the statement and backs off; any other
/// failure discards it and bumps the error counter.
async fn drain_single(shared: &Shared) {
    let Some(sql) = shared.queue.dequeue(shared.config.dequeue_timeout()).await else {
        return;
    };

    match shared
        .write_slot
        .execute(shared.driver.as_ref(), &shared.config, &sql)
        .await
    {
        Ok(affected) => {
            tracing::debug!(affected, "statement applied");
        }
        Err(err) if err.is_retriable() => {
            tracing::warn!(error = %err, "write failed, statement requeued");
            if !shared.queue.enqueue(sql).await {
                tracing::error!("queue full during requeue, statement dropped");
                shared.error_count.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
        Err(err) => {
            tracing::error!(error = %err, sql, "statement discarded");
            shared.error_count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
    }
}

/// One batched drain cycle: block for the first statement, sweep the rest
/// of the queue into the batch and apply it as a single transaction.
///
/// When the transaction fails, each statement is retried individually once;
/// statements that still fail are discarded and counted.
async fn drain_batch(shared: &Shared) {
    let Some(first) = shared.queue.dequeue(shared.config.dequeue_timeout()).await else {
        return;
    };
    let mut batch = vec![first];
    batch.extend(shared.queue.drain().await);

    match shared
        .write_slot
        .execute_transaction(shared.driver.as_ref(), &shared.config, &batch)
        .await
    {
        Ok(()) => {
            tracing::debug!(statements = batch.len(), "batch applied");
            return;
        }
        Err(err) => {
            tracing::warn!(
                statements = batch.len(),
                error = %err,
                "batch failed, retrying statements individually"
            );
        }
    }

    for sql in batch {
        match shared
            .write_slot
            .execute(shared.driver.as_ref(), &shared.config, &sql)
            .await
        {
            Ok(_) => {}
            Err(err) => {
                tracing::error!(error = %err, sql, "statement discarded");
                shared.error_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Background task probing both sessions once per configured interval.
///
/// The first probe happens a full interval after startup. Repairs are
/// gated on the `autoreconnect` setting.
async fn checker_loop(shared: Arc<Shared>) {
    tracing::debug!("health checker started");
    while shared.checker_running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = tokio::time::sleep(shared.config.checker_interval()) => {}
            _ = shared.stop_signal.notified() => continue,
        }
        if !shared.checker_running.load(Ordering::SeqCst) {
            break;
        }

        let autoreconnect = shared.config.autoreconnect;
        let write_ok = shared
            .write_slot
            .check_and_repair(shared.driver.as_ref(), &shared.config, autoreconnect)
            .await;
        let read_ok = shared
            .read_slot
            .check_and_repair(shared.driver.as_ref(), &shared.config, autoreconnect)
            .await;
        tracing::debug!(write_ok, read_ok, "health check complete");
    }
    tracing::debug!("health checker exited");
}
