//! Scripted in-memory driver for exercising the manager without a server

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlspool::config::SpoolConfig;
use sqlspool::driver::{Connection, Driver};
use sqlspool::error::{Error, Result};
use sqlspool::types::Row;

/// Shared script and recording state behind a [`MockDriver`]
pub struct MockState {
    executed: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    fail_substring: Mutex<Option<String>>,
    query_failures: AtomicUsize,
    query_results: Mutex<VecDeque<Vec<Row>>>,
    connect_failures: AtomicUsize,
    connections: AtomicUsize,
    valid: AtomicBool,
}

impl MockState {
    fn new() -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            fail_substring: Mutex::new(None),
            query_failures: AtomicUsize::new(0),
            query_results: Mutex::new(VecDeque::new()),
            connect_failures: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            valid: AtomicBool::new(true),
        }
    }

    /// Statements applied so far, in execution order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Queries observed so far
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Fail any write whose SQL contains `marker`
    pub fn set_fail_substring(&self, marker: Option<&str>) {
        *self.fail_substring.lock().unwrap() = marker.map(str::to_string);
    }

    /// Fail the next `n` queries with a connection error
    pub fn set_query_failures(&self, n: usize) {
        self.query_failures.store(n, Ordering::SeqCst);
    }

    /// Script the result set for an upcoming query
    pub fn push_query_result(&self, rows: Vec<Row>) {
        self.query_results.lock().unwrap().push_back(rows);
    }

    /// Fail the next `n` connection attempts
    pub fn set_connect_failures(&self, n: usize) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Number of sessions opened so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Toggle the liveness probe result for every open session
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    fn should_fail(&self, sql: &str) -> bool {
        matches!(self.fail_substring.lock().unwrap().as_deref(), Some(marker) if sql.contains(marker))
    }
}

/// Driver handing out scripted in-memory sessions
#[derive(Clone)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::new());
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(&self, _config: &SpoolConfig) -> Result<Box<dyn Connection>> {
        let remaining = self.state.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state
                .connect_failures
                .store(remaining.saturating_sub(1), Ordering::SeqCst);
            return Err(Error::connection("scripted connect failure"));
        }
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    closed: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        if self.state.should_fail(sql) {
            return Err(Error::execution_with_sql("scripted write failure", sql));
        }
        self.state.executed.lock().unwrap().push(sql.to_string());
        Ok(1)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.state.queries.lock().unwrap().push(sql.to_string());
        let failures = self.state.query_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.state
                .query_failures
                .store(failures - 1, Ordering::SeqCst);
            return Err(Error::connection("scripted query failure"));
        }
        Ok(self
            .state
            .query_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn execute_transaction(&mut self, statements: &[String]) -> Result<()> {
        // All or nothing: a failing statement leaves no trace.
        if let Some(bad) = statements.iter().find(|sql| self.state.should_fail(sql)) {
            return Err(Error::execution_with_sql("scripted batch failure", bad));
        }
        let mut executed = self.state.executed.lock().unwrap();
        executed.extend(statements.iter().cloned());
        Ok(())
    }

    async fn is_valid(&mut self) -> bool {
        self.state.valid.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn hostname(&self) -> &str {
        "mock"
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Install a log subscriber honoring `RUST_LOG`; idempotent across tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `probe` until it reports true or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
