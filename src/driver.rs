//! Driver abstraction
//!
//! The manager talks to the database only through these traits, so the
//! worker, checker and read path can be exercised against a scripted
//! in-memory driver as well as a real server.

use async_trait::async_trait;

use crate::config::SpoolConfig;
use crate::error::Result;
use crate::types::Row;

/// Factory for database sessions
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a new session against the configured server
    async fn connect(&self, config: &SpoolConfig) -> Result<Box<dyn Connection>>;
}

/// A single database session
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement that returns no rows; returns affected row count
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Execute a query and materialize the full result set
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Execute a batch of statements atomically.
    ///
    /// Implementations roll back on the first failure; on error none of the
    /// statements are visible.
    async fn execute_transaction(&mut self, statements: &[String]) -> Result<()>;

    /// Probe liveness with a round trip to the server
    async fn is_valid(&mut self) -> bool;

    /// Whether the session has been closed locally
    fn is_closed(&self) -> bool;

    /// Hostname this session was opened against
    fn hostname(&self) -> &str;

    /// Close the session
    async fn close(&mut self) -> Result<()>;
}
