//! # sqlspool
//!
//! Asynchronous write spool in front of a relational database.
//!
//! Writes are validated, queued in a bounded in-memory buffer and applied
//! by a background worker over a dedicated write session, individually or
//! batched into transactions. Reads run synchronously over a separate read
//! session with bounded retry. A periodic health checker probes both
//! sessions and repairs dead ones in place.
//!
//! ## Features
//!
//! - **Bounded statement queue** with non-blocking enqueue and explicit
//!   rejection at capacity
//! - **Insert shape gate** and conflict-verb rewriting
//!   (`INSERT` / `REPLACE` / `INSERT IGNORE`)
//! - **Batching worker** with transactional multi-insert and per-statement
//!   fallback on batch failure
//! - **Dual-session supervision** with liveness probes and automatic
//!   reconnect
//! - **Result materialization** to typed rows, JSON or string maps
//! - **Schema helpers** for table, column and index DDL
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sqlspool::{MySqlDriver, SpoolConfig, SpoolManager};
//!
//! #[tokio::main]
//! async fn main() -> sqlspool::Result<()> {
//!     let config = SpoolConfig::new("localhost", 3306, "writer", "secret", "metrics")
//!         .with_multi_insert(true);
//!     let spool = SpoolManager::connect(config, MySqlDriver).await?;
//!
//!     spool
//!         .enqueue("INSERT INTO events (name) VALUES ('started')", true)
//!         .await;
//!
//!     let rows = spool.query_as_json("SELECT * FROM events").await?;
//!     println!("{rows}");
//!
//!     spool.stop(false).await;
//!     spool.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature flags
//!
//! - `mysql` *(default)* — the [`MySqlDriver`] backend built on
//!   `mysql_async`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod driver;
pub mod error;
pub mod manager;
pub mod queue;
pub mod schema;
pub mod security;
pub mod statement;
pub mod types;

#[cfg(feature = "mysql")]
pub mod mysql;

pub use config::SpoolConfig;
pub use error::{Error, ErrorCategory, Result};
pub use manager::SpoolManager;
pub use statement::InsertType;
pub use types::{Row, Value};

#[cfg(feature = "mysql")]
pub use mysql::MySqlDriver;

/// Commonly used types, importable in one line
pub mod prelude {
    pub use crate::config::SpoolConfig;
    pub use crate::driver::{Connection, Driver};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::manager::SpoolManager;
    pub use crate::statement::InsertType;
    pub use crate::types::{Row, Value};

    #[cfg(feature = "mysql")]
    pub use crate::mysql::MySqlDriver;
}
