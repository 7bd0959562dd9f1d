//! Error types for sqlspool
//!
//! Provides granular error classification for proper retry handling:
//! - Retriable errors (connection, timeout)
//! - Non-retriable errors (configuration, statement shape, type conversion)

use std::fmt;
use thiserror::Error;

/// Result type for sqlspool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Statement execution errors
    Execution,
    /// Transaction errors
    Transaction,
    /// Type conversion errors (not retriable)
    TypeConversion,
    /// Timeout errors (retriable)
    Timeout,
    /// Configuration error (fatal at construction)
    Configuration,
    /// Malformed statement rejected by the shape gate
    Statement,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

/// Main error type for sqlspool
#[derive(Error, Debug)]
pub enum Error {
    /// Connection could not be established or validated
    #[error("connection error: {message}")]
    Connection {
        /// Human-readable description
        message: String,
        /// Underlying driver error, when available
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Statement execution failed against a live connection
    #[error("execution error: {message}")]
    Execution {
        /// Human-readable description
        message: String,
        /// The offending SQL, when known
        sql: Option<String>,
        /// Underlying driver error, when available
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction begin/commit/rollback failed
    #[error("transaction error: {message}")]
    Transaction {
        /// Human-readable description
        message: String,
    },

    /// Cell value could not be converted to the generic value model
    #[error("type conversion error: {message}")]
    TypeConversion {
        /// Human-readable description
        message: String,
    },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout {
        /// Human-readable description
        message: String,
    },

    /// Configuration is missing or invalid; fatal at construction
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable description
        message: String,
    },

    /// Statement rejected by the shape validator
    #[error("malformed statement: {sql}")]
    Statement {
        /// The rejected SQL text
        sql: String,
    },

    /// Internal error
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable description
        message: String,
    },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Execution { .. } => ErrorCategory::Execution,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Statement { .. } => ErrorCategory::Statement,
            Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create an execution error carrying the offending SQL
    pub fn execution_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create an execution error with source
    pub fn execution_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            sql: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Execution => write!(f, "execution"),
            Self::Transaction => write!(f, "transaction"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Statement => write!(f, "statement"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retriable() {
        assert!(ErrorCategory::Connection.is_retriable());
        assert!(ErrorCategory::Timeout.is_retriable());

        assert!(!ErrorCategory::Configuration.is_retriable());
        assert!(!ErrorCategory::Execution.is_retriable());
        assert!(!ErrorCategory::TypeConversion.is_retriable());
        assert!(!ErrorCategory::Statement.is_retriable());
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::connection("refused").is_retriable());
        assert!(Error::timeout("timed out").is_retriable());

        assert!(!Error::config("missing user").is_retriable());
        assert!(!Error::execution("syntax error").is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection("connection refused");
        assert!(err.to_string().contains("connection refused"));

        let err = Error::execution_with_sql("syntax error", "INSERT INTO t");
        assert!(err.to_string().contains("syntax error"));

        let err = Error::Statement {
            sql: "DELETE FROM t".into(),
        };
        assert!(err.to_string().contains("DELETE FROM t"));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Connection.to_string(), "connection");
        assert_eq!(ErrorCategory::TypeConversion.to_string(), "type_conversion");
    }
}
