//! MySQL / MariaDB driver backed by `mysql_async`

use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder};
use std::time::Duration;

use crate::config::SpoolConfig;
use crate::driver::{Connection, Driver};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Keep-alive probe interval passed to the driver, milliseconds
const TCP_KEEPALIVE_MS: u32 = 10_000;

/// Driver opening sessions against a MySQL or MariaDB server
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDriver;

#[async_trait]
impl Driver for MySqlDriver {
    async fn connect(&self, config: &SpoolConfig) -> Result<Box<dyn Connection>> {
        let opts = Opts::from_url(&config.uri())
            .map_err(|err| Error::config(format!("invalid connection URI: {err}")))?;
        let mut builder = OptsBuilder::from_opts(opts)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()));
        if config.tcp_keepalive {
            builder = builder.tcp_keepalive(Some(TCP_KEEPALIVE_MS));
        }

        let conn = tokio::time::timeout(config.connect_timeout(), Conn::new(builder))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "connect to {} timed out after {:?}",
                    config.hostname,
                    config.connect_timeout()
                ))
            })?
            .map_err(map_mysql_err)?;

        Ok(Box::new(MySqlConnection {
            conn: Some(conn),
            hostname: config.hostname.clone(),
            socket_timeout: config.socket_timeout(),
            closed: false,
        }))
    }
}

/// A single session against a MySQL or MariaDB server
pub struct MySqlConnection {
    // `Conn::disconnect` consumes the value, hence the Option.
    conn: Option<Conn>,
    hostname: String,
    socket_timeout: Duration,
    closed: bool,
}

impl MySqlConnection {
    fn conn_mut(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::connection("session is closed"))
    }

    /// Bound a driver round trip by the configured socket timeout
    async fn bounded<T>(
        timeout: Duration,
        fut: impl std::future::Future<Output = std::result::Result<T, mysql_async::Error>>,
    ) -> Result<T> {
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::timeout(format!("operation timed out after {timeout:?}")))?
            .map_err(map_mysql_err)
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let timeout = self.socket_timeout;
        let conn = self.conn_mut()?;
        Self::bounded(timeout, conn.query_drop(sql))
            .await
            .map_err(|err| match err {
                Error::Execution { message, source, .. } => Error::Execution {
                    message,
                    sql: Some(sql.to_string()),
                    source,
                },
                other => other,
            })?;
        Ok(conn.affected_rows())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let timeout = self.socket_timeout;
        let conn = self.conn_mut()?;
        let raw: Vec<mysql_async::Row> = Self::bounded(timeout, conn.query(sql)).await?;

        let mut rows = Vec::with_capacity(raw.len());
        for mut row in raw {
            let columns = row.columns();
            let names: Vec<String> = columns.iter().map(|c| c.name_str().to_string()).collect();
            let mut values = Vec::with_capacity(columns.len());
            for (idx, column) in columns.iter().enumerate() {
                let cell = row
                    .take::<mysql_async::Value, _>(idx)
                    .unwrap_or(mysql_async::Value::NULL);
                values.push(cell_to_value(column.column_type(), cell));
            }
            rows.push(Row::new(names, values));
        }
        Ok(rows)
    }

    async fn execute_transaction(&mut self, statements: &[String]) -> Result<()> {
        let timeout = self.socket_timeout;
        let conn = self.conn_mut()?;

        Self::bounded(timeout, conn.query_drop("START TRANSACTION"))
            .await
            .map_err(|err| Error::transaction(format!("begin failed: {err}")))?;

        for sql in statements {
            if let Err(err) = Self::bounded(timeout, conn.query_drop(sql)).await {
                // Best effort; the server discards the transaction anyway
                // when the session drops.
                if let Err(rollback_err) =
                    Self::bounded(timeout, conn.query_drop("ROLLBACK")).await
                {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                return Err(err);
            }
        }

        Self::bounded(timeout, conn.query_drop("COMMIT"))
            .await
            .map_err(|err| Error::transaction(format!("commit failed: {err}")))
    }

    async fn is_valid(&mut self) -> bool {
        let timeout = self.socket_timeout;
        match self.conn_mut() {
            Ok(conn) => Self::bounded(timeout, conn.ping()).await.is_ok(),
            Err(_) => false,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed || self.conn.is_none()
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        if let Some(conn) = self.conn.take() {
            conn.disconnect().await.map_err(map_mysql_err)?;
        }
        Ok(())
    }
}

fn map_mysql_err(err: mysql_async::Error) -> Error {
    match err {
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => {
            Error::connection_with_source("driver error", err)
        }
        mysql_async::Error::Server(ref server) => {
            let message = format!("server error {}", server.code);
            Error::execution_with_source(message, err)
        }
        other => Error::execution_with_source("query failed", other),
    }
}

/// Convert one result cell to the generic value model.
///
/// Signed integers keep 32-bit width for INTEGER-and-smaller columns;
/// unsigned values that overflow `i64` degrade to NULL with a warning.
/// Temporal cells are rendered as text.
fn cell_to_value(column_type: ColumnType, cell: mysql_async::Value) -> Value {
    match cell {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Int(n) => match column_type {
            ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_YEAR => match i32::try_from(n) {
                Ok(v) => Value::Int32(v),
                Err(_) => Value::Int64(n),
            },
            _ => Value::Int64(n),
        },
        mysql_async::Value::UInt(n) => match i64::try_from(n) {
            Ok(v) => match column_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_YEAR => match i32::try_from(v) {
                    Ok(v) => Value::Int32(v),
                    Err(_) => Value::Int64(v),
                },
                _ => Value::Int64(v),
            },
            Err(_) => {
                tracing::warn!(value = n, "unsigned value exceeds i64, rendered as NULL");
                Value::Null
            }
        },
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Bytes(bytes) => {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        mysql_async::Value::Date(year, month, day, hour, minute, second, micros) => {
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                Value::String(format!("{year:04}-{month:02}-{day:02}"))
            } else if micros > 0 {
                Value::String(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
                ))
            } else {
                Value::String(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                ))
            }
        }
        mysql_async::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if negative { "-" } else { "" };
            let hours = u32::from(hours) + days * 24;
            if micros > 0 {
                Value::String(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}"))
            } else {
                Value::String(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_width_follows_column_type() {
        assert_eq!(
            cell_to_value(ColumnType::MYSQL_TYPE_LONG, mysql_async::Value::Int(5)),
            Value::Int32(5)
        );
        assert_eq!(
            cell_to_value(ColumnType::MYSQL_TYPE_LONGLONG, mysql_async::Value::Int(5)),
            Value::Int64(5)
        );
        // Out-of-range for the declared width falls back to 64-bit.
        assert_eq!(
            cell_to_value(
                ColumnType::MYSQL_TYPE_LONG,
                mysql_async::Value::Int(i64::MAX)
            ),
            Value::Int64(i64::MAX)
        );
    }

    #[test]
    fn test_unsigned_overflow_degrades_to_null() {
        assert_eq!(
            cell_to_value(
                ColumnType::MYSQL_TYPE_LONGLONG,
                mysql_async::Value::UInt(u64::MAX)
            ),
            Value::Null
        );
        assert_eq!(
            cell_to_value(ColumnType::MYSQL_TYPE_LONGLONG, mysql_async::Value::UInt(7)),
            Value::Int64(7)
        );
    }

    #[test]
    fn test_bytes_render_as_text() {
        assert_eq!(
            cell_to_value(
                ColumnType::MYSQL_TYPE_VAR_STRING,
                mysql_async::Value::Bytes(b"hello".to_vec())
            ),
            Value::String("hello".into())
        );
    }

    #[test]
    fn test_temporal_rendering() {
        assert_eq!(
            cell_to_value(
                ColumnType::MYSQL_TYPE_DATE,
                mysql_async::Value::Date(2024, 1, 2, 0, 0, 0, 0)
            ),
            Value::String("2024-01-02".into())
        );
        assert_eq!(
            cell_to_value(
                ColumnType::MYSQL_TYPE_DATETIME,
                mysql_async::Value::Date(2024, 1, 2, 3, 4, 5, 0)
            ),
            Value::String("2024-01-02 03:04:05".into())
        );
        assert_eq!(
            cell_to_value(
                ColumnType::MYSQL_TYPE_TIME,
                mysql_async::Value::Time(false, 1, 2, 3, 4, 0)
            ),
            Value::String("26:03:04".into())
        );
    }

    #[test]
    fn test_null_and_floats() {
        assert_eq!(
            cell_to_value(ColumnType::MYSQL_TYPE_NULL, mysql_async::Value::NULL),
            Value::Null
        );
        assert_eq!(
            cell_to_value(ColumnType::MYSQL_TYPE_FLOAT, mysql_async::Value::Float(1.5)),
            Value::Float32(1.5)
        );
        assert_eq!(
            cell_to_value(
                ColumnType::MYSQL_TYPE_DOUBLE,
                mysql_async::Value::Double(2.5)
            ),
            Value::Float64(2.5)
        );
    }
}
