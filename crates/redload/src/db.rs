//! Database gateway
//!
//! Owns the single Redshift session of a run. [`Gateway`] is the seam the
//! pipeline talks to; [`PgGateway`] implements it over one sqlx
//! `PgConnection` (Redshift speaks the PostgreSQL wire protocol).
//!
//! Every failure comes back as a [`LoadError`] and is logged here; the
//! binary turns it into a non-zero exit. Nothing is retried.

use crate::error::{LoadError, Result};
use crate::sql::Statement;
use async_trait::async_trait;
use redload_common::Secret;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::types::Decimal;
use sqlx::Statement as _;
use sqlx::{Column, Connection, Executor, Row, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::{debug, error, info};

/// Where and as whom to connect
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Secret,
    pub connect_timeout: Duration,
}

impl ConnectionParams {
    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.dbname)
            .username(&self.user)
            .password(self.password.expose())
            .application_name("redload")
    }
}

/// One materialized cell of a query result
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Text, and everything rendered as text (decimals, dates, timestamps)
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// Rows of a query, materialized in memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl TabularResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Cell of `row` in column `name`
    pub fn value(&self, row: usize, name: &str) -> Option<&CellValue> {
        let idx = self.column_index(name)?;
        self.rows.get(row)?.get(idx)
    }
}

/// Statement execution against the target database
///
/// Calls take `&mut self`: a session runs one statement at a time.
#[async_trait]
pub trait Gateway: Send {
    /// Run a statement that returns no rows
    async fn execute(&mut self, statement: &Statement) -> Result<()>;

    /// Run a query and materialize every row
    async fn query(&mut self, statement: &Statement) -> Result<TabularResult>;
}

/// [`Gateway`] over a single PostgreSQL-protocol connection
pub struct PgGateway {
    conn: PgConnection,
}

impl PgGateway {
    /// Open the session
    pub async fn open(params: &ConnectionParams) -> Result<Self> {
        debug!(host = %params.host, port = params.port, dbname = %params.dbname, "Connecting to Redshift");

        let options = params.connect_options();
        let connect = PgConnection::connect_with(&options);
        let conn = match tokio::time::timeout(params.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no connection after {}s", params.connect_timeout.as_secs()),
            ))),
        }
        .map_err(|source| {
            error!(host = %params.host, port = params.port, error = %source, "Unable to connect to Redshift");
            LoadError::Connection {
                host: params.host.clone(),
                port: params.port,
                dbname: params.dbname.clone(),
                source,
            }
        })?;

        info!(host = %params.host, dbname = %params.dbname, "Connected to Redshift");
        Ok(Self { conn })
    }

    /// Close the session; only the driver that opened it calls this
    pub async fn close(self) -> Result<()> {
        self.conn.close().await.map_err(|source| LoadError::Execution {
            statement: "<close session>".to_string(),
            source,
        })?;
        debug!("Redshift session closed");
        Ok(())
    }
}

#[async_trait]
impl Gateway for PgGateway {
    async fn execute(&mut self, statement: &Statement) -> Result<()> {
        debug!(statement = %statement, "Executing statement");

        let conn: &mut PgConnection = &mut self.conn;
        conn.execute(sqlx::raw_sql(statement.sql()))
            .await
            .map_err(|source| execution_error(statement, source))?;

        Ok(())
    }

    async fn query(&mut self, statement: &Statement) -> Result<TabularResult> {
        debug!(statement = %statement, "Running query");

        let rows = sqlx::query(statement.sql())
            .fetch_all(&mut self.conn)
            .await
            .map_err(|source| execution_error(statement, source))?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => {
                // No rows to read names from, the prepared statement still has them
                let conn: &mut PgConnection = &mut self.conn;
                let prepared = conn
                    .prepare(statement.sql())
                    .await
                    .map_err(|source| execution_error(statement, source))?;
                prepared.columns().iter().map(|c| c.name().to_string()).collect()
            },
        };

        let mut result_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut cells = Vec::with_capacity(columns.len());
            for (idx, column) in row.columns().iter().enumerate() {
                let cell = decode_cell(row, idx, column.type_info().name())
                    .map_err(|source| execution_error(statement, source))?;
                cells.push(cell);
            }
            result_rows.push(cells);
        }

        debug!(rows = result_rows.len(), columns = columns.len(), "Query materialized");

        Ok(TabularResult {
            columns,
            rows: result_rows,
        })
    }
}

fn execution_error(statement: &Statement, source: sqlx::Error) -> LoadError {
    error!(statement = %statement.label(), error = %source, "Unable to execute statement");
    LoadError::Execution {
        statement: statement.label(),
        source,
    }
}

/// Decode one column of a row by its server type name
///
/// Types without a rendering here fail the query rather than reach the
/// export as something other than their value.
fn decode_cell(row: &PgRow, idx: usize, type_name: &str) -> std::result::Result<CellValue, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(CellValue::Null);
    }

    let cell = match type_name {
        "BOOL" => CellValue::Bool(row.try_get(idx)?),
        "INT2" => CellValue::Int(i64::from(row.try_get::<i16, _>(idx)?)),
        "INT4" => CellValue::Int(i64::from(row.try_get::<i32, _>(idx)?)),
        "INT8" => CellValue::Int(row.try_get(idx)?),
        "FLOAT4" => CellValue::Float(f64::from(row.try_get::<f32, _>(idx)?)),
        "FLOAT8" => CellValue::Float(row.try_get(idx)?),
        "NUMERIC" => CellValue::Text(numeric_text(row.try_get(idx)?)),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => CellValue::Text(row.try_get(idx)?),
        "TIMESTAMP" => CellValue::Text(timestamp_text(row.try_get(idx)?)),
        "TIMESTAMPTZ" => CellValue::Text(timestamptz_text(row.try_get(idx)?)),
        "DATE" => CellValue::Text(date_text(row.try_get(idx)?)),
        "TIME" => CellValue::Text(time_text(row.try_get(idx)?)),
        other => {
            return Err(sqlx::Error::ColumnDecode {
                index: row.columns()[idx].name().to_string(),
                source: format!("no text rendering for column type {}", other).into(),
            })
        },
    };

    Ok(cell)
}

/// Decimal with the column's declared scale (`DECIMAL(10,2)` 5 is `5.00`)
pub(crate) fn numeric_text(value: Decimal) -> String {
    value.to_string()
}

pub(crate) fn timestamp_text(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

fn timestamptz_text(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()
}

fn date_text(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn time_text(value: NaiveTime) -> String {
    value.format("%H:%M:%S%.f").to_string()
}
