//! Shared helpers for redload integration tests
//!
//! - [`RecordingGateway`]: a [`Gateway`] double that records every statement
//!   and can be told to fail some of them
//! - [`TestPostgres`]: a PostgreSQL container for tests that need a real
//!   database (PostgreSQL cannot `COPY FROM 's3://...'`, so those tests seed
//!   tables with `INSERT`)

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use redload::config::{Config, OrderedMap};
use redload::db::{CellValue, ConnectionParams, Gateway, TabularResult};
use redload::sql::Statement;
use redload::{LoadError, Pipeline};
use redload_common::Secret;
use std::path::Path;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;

pub const ACCESS_KEY_ID: &str = "AKIATESTEXAMPLE";
pub const SECRET_ACCESS_KEY: &str = "wJalrXUtnFEMI/K7MDENG/bPxRfiCY";

/// Configuration with the three standard source files
pub fn sample_yaml(schema: &str) -> String {
    format!(
        r#"
redshift:
  dbname: dev
  host: localhost
  port: 5439
  user: loader
  password: pw
  schema: {schema}
s3_bucket:
  aws_access_key_id: {ACCESS_KEY_ID}
  aws_secret_access_key: {SECRET_ACCESS_KEY}
  bucket: test-bucket
s3_tables:
  users.csv:
    user_id: VARCHAR(64)
    signup_date: DATE
  purchases.csv:
    user_id: VARCHAR(64)
    plan_id: VARCHAR(64)
    purchase_type: VARCHAR(16)
    purchased_at: TIMESTAMP
    amount: DECIMAL(10,2)
  abtest_assignments.csv:
    user_id: VARCHAR(64)
    variant: VARCHAR(32)
    assigned_at: TIMESTAMP
"#
    )
}

pub fn sample_config(schema: &str) -> Config {
    Config::from_yaml_str(&sample_yaml(schema)).expect("sample config parses")
}

pub fn sample_pipeline(output: &Path) -> Pipeline {
    Pipeline::from_config(&sample_config("analytics"))
        .expect("sample pipeline builds")
        .with_output(output)
}

/// Two-row stand-in for the export table
pub fn canned_export() -> TabularResult {
    TabularResult {
        columns: vec!["user_id".into(), "variant".into(), "trial".into()],
        rows: vec![
            vec![CellValue::Text("u1".into()), CellValue::Text("A".into()), CellValue::Int(1)],
            vec![CellValue::Text("u2".into()), CellValue::Text("B".into()), CellValue::Null],
        ],
    }
}

// ============================================================================
// Recording gateway
// ============================================================================

#[derive(Default)]
pub struct RecordingGateway {
    statements: Vec<String>,
    fail_on: Vec<String>,
    query_result: TabularResult,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every statement whose SQL contains `pattern`
    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on.push(pattern.into());
        self
    }

    /// Result returned for every query
    pub fn with_query_result(mut self, result: TabularResult) -> Self {
        self.query_result = result;
        self
    }

    /// SQL of every statement attempted, failed ones included
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.statements.iter().filter(|s| s.contains(needle)).count()
    }

    fn record(&mut self, statement: &Statement) -> redload::Result<()> {
        self.statements.push(statement.sql().to_string());
        if self.fail_on.iter().any(|p| statement.sql().contains(p.as_str())) {
            return Err(LoadError::Execution {
                statement: statement.label(),
                source: sqlx::Error::Protocol("simulated failure".into()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn execute(&mut self, statement: &Statement) -> redload::Result<()> {
        self.record(statement)
    }

    async fn query(&mut self, statement: &Statement) -> redload::Result<TabularResult> {
        self.record(statement)?;
        Ok(self.query_result.clone())
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    host: String,
    port: u16,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?
            .to_string();
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        Ok(Self {
            _container: container,
            host,
            port,
        })
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: Secret::new("postgres"),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Manifest with one file, for small registry tests
pub fn single_file_manifest(file: &str, columns: &[(&str, &str)]) -> OrderedMap<OrderedMap<String>> {
    let cols: OrderedMap<String> = columns
        .iter()
        .map(|(name, ty)| (name.to_string(), ty.to_string()))
        .collect();
    let mut manifest = OrderedMap::new();
    manifest.insert(file, cols);
    manifest
}
