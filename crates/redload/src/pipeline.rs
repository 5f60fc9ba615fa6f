//! Pipeline driver
//!
//! Runs the load phase (provision + `COPY` per source file) and then the
//! transform phase (join pipeline + export) over one borrowed session. The
//! transform phase never starts unless every file loaded.

use crate::config::Config;
use crate::db::Gateway;
use crate::error::Result;
use crate::export::{self, ExportReport};
use crate::loader::{self, FailurePolicy, LoadedTable, S3Source};
use crate::preflight::{self, ObjectHeaderSource};
use crate::provision::{create_table_statement, drop_table_statement};
use crate::schema::SchemaRegistry;
use crate::sql::{Ident, QualifiedName, Statement};
use crate::transform::{self, TransformTables};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Which phases a run includes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phases {
    All,
    LoadOnly,
    TransformOnly,
}

impl Phases {
    pub fn includes_load(self) -> bool {
        matches!(self, Phases::All | Phases::LoadOnly)
    }

    pub fn includes_transform(self) -> bool {
        matches!(self, Phases::All | Phases::TransformOnly)
    }
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub phases: Phases,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub loaded: Vec<LoadedTable>,
    pub export: Option<ExportReport>,
}

impl RunReport {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn log(&self) {
        info!(
            phases = ?self.phases,
            tables_loaded = self.loaded.len(),
            exported_rows = self.export.as_ref().map(|e| e.rows),
            output = ?self.export.as_ref().map(|e| e.path.display().to_string()),
            elapsed_ms = self.elapsed().num_milliseconds(),
            "Run complete"
        );
    }
}

/// Everything a run needs, resolved from a validated [`Config`]
#[derive(Debug, Clone)]
pub struct Pipeline {
    namespace: Ident,
    registry: SchemaRegistry,
    source: S3Source,
    tables: TransformTables,
    policy: FailurePolicy,
    output: PathBuf,
}

impl Pipeline {
    /// Fails on anything the configuration cannot be turned into, including
    /// two source files that map to the same table
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            namespace: config.namespace()?,
            registry: SchemaRegistry::from_manifest(&config.s3_tables)?,
            source: config.s3_source()?,
            tables: config.transform_tables()?,
            policy: config.pipeline.failure_policy,
            output: config.pipeline.output.clone(),
        })
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn namespace(&self) -> &Ident {
        &self.namespace
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn tables(&self) -> &TransformTables {
        &self.tables
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn qualify(&self, table: &Ident) -> QualifiedName {
        QualifiedName::new(self.namespace.clone(), table.clone())
    }

    /// Compare each source object's header line with its declared columns
    pub async fn verify_headers(&self, source: &dyn ObjectHeaderSource) -> Result<()> {
        preflight::verify_headers(source, &self.registry).await
    }

    /// Provision and load every source file
    pub async fn run_load_phase(&self, gateway: &mut dyn Gateway) -> Result<Vec<LoadedTable>> {
        info!(
            files = self.registry.len(),
            policy = ?self.policy,
            "Starting load phase"
        );

        let summary = loader::load_all(gateway, &self.namespace, &self.registry, &self.source, self.policy).await;
        if !summary.is_success() {
            warn!(
                failed = summary.failures.len(),
                skipped = summary.skipped.len(),
                "Load phase failed, transform phase will not run"
            );
        }

        let loaded = summary.into_result()?;
        info!(tables = loaded.len(), "Load phase complete");
        Ok(loaded)
    }

    /// Build the derived tables and export the final one
    pub async fn run_transform_phase(&self, gateway: &mut dyn Gateway) -> Result<ExportReport> {
        info!("Starting transform phase");
        for table in self.tables.inputs() {
            if !self.registry.iter().any(|spec| spec.table_name() == table) {
                warn!(table = %table, "Join input is not produced by any configured source file");
            }
        }

        let export_table = transform::run(gateway, &self.namespace, &self.tables).await?;
        export::export(gateway, &export_table, &self.output).await
    }

    /// Run the requested phases in order
    pub async fn run(&self, gateway: &mut dyn Gateway, phases: Phases) -> Result<RunReport> {
        let started_at = Utc::now();

        let loaded = if phases.includes_load() {
            self.run_load_phase(gateway).await?
        } else {
            Vec::new()
        };

        let export = if phases.includes_transform() {
            Some(self.run_transform_phase(gateway).await?)
        } else {
            None
        };

        Ok(RunReport {
            phases,
            started_at,
            finished_at: Utc::now(),
            loaded,
            export,
        })
    }

    /// Statements of the load phase, in execution order
    pub fn load_statements(&self) -> Result<Vec<Statement>> {
        let mut statements = Vec::with_capacity(self.registry.len() * 3);
        for spec in self.registry.iter() {
            let table = self.qualify(spec.table_name());
            statements.push(drop_table_statement(&table));
            statements.push(create_table_statement(&table, &spec.column_definition_clause()));
            statements.push(loader::copy_statement(&table, &self.source, spec.source_file())?);
        }
        Ok(statements)
    }

    /// Statements of the transform phase, ending with the export query
    pub fn transform_statements(&self) -> Vec<Statement> {
        let mut statements: Vec<Statement> = transform::statements(&self.namespace, &self.tables)
            .into_iter()
            .map(|(_, statement)| statement)
            .collect();
        statements.push(export::select_all_statement(
            &self.tables.export_table(&self.namespace),
        ));
        statements
    }

    /// Every statement a run of `phases` would issue, without connecting
    pub fn plan(&self, phases: Phases) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        if phases.includes_load() {
            statements.extend(self.load_statements()?);
        }
        if phases.includes_transform() {
            statements.extend(self.transform_statements());
        }
        Ok(statements)
    }
}
