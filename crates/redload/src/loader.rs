//! Bulk loading from S3
//!
//! Each source file is loaded by one Redshift `COPY` statement that points
//! the cluster at `s3://<bucket>/<key>`. The cluster reads the object
//! itself; nothing is streamed through this process.
//!
//! Files are loaded one after another in manifest order. Loads do not
//! depend on each other, so [`FailurePolicy`] decides whether the first
//! failure stops the phase or every file is attempted and all failures are
//! reported. Either way a phase with a failure never reaches the transform
//! phase.

use crate::db::Gateway;
use crate::error::{LoadError, Result};
use crate::provision;
use crate::schema::{SchemaRegistry, SourceTableSpec};
use crate::sql::{quote_literal, Ident, QualifiedName, Statement};
use redload_common::Secret;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

/// Timestamp pattern `COPY` parses CSV fields with
pub const TIME_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS";

/// What the load phase does after a file fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failed file
    #[default]
    AbortOnFirst,
    /// Attempt every file, then fail with all errors
    ReportAll,
}

/// How `COPY` authenticates against S3
#[derive(Debug, Clone)]
pub enum CopyAuth {
    /// Inline keys: `CREDENTIALS 'aws_access_key_id=...;aws_secret_access_key=...'`
    ///
    /// The keys end up in the statement text and therefore in the cluster's
    /// query history. Statements mask them in logs.
    Keys {
        access_key_id: Secret,
        secret_access_key: Secret,
        session_token: Option<Secret>,
    },
    /// `IAM_ROLE '<arn>'`
    IamRole(String),
}

impl CopyAuth {
    fn clause(&self) -> Result<String> {
        match self {
            CopyAuth::Keys {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                let mut credentials = format!(
                    "aws_access_key_id={};aws_secret_access_key={}",
                    access_key_id.expose(),
                    secret_access_key.expose()
                );
                if let Some(token) = session_token {
                    credentials.push_str(";token=");
                    credentials.push_str(token.expose());
                }
                Ok(format!("CREDENTIALS {}", quote_literal("COPY credentials", &credentials)?))
            },
            CopyAuth::IamRole(arn) => Ok(format!("IAM_ROLE {}", quote_literal("iam_role", arn)?)),
        }
    }

    fn secrets(&self) -> Vec<&Secret> {
        match self {
            CopyAuth::Keys {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                let mut secrets = vec![access_key_id, secret_access_key];
                secrets.extend(session_token.iter());
                secrets
            },
            CopyAuth::IamRole(_) => Vec::new(),
        }
    }
}

/// Bucket the source files live in, plus how to read it
#[derive(Debug, Clone)]
pub struct S3Source {
    pub bucket: String,
    pub auth: CopyAuth,
    pub region: Option<String>,
}

impl S3Source {
    pub fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key.trim_start_matches('/'))
    }
}

/// `COPY <table> FROM 's3://bucket/key' <auth> IGNOREHEADER 1 CSV TIMEFORMAT '...'`
pub fn copy_statement(table: &QualifiedName, source: &S3Source, key: &str) -> Result<Statement> {
    let mut sql = format!(
        "COPY {} FROM {} {} IGNOREHEADER 1 CSV TIMEFORMAT {}",
        table,
        quote_literal("S3 location", &source.uri(key))?,
        source.auth.clause()?,
        quote_literal("time format", TIME_FORMAT)?,
    );
    if let Some(region) = source.region.as_deref() {
        sql.push_str(&format!(" REGION {}", quote_literal("region", region)?));
    }
    sql.push(';');

    Ok(source
        .auth
        .secrets()
        .into_iter()
        .fold(Statement::new(sql), |stmt, secret| stmt.with_secret(secret)))
}

/// Copy one S3 object into an existing table
#[instrument(skip_all, fields(table = %table, key = %key))]
pub async fn load(gateway: &mut dyn Gateway, table: &QualifiedName, source: &S3Source, key: &str) -> Result<()> {
    let statement = copy_statement(table, source, key)?;
    gateway.execute(&statement).await
}

/// Result of loading one source file
#[derive(Debug)]
pub struct FileLoadOutcome {
    pub source_file: String,
    pub table: QualifiedName,
    pub result: Result<()>,
}

/// Provision the file's table, then copy the file into it
pub async fn load_file(
    gateway: &mut dyn Gateway,
    namespace: &Ident,
    spec: &SourceTableSpec,
    source: &S3Source,
) -> FileLoadOutcome {
    let table = QualifiedName::new(namespace.clone(), spec.table_name().clone());

    let result = match provision::provision(gateway, &table, &spec.column_definition_clause()).await {
        Ok(()) => load(gateway, &table, source, spec.source_file()).await,
        Err(e) => Err(e),
    };

    match &result {
        Ok(()) => info!(
            source_file = %spec.source_file(),
            table = %table,
            "Successfully loaded csv file from S3 into Redshift"
        ),
        Err(e) => error!(source_file = %spec.source_file(), table = %table, error = %e, "Load failed"),
    }

    FileLoadOutcome {
        source_file: spec.source_file().to_string(),
        table,
        result,
    }
}

/// A table the load phase filled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub source_file: String,
    pub table: QualifiedName,
}

/// Outcome of the whole load phase
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: Vec<LoadedTable>,
    pub failures: Vec<(String, LoadError)>,
    /// Files never attempted because an earlier one failed
    pub skipped: Vec<String>,
}

impl LoadSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The loaded tables, or the phase error
    ///
    /// A single failure is returned as-is; several are folded into
    /// [`LoadError::LoadPhaseFailed`].
    pub fn into_result(mut self) -> Result<Vec<LoadedTable>> {
        match self.failures.len() {
            0 => Ok(self.loaded),
            1 => Err(self.failures.remove(0).1),
            _ => Err(LoadError::LoadPhaseFailed {
                failures: self
                    .failures
                    .iter()
                    .map(|(file, e)| format!("{}: {}", file, e))
                    .collect(),
            }),
        }
    }
}

/// Load every file of the registry in order
pub async fn load_all(
    gateway: &mut dyn Gateway,
    namespace: &Ident,
    registry: &SchemaRegistry,
    source: &S3Source,
    policy: FailurePolicy,
) -> LoadSummary {
    let mut summary = LoadSummary::default();
    let mut files = registry.iter();

    for spec in files.by_ref() {
        let outcome = load_file(gateway, namespace, spec, source).await;
        match outcome.result {
            Ok(()) => summary.loaded.push(LoadedTable {
                source_file: outcome.source_file,
                table: outcome.table,
            }),
            Err(e) => {
                summary.failures.push((outcome.source_file, e));
                if policy == FailurePolicy::AbortOnFirst {
                    break;
                }
            },
        }
    }

    summary.skipped = files.map(|s| s.source_file().to_string()).collect();
    if !summary.skipped.is_empty() {
        warn!(skipped = summary.skipped.len(), "Load phase aborted before all files were attempted");
    }

    summary
}
