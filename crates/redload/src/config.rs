//! Configuration management
//!
//! The pipeline is driven by one YAML file (default `config.yaml`):
//!
//! ```yaml
//! redshift:
//!   dbname: dev
//!   host: example.abc123.eu-west-1.redshift.amazonaws.com
//!   port: 5439
//!   user: loader
//!   password: secret
//!   schema: analytics
//! s3_bucket:
//!   aws_access_key_id: AKIA...
//!   aws_secret_access_key: ...
//!   bucket: my-bucket
//! s3_tables:
//!   purchases.csv:
//!     user_id: VARCHAR(64)
//!     purchased_at: TIMESTAMP
//! ```
//!
//! Credentials may instead come from the environment (after `.env` is
//! loaded): `REDSHIFT_*`, `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
//! `AWS_SESSION_TOKEN` and `S3_BUCKET` override the file.

use crate::db::ConnectionParams;
use crate::error::{LoadError, Result};
use crate::loader::{CopyAuth, FailurePolicy, S3Source};
use crate::sql::{quote_literal, Ident};
use crate::transform::TransformTables;
use redload_common::Secret;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Default export file, relative to the working directory.
pub const DEFAULT_EXPORT_PATH: &str = "final_redshift_table.csv";

/// Default Redshift port.
pub const DEFAULT_REDSHIFT_PORT: u16 = 5439;

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_PURCHASES_TABLE: &str = "purchases";
pub const DEFAULT_USERS_TABLE: &str = "users";
pub const DEFAULT_ASSIGNMENTS_TABLE: &str = "abtest_assignments";
pub const DEFAULT_RECONCILIATION_TABLE: &str = "lookup_trial_subscription";
pub const DEFAULT_EXPORT_TABLE: &str = "export_table";

// ============================================================================
// Ordered map
// ============================================================================

/// String-keyed map that keeps entries in the order they were written
///
/// Column order in the manifest is load-bearing, so the manifest cannot go
/// through a `HashMap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Insert or replace, keeping the original position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping with string keys")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, V)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(de::Error::custom(format!("duplicate key '{}'", key)));
                    }
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

// ============================================================================
// Configuration sections
// ============================================================================

/// Full pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub redshift: RedshiftConfig,
    pub s3_bucket: S3BucketConfig,

    /// Load manifest: source file -> ordered column name -> SQL type
    pub s3_tables: OrderedMap<OrderedMap<String>>,

    #[serde(default)]
    pub transform: TransformConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Redshift connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct RedshiftConfig {
    pub dbname: String,
    pub host: String,
    #[serde(default = "default_port", deserialize_with = "port_from_number_or_string")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Secret,
    pub schema: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Object storage location and `COPY` credentials
#[derive(Debug, Clone, Deserialize)]
pub struct S3BucketConfig {
    #[serde(default)]
    pub aws_access_key_id: Secret,
    #[serde(default)]
    pub aws_secret_access_key: Secret,
    #[serde(default)]
    pub aws_session_token: Option<Secret>,
    pub bucket: String,

    /// Role ARN used by `COPY` instead of inline keys
    #[serde(default)]
    pub iam_role: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint for the header preflight (e.g. MinIO); not used by `COPY`
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Names of the tables the join pipeline reads and writes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub purchases_table: String,
    pub users_table: String,
    pub assignments_table: String,
    pub reconciliation_table: String,
    pub export_table: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            purchases_table: DEFAULT_PURCHASES_TABLE.to_string(),
            users_table: DEFAULT_USERS_TABLE.to_string(),
            assignments_table: DEFAULT_ASSIGNMENTS_TABLE.to_string(),
            reconciliation_table: DEFAULT_RECONCILIATION_TABLE.to_string(),
            export_table: DEFAULT_EXPORT_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub failure_policy: FailurePolicy,
    pub output: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            output: PathBuf::from(DEFAULT_EXPORT_PATH),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_REDSHIFT_PORT
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn port_from_number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid port '{}'", text))),
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load `.env`, read the YAML file, apply environment overrides, validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoadError::config(format!("cannot read configuration file '{}': {}", path.display(), e))
        })?;

        let mut config = Self::from_yaml_str(&content)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;

        tracing::debug!(
            path = %path.display(),
            host = %config.redshift.host,
            schema = %config.redshift.schema,
            source_files = config.s3_tables.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse without environment overrides or validation
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Overlay values returned by `lookup` (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("REDSHIFT_HOST") {
            self.redshift.host = host;
        }
        if let Some(port) = lookup("REDSHIFT_PORT") {
            self.redshift.port = port
                .trim()
                .parse()
                .map_err(|_| LoadError::config(format!("invalid REDSHIFT_PORT '{}'", port)))?;
        }
        if let Some(dbname) = lookup("REDSHIFT_DBNAME") {
            self.redshift.dbname = dbname;
        }
        if let Some(user) = lookup("REDSHIFT_USER") {
            self.redshift.user = user;
        }
        if let Some(password) = lookup("REDSHIFT_PASSWORD") {
            self.redshift.password = Secret::from(password);
        }
        if let Some(schema) = lookup("REDSHIFT_SCHEMA") {
            self.redshift.schema = schema;
        }
        if let Some(key_id) = lookup("AWS_ACCESS_KEY_ID") {
            self.s3_bucket.aws_access_key_id = Secret::from(key_id);
        }
        if let Some(secret) = lookup("AWS_SECRET_ACCESS_KEY") {
            self.s3_bucket.aws_secret_access_key = Secret::from(secret);
        }
        if let Some(token) = lookup("AWS_SESSION_TOKEN") {
            self.s3_bucket.aws_session_token = Some(Secret::from(token));
        }
        if let Some(bucket) = lookup("S3_BUCKET") {
            self.s3_bucket.bucket = bucket;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let db = &self.redshift;
        if db.host.trim().is_empty() {
            return Err(LoadError::config("redshift.host cannot be empty"));
        }
        if db.dbname.trim().is_empty() {
            return Err(LoadError::config("redshift.dbname cannot be empty"));
        }
        if db.user.trim().is_empty() {
            return Err(LoadError::config("redshift.user cannot be empty"));
        }
        if db.port == 0 {
            return Err(LoadError::config("redshift.port must be greater than 0"));
        }
        if db.connect_timeout_secs == 0 {
            return Err(LoadError::config("redshift.connect_timeout_secs must be greater than 0"));
        }
        self.namespace()?;

        let s3 = &self.s3_bucket;
        if s3.bucket.trim().is_empty() {
            return Err(LoadError::config("s3_bucket.bucket cannot be empty"));
        }
        quote_literal("s3_bucket.bucket", &s3.bucket)?;
        self.copy_auth()?;

        if self.s3_tables.is_empty() {
            return Err(LoadError::config("s3_tables must list at least one source file"));
        }
        for (file, _) in self.s3_tables.iter() {
            quote_literal("s3_tables key", file)?;
        }

        self.transform_tables()?;

        if self.pipeline.output.as_os_str().is_empty() {
            return Err(LoadError::config("pipeline.output cannot be empty"));
        }

        Ok(())
    }

    /// Schema every table lives in
    pub fn namespace(&self) -> Result<Ident> {
        Ident::new(&self.redshift.schema)
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.redshift.host.clone(),
            port: self.redshift.port,
            dbname: self.redshift.dbname.clone(),
            user: self.redshift.user.clone(),
            password: self.redshift.password.clone(),
            connect_timeout: Duration::from_secs(self.redshift.connect_timeout_secs),
        }
    }

    pub fn s3_source(&self) -> Result<S3Source> {
        Ok(S3Source {
            bucket: self.s3_bucket.bucket.clone(),
            auth: self.copy_auth()?,
            region: self.s3_bucket.region.clone(),
        })
    }

    /// Credentials `COPY` will use: the IAM role if one is set, else inline keys
    pub fn copy_auth(&self) -> Result<CopyAuth> {
        let s3 = &self.s3_bucket;
        if let Some(role) = s3.iam_role.as_deref().filter(|r| !r.trim().is_empty()) {
            return Ok(CopyAuth::IamRole(role.trim().to_string()));
        }

        if s3.aws_access_key_id.is_empty() || s3.aws_secret_access_key.is_empty() {
            return Err(LoadError::config(
                "s3_bucket needs aws_access_key_id and aws_secret_access_key (or iam_role)",
            ));
        }

        Ok(CopyAuth::Keys {
            access_key_id: s3.aws_access_key_id.clone(),
            secret_access_key: s3.aws_secret_access_key.clone(),
            session_token: s3.aws_session_token.clone().filter(|t| !t.is_empty()),
        })
    }

    pub fn transform_tables(&self) -> Result<TransformTables> {
        let t = &self.transform;
        Ok(TransformTables {
            purchases: Ident::new(&t.purchases_table)?,
            users: Ident::new(&t.users_table)?,
            assignments: Ident::new(&t.assignments_table)?,
            reconciliation: Ident::new(&t.reconciliation_table)?,
            export: Ident::new(&t.export_table)?,
        })
    }
}
