//! redload
//!
//! Loads a fixed set of CSV files from S3 into Amazon Redshift, derives a
//! denormalized reporting table through two SQL join stages, and exports it
//! to a local CSV file.
//!
//! # Overview
//!
//! - **Load phase**: for each source file in the manifest, drop and recreate
//!   its table ([`provision`]) and `COPY` the file into it ([`loader`])
//! - **Transform phase**: build the reconciliation and export tables
//!   ([`transform`]), then write the export table to disk ([`export`])
//!
//! All SQL is rendered through [`sql`], which validates and quotes every
//! identifier and literal. The phases talk to the database through the
//! [`db::Gateway`] trait over a single session.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod loader;
pub mod pipeline;
pub mod preflight;
pub mod provision;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod transform;

// Re-export commonly used types
pub use config::Config;
pub use error::{LoadError, Result};
pub use pipeline::{Phases, Pipeline, RunReport};

use clap::{Parser, Subcommand};
use loader::FailurePolicy;
use std::path::PathBuf;

/// Load S3 CSV files into Redshift, join them, export the result
#[derive(Parser, Debug)]
#[command(name = "redload")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file
    #[arg(short, long, env = "REDLOAD_CONFIG", default_value = config::DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Export destination (overrides pipeline.output)
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Check each source file's header against its declared columns first
    #[arg(long, global = true)]
    pub verify_headers: bool,

    /// What the load phase does after a file fails (overrides pipeline.failure_policy)
    #[arg(long, value_enum, global = true)]
    pub failure_policy: Option<FailurePolicy>,

    /// Log the statements instead of executing them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Load phase, then transform phase
    Run,

    /// Load phase only
    Load,

    /// Transform phase only (source tables must already be loaded)
    Transform,

    /// Print every statement `run` would issue, credentials masked
    Plan,
}

impl Commands {
    pub fn phases(self) -> Phases {
        match self {
            Commands::Run | Commands::Plan => Phases::All,
            Commands::Load => Phases::LoadOnly,
            Commands::Transform => Phases::TransformOnly,
        }
    }
}
