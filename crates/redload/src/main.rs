//! redload - main entry point

use clap::Parser;
use redload::db::PgGateway;
use redload::storage::Storage;
use redload::{Cli, Commands, Config, Pipeline};
use redload_common::logging::{init_logging, LogConfig, LogLevel};
use std::process;
use tracing::{error, info};

const DEFAULT_FILTER: &str = "redload=info,sqlx=warn";
const VERBOSE_FILTER: &str = "redload=debug,sqlx=info";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let (level, filter) = if cli.verbose {
        (LogLevel::Debug, VERBOSE_FILTER)
    } else {
        (LogLevel::Info, DEFAULT_FILTER)
    };

    let log_config = LogConfig::builder()
        .level(level)
        .filter_directives(filter)
        .log_file_prefix("redload")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        },
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {}", e);
            process::exit(1);
        },
    };

    if let Err(e) = execute(&cli).await {
        error!(error = %e, "Command failed");
        process::exit(1);
    }
}

async fn execute(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)?;

    let mut pipeline = Pipeline::from_config(&config)?;
    if let Some(policy) = cli.failure_policy {
        pipeline = pipeline.with_failure_policy(policy);
    }
    if let Some(output) = &cli.output {
        pipeline = pipeline.with_output(output);
    }

    let phases = cli.command.phases();

    if cli.command == Commands::Plan {
        for statement in pipeline.plan(phases)? {
            println!("{}\n", statement);
        }
        return Ok(());
    }

    if cli.verify_headers && phases.includes_load() {
        let storage = Storage::new(&config.s3_bucket).await;
        pipeline.verify_headers(&storage).await?;
    }

    if cli.dry_run {
        for statement in pipeline.plan(phases)? {
            info!(statement = %statement, "Dry run, not executing");
        }
        return Ok(());
    }

    let mut gateway = PgGateway::open(&config.connection_params()).await?;
    let outcome = pipeline.run(&mut gateway, phases).await;
    let closed = gateway.close().await;

    let report = outcome?;
    closed?;
    report.log();

    info!(command = ?cli.command, "Done");
    Ok(())
}
