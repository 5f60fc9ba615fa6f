//! Configuration loading from disk and the process environment

mod common;

use common::sample_yaml;
use redload::{Config, LoadError};
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

const ENV_VARS: [&str; 5] = [
    "REDSHIFT_HOST",
    "REDSHIFT_PORT",
    "REDSHIFT_SCHEMA",
    "AWS_SESSION_TOKEN",
    "S3_BUCKET",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_from_file() {
    clear_env();
    let file = config_file(&sample_yaml("analytics"));

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.redshift.host, "localhost");
    assert_eq!(config.namespace().unwrap().as_str(), "analytics");
    assert_eq!(config.s3_tables.len(), 3);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    std::env::set_var("REDSHIFT_HOST", "cluster.example.com");
    std::env::set_var("REDSHIFT_SCHEMA", "Reporting");
    std::env::set_var("AWS_SESSION_TOKEN", "session-token");
    let file = config_file(&sample_yaml("analytics"));

    let result = Config::load(file.path());
    clear_env();
    let config = result.unwrap();

    assert_eq!(config.redshift.host, "cluster.example.com");
    // Identifiers fold to lower case
    assert_eq!(config.namespace().unwrap().as_str(), "reporting");
    assert_eq!(
        config.s3_bucket.aws_session_token.as_ref().map(|t| t.expose()),
        Some("session-token")
    );
}

#[test]
#[serial]
fn test_invalid_override_fails_validation() {
    clear_env();
    std::env::set_var("S3_BUCKET", "bad'bucket\\");
    let file = config_file(&sample_yaml("analytics"));

    let result = Config::load(file.path());
    clear_env();

    assert!(matches!(result, Err(LoadError::InvalidLiteral(_))));
}

#[test]
#[serial]
fn test_unparseable_port_override_fails() {
    clear_env();
    std::env::set_var("REDSHIFT_PORT", "not-a-port");
    let file = config_file(&sample_yaml("analytics"));

    let result = Config::load(file.path());
    clear_env();

    match result {
        Err(LoadError::Config(message)) => assert!(message.contains("not-a-port")),
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_missing_file() {
    clear_env();
    let result = Config::load("/nonexistent/redload/config.yaml");
    assert!(matches!(result, Err(LoadError::Config(_))));
}

#[test]
fn test_malformed_yaml() {
    let file = config_file("redshift: [not, a, map");
    assert!(matches!(Config::load(file.path()), Err(LoadError::ConfigParse(_))));
}
