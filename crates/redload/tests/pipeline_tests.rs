//! Pipeline ordering and failure-policy tests against a recording gateway

mod common;

use common::{canned_export, sample_pipeline, sample_yaml, RecordingGateway, ACCESS_KEY_ID, SECRET_ACCESS_KEY};
use redload::loader::FailurePolicy;
use redload::{Config, LoadError, Phases, Pipeline};
use tempfile::TempDir;

const RECONCILIATION: &str = "\"analytics\".\"lookup_trial_subscription\"";
const EXPORT: &str = "\"analytics\".\"export_table\"";

fn touches_transform(sql: &str) -> bool {
    sql.contains(RECONCILIATION) || sql.contains(EXPORT)
}

#[tokio::test]
async fn test_full_run_statement_order() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("final_redshift_table.csv");
    let pipeline = sample_pipeline(&output);
    let mut gateway = RecordingGateway::new().with_query_result(canned_export());

    let report = pipeline.run(&mut gateway, Phases::All).await.unwrap();

    let statements = gateway.statements();
    assert_eq!(statements.len(), 3 * 3 + 4 + 1);

    let files = ["users", "purchases", "abtest_assignments"];
    for (i, table) in files.iter().enumerate() {
        let qualified = format!("\"analytics\".\"{}\"", table);
        assert_eq!(statements[i * 3], format!("DROP TABLE IF EXISTS {};", qualified));
        assert!(statements[i * 3 + 1].starts_with(&format!("CREATE TABLE {} (", qualified)));
        assert!(statements[i * 3 + 2].starts_with(&format!("COPY {} FROM 's3://test-bucket/{}.csv'", qualified, table)));
    }

    assert_eq!(statements[9], format!("DROP TABLE IF EXISTS {};", RECONCILIATION));
    assert!(statements[10].starts_with(&format!("CREATE TABLE {} AS", RECONCILIATION)));
    assert_eq!(statements[11], format!("DROP TABLE IF EXISTS {};", EXPORT));
    assert!(statements[12].starts_with(&format!("CREATE TABLE {} AS", EXPORT)));
    assert_eq!(statements[13], format!("SELECT * FROM {};", EXPORT));

    assert_eq!(report.loaded.len(), 3);
    let export = report.export.expect("export report");
    assert_eq!(export.rows, 2);

    let written = std::fs::read_to_string(&output).unwrap();
    assert_eq!(written, "user_id,variant,trial\nu1,A,1\nu2,B,\n");
}

#[tokio::test]
async fn test_load_failure_aborts_before_transform() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.csv");
    let pipeline = sample_pipeline(&output);
    let mut gateway = RecordingGateway::new().failing_on("COPY \"analytics\".\"purchases\"");

    let err = pipeline.run(&mut gateway, Phases::All).await.unwrap_err();

    assert!(matches!(err, LoadError::Execution { .. }));
    assert!(!gateway.statements().iter().any(|s| touches_transform(s)));
    // Abort-on-first: the assignments file is never attempted
    assert_eq!(gateway.count_containing("abtest_assignments"), 0);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_report_all_attempts_every_file() {
    let dir = TempDir::new().unwrap();
    let pipeline = sample_pipeline(&dir.path().join("out.csv")).with_failure_policy(FailurePolicy::ReportAll);
    let mut gateway = RecordingGateway::new().failing_on("COPY ");

    let err = pipeline.run(&mut gateway, Phases::All).await.unwrap_err();

    match err {
        LoadError::LoadPhaseFailed { failures } => {
            assert_eq!(failures.len(), 3);
            assert!(failures[0].starts_with("users.csv: "));
            assert!(failures[2].starts_with("abtest_assignments.csv: "));
        },
        other => panic!("expected LoadPhaseFailed, got {other:?}"),
    }
    assert_eq!(gateway.count_containing("COPY "), 3);
    assert!(!gateway.statements().iter().any(|s| touches_transform(s)));
}

#[tokio::test]
async fn test_report_all_single_failure_keeps_error() {
    let dir = TempDir::new().unwrap();
    let pipeline = sample_pipeline(&dir.path().join("out.csv")).with_failure_policy(FailurePolicy::ReportAll);
    let mut gateway = RecordingGateway::new().failing_on("CREATE TABLE \"analytics\".\"users\"");

    let err = pipeline.run(&mut gateway, Phases::All).await.unwrap_err();

    assert!(matches!(err, LoadError::Execution { .. }));
    // The failed create means the users COPY never ran, the others did
    assert_eq!(gateway.count_containing("COPY "), 2);
    assert!(!gateway.statements().iter().any(|s| touches_transform(s)));
}

#[tokio::test]
async fn test_failed_copy_error_masks_credentials() {
    let dir = TempDir::new().unwrap();
    let pipeline = sample_pipeline(&dir.path().join("out.csv"));
    let mut gateway = RecordingGateway::new().failing_on("COPY ");

    let err = pipeline.run(&mut gateway, Phases::LoadOnly).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("COPY"));
    assert!(!message.contains(ACCESS_KEY_ID));
    assert!(!message.contains(SECRET_ACCESS_KEY));
}

#[tokio::test]
async fn test_transform_failure_stops_before_export() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.csv");
    let pipeline = sample_pipeline(&output);
    let mut gateway = RecordingGateway::new().failing_on(&format!("CREATE TABLE {} AS", RECONCILIATION));

    assert!(pipeline.run(&mut gateway, Phases::All).await.is_err());
    assert_eq!(gateway.count_containing(EXPORT), 0);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_load_only_and_transform_only() {
    let dir = TempDir::new().unwrap();
    let pipeline = sample_pipeline(&dir.path().join("out.csv"));

    let mut load = RecordingGateway::new();
    let report = pipeline.run(&mut load, Phases::LoadOnly).await.unwrap();
    assert!(report.export.is_none());
    assert_eq!(load.statements().len(), 9);
    assert!(!load.statements().iter().any(|s| touches_transform(s)));

    let mut transform = RecordingGateway::new().with_query_result(canned_export());
    let report = pipeline.run(&mut transform, Phases::TransformOnly).await.unwrap();
    assert!(report.loaded.is_empty());
    assert_eq!(transform.statements().len(), 5);
    assert!(transform.statements()[0].contains(RECONCILIATION));
}

#[tokio::test]
async fn test_rerun_issues_identical_statements() {
    let dir = TempDir::new().unwrap();
    let pipeline = sample_pipeline(&dir.path().join("out.csv"));

    let mut first = RecordingGateway::new().with_query_result(canned_export());
    let mut second = RecordingGateway::new().with_query_result(canned_export());
    pipeline.run(&mut first, Phases::All).await.unwrap();
    pipeline.run(&mut second, Phases::All).await.unwrap();

    assert_eq!(first.statements(), second.statements());
}

#[tokio::test]
async fn test_empty_export_still_writes_header() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.csv");
    let pipeline = sample_pipeline(&output);
    let empty = redload::db::TabularResult {
        columns: vec!["user_id".into(), "variant".into()],
        rows: Vec::new(),
    };
    let mut gateway = RecordingGateway::new().with_query_result(empty);

    let report = pipeline.run(&mut gateway, Phases::TransformOnly).await.unwrap();

    assert_eq!(report.export.unwrap().rows, 0);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "user_id,variant\n");
}

#[test]
fn test_duplicate_table_names_rejected_before_any_statement() {
    let yaml = sample_yaml("analytics").replace("  purchases.csv:", "  users.tsv:");
    let config = Config::from_yaml_str(&yaml).unwrap();

    match Pipeline::from_config(&config) {
        Err(LoadError::DuplicateTableName { table, first, second }) => {
            assert_eq!(table, "users");
            assert_eq!(first, "users.csv");
            assert_eq!(second, "users.tsv");
        },
        other => panic!("expected DuplicateTableName, got {other:?}"),
    }
}

#[test]
fn test_plan_never_shows_credentials() {
    let dir = TempDir::new().unwrap();
    let pipeline = sample_pipeline(&dir.path().join("out.csv"));

    let plan = pipeline.plan(Phases::All).unwrap();
    assert_eq!(plan.len(), 14);
    for statement in &plan {
        let shown = format!("{} {:?}", statement, statement);
        assert!(!shown.contains(ACCESS_KEY_ID));
        assert!(!shown.contains(SECRET_ACCESS_KEY));
    }
}
