//! Join pipeline
//!
//! Two derived tables, always built in this order:
//!
//! 1. **Reconciliation**: full outer join of the `sale` and `trial` rows of
//!    the purchases table on `user_id`, one row per user seen on either
//!    side. Flags are `1` or NULL, never `0`.
//! 2. **Export**: every experiment assignment, left-joined to its user
//!    (signup date) and to its reconciliation row, plus the first and last
//!    assignment time of its variant.
//!
//! Each stage drops its table first, then runs `CREATE TABLE ... AS SELECT`.

use crate::db::Gateway;
use crate::error::Result;
use crate::provision::drop_table_statement;
use crate::sql::{Ident, QualifiedName, Statement};
use std::fmt;
use tracing::{info, instrument};

/// `purchase_type` of a completed purchase
pub const PURCHASE_TYPE_SALE: &str = "sale";

/// `purchase_type` of a trial
pub const PURCHASE_TYPE_TRIAL: &str = "trial";

/// Columns of the reconciliation table, in order
pub const RECONCILIATION_COLUMNS: [&str; 8] = [
    "user_id",
    "plan_id_sub",
    "plan_id_trial",
    "trial",
    "subscription",
    "purchased_at_sub",
    "purchased_at_trial",
    "amount",
];

/// Columns of the export table, in order
pub const EXPORT_COLUMNS: [&str; 12] = [
    "user_id",
    "end_variant",
    "start_variant",
    "variant",
    "signup_date",
    "trial",
    "plan_id_trial",
    "subscription",
    "plan_id_sub",
    "purchased_at_trial",
    "purchased_at_sub",
    "amount",
];

/// Tables the join pipeline reads and writes, all in one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformTables {
    pub purchases: Ident,
    pub users: Ident,
    pub assignments: Ident,
    pub reconciliation: Ident,
    pub export: Ident,
}

impl TransformTables {
    fn qualify(namespace: &Ident, table: &Ident) -> QualifiedName {
        QualifiedName::new(namespace.clone(), table.clone())
    }

    pub fn reconciliation_table(&self, namespace: &Ident) -> QualifiedName {
        Self::qualify(namespace, &self.reconciliation)
    }

    pub fn export_table(&self, namespace: &Ident) -> QualifiedName {
        Self::qualify(namespace, &self.export)
    }

    /// Source tables the transform phase expects the load phase to have filled
    pub fn inputs(&self) -> [&Ident; 3] {
        [&self.purchases, &self.users, &self.assignments]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reconciliation,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Reconciliation => f.write_str("reconciliation"),
            Stage::Export => f.write_str("export"),
        }
    }
}

pub fn reconciliation_statement(namespace: &Ident, tables: &TransformTables) -> Statement {
    let purchases = TransformTables::qualify(namespace, &tables.purchases);
    Statement::new(format!(
        r#"CREATE TABLE {target} AS
SELECT
    CASE WHEN t_sale."user_id" IS NOT NULL THEN t_sale."user_id" ELSE t_trial."user_id" END AS "user_id",
    t_sale."plan_id" AS "plan_id_sub",
    t_trial."plan_id" AS "plan_id_trial",
    CASE WHEN t_trial."purchase_type" IS NOT NULL THEN 1 END AS "trial",
    CASE WHEN t_sale."purchase_type" IS NOT NULL THEN 1 END AS "subscription",
    t_sale."purchased_at" AS "purchased_at_sub",
    t_trial."purchased_at" AS "purchased_at_trial",
    t_sale."amount" AS "amount"
FROM (SELECT * FROM {purchases} WHERE "purchase_type" = '{sale}') AS t_sale
FULL JOIN (SELECT * FROM {purchases} WHERE "purchase_type" = '{trial}') AS t_trial
    ON t_sale."user_id" = t_trial."user_id";"#,
        target = tables.reconciliation_table(namespace),
        purchases = purchases,
        sale = PURCHASE_TYPE_SALE,
        trial = PURCHASE_TYPE_TRIAL,
    ))
}

pub fn export_statement(namespace: &Ident, tables: &TransformTables) -> Statement {
    Statement::new(format!(
        r#"CREATE TABLE {target} AS
SELECT
    t1."user_id",
    MAX(t1."assigned_at") OVER (PARTITION BY t1."variant") AS "end_variant",
    MIN(t1."assigned_at") OVER (PARTITION BY t1."variant") AS "start_variant",
    t1."variant",
    t2."signup_date",
    t3."trial",
    t3."plan_id_trial",
    t3."subscription",
    t3."plan_id_sub",
    t3."purchased_at_trial",
    t3."purchased_at_sub",
    t3."amount"
FROM {assignments} AS t1
LEFT JOIN {users} AS t2
    ON t1."user_id" = t2."user_id"
LEFT JOIN {reconciliation} AS t3
    ON t1."user_id" = t3."user_id";"#,
        target = tables.export_table(namespace),
        assignments = TransformTables::qualify(namespace, &tables.assignments),
        users = TransformTables::qualify(namespace, &tables.users),
        reconciliation = tables.reconciliation_table(namespace),
    ))
}

/// Every statement of both stages, in execution order
pub fn statements(namespace: &Ident, tables: &TransformTables) -> Vec<(Stage, Statement)> {
    vec![
        (Stage::Reconciliation, drop_table_statement(&tables.reconciliation_table(namespace))),
        (Stage::Reconciliation, reconciliation_statement(namespace, tables)),
        (Stage::Export, drop_table_statement(&tables.export_table(namespace))),
        (Stage::Export, export_statement(namespace, tables)),
    ]
}

/// Build the reconciliation table, then the export table
///
/// Returns the export table's name.
#[instrument(skip_all, fields(namespace = %namespace))]
pub async fn run(gateway: &mut dyn Gateway, namespace: &Ident, tables: &TransformTables) -> Result<QualifiedName> {
    let mut current = None;
    for (stage, statement) in statements(namespace, tables) {
        if current != Some(stage) {
            info!(stage = %stage, "Starting join stage");
            current = Some(stage);
        }
        gateway.execute(&statement).await?;
    }

    let export = tables.export_table(namespace);
    info!(table = %export, "Join pipeline complete");
    Ok(export)
}
