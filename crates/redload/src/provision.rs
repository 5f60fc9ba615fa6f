//! Table provisioning
//!
//! Creation is always "replace": drop whatever has the name, then create.
//! The two statements run separately, outside any transaction, so a failed
//! create leaves the table absent.

use crate::db::Gateway;
use crate::error::Result;
use crate::sql::{QualifiedName, Statement};
use tracing::{debug, instrument};

pub fn drop_table_statement(table: &QualifiedName) -> Statement {
    Statement::new(format!("DROP TABLE IF EXISTS {};", table))
}

/// `column_clause` is the output of
/// [`SourceTableSpec::column_definition_clause`](crate::schema::SourceTableSpec::column_definition_clause)
pub fn create_table_statement(table: &QualifiedName, column_clause: &str) -> Statement {
    Statement::new(format!("CREATE TABLE {} ({});", table, column_clause))
}

/// Drop and recreate `table` with the given columns
#[instrument(skip_all, fields(table = %table))]
pub async fn provision(gateway: &mut dyn Gateway, table: &QualifiedName, column_clause: &str) -> Result<()> {
    gateway.execute(&drop_table_statement(table)).await?;
    gateway.execute(&create_table_statement(table, column_clause)).await?;
    debug!("Table provisioned");
    Ok(())
}
