//! Export of the final table to a local CSV file
//!
//! The file gets a header row with the table's column names, one line per
//! row, and no index column. An existing file is overwritten.

use crate::db::{CellValue, Gateway, TabularResult};
use crate::error::Result;
use crate::sql::{QualifiedName, Statement};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub fn select_all_statement(table: &QualifiedName) -> Statement {
    Statement::new(format!("SELECT * FROM {};", table))
}

/// Text written for one cell; NULL is an empty field
pub fn csv_field(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => String::new(),
        CellValue::Bool(true) => "True".to_string(),
        CellValue::Bool(false) => "False".to_string(),
        CellValue::Int(v) => v.to_string(),
        CellValue::Float(v) => format!("{:?}", v),
        CellValue::Text(s) => s.clone(),
    }
}

/// Write `result` as CSV with a header row
pub fn write_csv<W: io::Write>(result: &TabularResult, writer: W) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);

    csv_writer.write_record(&result.columns)?;
    for row in &result.rows {
        csv_writer.write_record(row.iter().map(csv_field))?;
    }
    csv_writer.flush()?;

    Ok(())
}

/// What the exporter wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub columns: Vec<String>,
    pub rows: usize,
}

/// Read `table` back and write it to `destination`
#[instrument(skip_all, fields(table = %table, destination = %destination.display()))]
pub async fn export(gateway: &mut dyn Gateway, table: &QualifiedName, destination: &Path) -> Result<ExportReport> {
    let result = gateway.query(&select_all_statement(table)).await?;

    let file = std::fs::File::create(destination)?;
    write_csv(&result, io::BufWriter::new(file))?;

    let path = std::path::absolute(destination).unwrap_or_else(|_| destination.to_path_buf());
    info!(
        rows = result.row_count(),
        path = %path.display(),
        "Successfully exported table and saved it locally"
    );

    Ok(ExportReport {
        path,
        columns: result.columns,
        rows: result.rows.len(),
    })
}
