//! Header preflight
//!
//! `COPY` maps CSV fields to table columns by position, so a source file
//! whose columns are ordered differently from its manifest entry loads
//! silently wrong data. The preflight reads the header line of every source
//! object and compares it with the declared columns before anything touches
//! the database.

use crate::error::{LoadError, Result};
use crate::schema::{SchemaRegistry, SourceTableSpec};
use async_trait::async_trait;
use tracing::{debug, info, instrument};

/// Something that can hand out the leading bytes of a stored object
#[async_trait]
pub trait ObjectHeaderSource: Send + Sync {
    async fn head_bytes(&self, key: &str) -> Result<Vec<u8>>;
}

/// Field names of the first CSV record in `bytes`
///
/// An empty object yields no names. A UTF-8 byte order mark is ignored.
pub fn parse_header(bytes: &[u8]) -> Result<Vec<String>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut record = csv::StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Ok(Vec::new());
    }

    Ok(record.iter().map(|f| f.to_string()).collect())
}

/// Compare a file's header with its declared columns, by position
///
/// Names are trimmed and compared case-insensitively.
pub fn check_header(spec: &SourceTableSpec, actual: &[String]) -> Result<()> {
    let expected = spec.column_names();

    let matches = expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(e, a)| e.eq_ignore_ascii_case(a.trim()));

    if matches {
        return Ok(());
    }

    Err(LoadError::HeaderMismatch {
        file: spec.source_file().to_string(),
        expected: expected.iter().map(|s| s.to_string()).collect(),
        actual: actual.iter().map(|s| s.trim().to_string()).collect(),
    })
}

/// Check every file of the registry, stopping at the first mismatch
#[instrument(skip_all, fields(files = registry.len()))]
pub async fn verify_headers(source: &dyn ObjectHeaderSource, registry: &SchemaRegistry) -> Result<()> {
    for spec in registry.iter() {
        let bytes = source.head_bytes(spec.source_file()).await?;
        let header = parse_header(&bytes)?;
        check_header(spec, &header)?;
        debug!(source_file = %spec.source_file(), columns = header.len(), "Header matches");
    }

    info!("All source file headers match their declared columns");
    Ok(())
}
