//! Schema registry
//!
//! Turns the load manifest (source file -> ordered columns) into validated
//! [`SourceTableSpec`]s. Declared column order is kept as written because
//! Redshift `COPY ... CSV` maps CSV fields to table columns by position.

use crate::config::OrderedMap;
use crate::error::{LoadError, Result};
use crate::sql::{Ident, SqlType};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: Ident,
    pub sql_type: SqlType,
}

/// One source file and the table it is loaded into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTableSpec {
    source_file: String,
    table: Ident,
    columns: Vec<ColumnDef>,
}

impl SourceTableSpec {
    pub fn new<'a, I>(source_file: &str, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let table = table_name(source_file)?;

        let mut seen = Vec::new();
        let mut defs = Vec::new();
        for (name, sql_type) in columns {
            let name = Ident::new(name)?;
            if seen.contains(&name) {
                return Err(LoadError::config(format!(
                    "column '{}' is declared twice for '{}'",
                    name.as_str(),
                    source_file
                )));
            }
            seen.push(name.clone());
            defs.push(ColumnDef {
                sql_type: SqlType::new(name.as_str(), sql_type)?,
                name,
            });
        }

        if defs.is_empty() {
            return Err(LoadError::config(format!(
                "no columns declared for '{}'",
                source_file
            )));
        }

        Ok(Self {
            source_file: source_file.to_string(),
            table,
            columns: defs,
        })
    }

    /// Object key of the source file inside the bucket
    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn table_name(&self) -> &Ident {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// `"col" TYPE, "col" TYPE, ...` in declaration order
    pub fn column_definition_clause(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.sql_type))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Derive the target table name of a source file
///
/// Takes the file name after the last `/` and drops everything from its
/// first `.`, so `exports/purchases.csv` and `purchases.2024.csv` both load
/// into `purchases`.
pub fn table_name(source_file: &str) -> Result<Ident> {
    let file_name = source_file.rsplit('/').next().unwrap_or(source_file);
    let stem = file_name.split('.').next().unwrap_or(file_name);
    if stem.is_empty() {
        return Err(LoadError::config(format!(
            "cannot derive a table name from source file '{}'",
            source_file
        )));
    }
    Ident::new(stem)
}

/// All source tables of a load run, in manifest order
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    specs: Vec<SourceTableSpec>,
}

impl SchemaRegistry {
    /// Build the registry, rejecting manifests where two files share a table
    pub fn from_manifest(manifest: &OrderedMap<OrderedMap<String>>) -> Result<Self> {
        let mut owners: HashMap<Ident, String> = HashMap::new();
        let mut specs = Vec::with_capacity(manifest.len());

        for (source_file, columns) in manifest.iter() {
            let spec = SourceTableSpec::new(
                source_file,
                columns.iter().map(|(name, ty)| (name, ty.as_str())),
            )?;

            if let Some(first) = owners.get(spec.table_name()) {
                return Err(LoadError::DuplicateTableName {
                    table: spec.table_name().as_str().to_string(),
                    first: first.clone(),
                    second: source_file.to_string(),
                });
            }
            owners.insert(spec.table_name().clone(), source_file.to_string());
            specs.push(spec);
        }

        Ok(Self { specs })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceTableSpec> {
        self.specs.iter()
    }

    pub fn get(&self, source_file: &str) -> Option<&SourceTableSpec> {
        self.specs.iter().find(|s| s.source_file == source_file)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
