//! SQL text building blocks
//!
//! Redshift cannot bind parameters into DDL or `COPY`, so every name and
//! value spliced into statement text goes through one of the types here:
//!
//! - [`Ident`]: validated identifier, folded to lower case, always quoted
//! - [`QualifiedName`]: `"schema"."table"`
//! - [`SqlType`]: validated column type clause, e.g. `VARCHAR(256)`
//! - [`quote_literal`]: single-quoted string literal
//! - [`Statement`]: finished SQL text that knows which secrets it embeds

use crate::error::{LoadError, Result};
use redload_common::{secret, Secret};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Redshift identifier length limit in bytes
pub const MAX_IDENTIFIER_LEN: usize = 127;

#[allow(clippy::expect_used)]
static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier pattern"));

#[allow(clippy::expect_used)]
static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[a-z][a-z0-9_]*(?: [a-z][a-z0-9_]*)*(?:\s*\(\s*(?:\d+|max)\s*(?:,\s*\d+\s*)?\))?$",
    )
    .expect("type pattern")
});

/// A validated SQL identifier
///
/// Stored lower-cased and rendered double-quoted. Redshift folds
/// identifiers to lower case, so `PURCHASES`, `purchases` and `"purchases"`
/// all name the same table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    pub fn new(raw: &str) -> Result<Self> {
        if raw.len() > MAX_IDENTIFIER_LEN || !IDENT_RE.is_match(raw) {
            return Err(LoadError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(raw.to_lowercase()))
    }

    /// The folded, unquoted name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// `(namespace, name)` identity of a physical table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub namespace: Ident,
    pub name: Ident,
}

impl QualifiedName {
    pub fn new(namespace: Ident, name: Ident) -> Self {
        Self { namespace, name }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// A column type clause such as `INTEGER`, `DOUBLE PRECISION` or `DECIMAL(10, 2)`
///
/// Rendered exactly as declared (trimmed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlType(String);

impl SqlType {
    pub fn new(column: &str, raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if !TYPE_RE.is_match(trimmed) {
            return Err(LoadError::InvalidType {
                column: column.to_string(),
                column_type: raw.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render `value` as a single-quoted SQL string literal
///
/// Quotes are doubled. Backslashes and control characters are rejected
/// rather than escaped, because their meaning depends on server settings.
/// `what` names the value in the error message and must not be the value.
pub fn quote_literal(what: &'static str, value: &str) -> Result<String> {
    if value.chars().any(|c| c == '\\' || c.is_control()) {
        return Err(LoadError::InvalidLiteral(what));
    }
    Ok(format!("'{}'", value.replace('\'', "''")))
}

/// Finished SQL text ready for the gateway
///
/// `Display` and `Debug` mask every secret registered with
/// [`Statement::with_secret`]; only [`Statement::sql`] returns the raw text.
#[derive(Clone, PartialEq)]
pub struct Statement {
    sql: String,
    secrets: Vec<Secret>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            secrets: Vec::new(),
        }
    }

    /// Mask `secret` wherever it appears, including inside a quoted literal
    pub fn with_secret(mut self, secret: &Secret) -> Self {
        if !secret.is_empty() {
            if secret.expose().contains('\'') {
                self.secrets.push(Secret::new(secret.expose().replace('\'', "''")));
            }
            self.secrets.push(secret.clone());
        }
        self
    }

    /// Raw SQL text, secrets included. Only the gateway should call this.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn masked(&self) -> String {
        secret::mask(&self.sql, self.secrets.iter().map(Secret::expose))
    }

    /// First line of the masked text, for compact log fields
    pub fn label(&self) -> String {
        let masked = self.masked();
        masked.trim().lines().next().unwrap_or_default().trim().to_string()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement").field("sql", &self.masked()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ident_folds_and_quotes() {
        let ident = Ident::new("PURCHASES").unwrap();
        assert_eq!(ident.as_str(), "purchases");
        assert_eq!(ident.to_string(), "\"purchases\"");
    }

    #[test]
    fn test_ident_rejects_injection() {
        assert!(Ident::new("users; DROP TABLE x").is_err());
        assert!(Ident::new("a\"b").is_err());
        assert!(Ident::new("1abc").is_err());
        assert!(Ident::new("").is_err());
        assert!(Ident::new(&"a".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn test_qualified_name_display() {
        let name = QualifiedName::new(Ident::new("analytics").unwrap(), Ident::new("Users").unwrap());
        assert_eq!(name.to_string(), "\"analytics\".\"users\"");
    }

    #[test]
    fn test_sql_type_accepts_common_types() {
        for ty in [
            "INTEGER",
            "varchar(256)",
            "VARCHAR(MAX)",
            "DECIMAL(10, 2)",
            "DOUBLE PRECISION",
            "TIMESTAMP WITHOUT TIME ZONE",
            " DATE ",
        ] {
            assert!(SqlType::new("c", ty).is_ok(), "{ty} should be accepted");
        }
        assert_eq!(SqlType::new("c", " DATE ").unwrap().as_str(), "DATE");
    }

    #[test]
    fn test_sql_type_rejects_garbage() {
        for ty in ["", "INT); DROP TABLE x; --", "VARCHAR(abc)", "INT DEFAULT 'x'"] {
            assert!(SqlType::new("c", ty).is_err(), "{ty} should be rejected");
        }
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("bucket", "my-bucket").unwrap(), "'my-bucket'");
        assert_eq!(quote_literal("key", "o'brien.csv").unwrap(), "'o''brien.csv'");
        assert!(quote_literal("key", "a\\b").is_err());
        assert!(quote_literal("key", "a\nb").is_err());
    }

    #[test]
    fn test_statement_masks_secrets() {
        let secret = Secret::new("s3cr3t");
        let stmt = Statement::new("COPY x CREDENTIALS 'key=s3cr3t'").with_secret(&secret);
        assert_eq!(stmt.to_string(), "COPY x CREDENTIALS 'key=***'");
        assert!(!format!("{:?}", stmt).contains("s3cr3t"));
        assert!(stmt.sql().contains("s3cr3t"));
    }

    #[test]
    fn test_statement_masks_quoted_secret() {
        let secret = Secret::new("ab'cd");
        let literal = quote_literal("credentials", &format!("key={}", secret.expose())).unwrap();
        let stmt = Statement::new(format!("COPY x CREDENTIALS {}", literal)).with_secret(&secret);
        assert_eq!(stmt.to_string(), "COPY x CREDENTIALS 'key=***'");
        assert!(!stmt.label().contains("cd"));
    }

    #[test]
    fn test_statement_label_is_first_line() {
        let stmt = Statement::new("\n  CREATE TABLE a AS\n  SELECT 1;");
        assert_eq!(stmt.label(), "CREATE TABLE a AS");
    }

    proptest! {
        #[test]
        fn prop_valid_ident_never_contains_quote(raw in "[A-Za-z_][A-Za-z0-9_$]{0,40}") {
            let ident = Ident::new(&raw).unwrap();
            let rendered = ident.to_string();
            prop_assert_eq!(rendered.matches('"').count(), 2);
            prop_assert_eq!(ident.as_str(), raw.to_lowercase());
        }

        #[test]
        fn prop_literal_round_trips_quotes(value in "[a-zA-Z0-9'/+=._-]{0,40}") {
            let quoted = quote_literal("value", &value).unwrap();
            let inner = &quoted[1..quoted.len() - 1];
            prop_assert_eq!(inner.replace("''", "'"), value);
        }
    }
}
