//! Secret strings
//!
//! Passwords and AWS keys travel through configuration, `Debug` output and
//! rendered SQL. [`Secret`] keeps the raw value reachable only through
//! [`Secret::expose`], and [`mask`] scrubs known secrets out of arbitrary
//! text before it is logged.

use serde::Deserialize;
use std::fmt;

/// Replacement text for masked values
pub const MASK: &str = "***";

/// A string value that never appears in `Debug` or `Display` output
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(\"\")")
        } else {
            write!(f, "Secret({})", MASK)
        }
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

/// Replace every occurrence of each non-empty secret in `text` with [`MASK`]
///
/// Longer secrets are replaced first so a secret that contains another one
/// is masked as a whole.
pub fn mask<'a, I>(text: &str, secrets: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut secrets: Vec<&str> = secrets.into_iter().filter(|s| !s.is_empty()).collect();
    secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

    let mut masked = text.to_string();
    for secret in secrets {
        masked = masked.replace(secret, MASK);
    }
    masked
}
