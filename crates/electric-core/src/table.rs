//! Qualified table names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A schema-qualified table name, normalized the way PostgreSQL resolves
/// identifiers: unquoted parts fold to lower case, quoted parts are kept
/// verbatim with embedded `""` collapsed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName {
    /// The namespace the table lives in.
    pub schema: String,
    /// The relation name itself.
    pub name: String,
}

impl TableName {
    /// Create a table name from already-normalized parts.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// A table in the default `public` schema.
    pub fn public(name: impl Into<String>) -> Self {
        Self::new("public", name)
    }

    /// Parse a possibly schema-qualified, possibly quoted SQL identifier,
    /// e.g. `users`, `app.users`, or `"App"."Users"`.
    pub fn parse(ident: &str) -> Option<Self> {
        let mut parts = split_qualified(ident)?.into_iter();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, _) => Some(Self::new("public", name)),
            (Some(schema), Some(name), None) => Some(Self::new(schema, name)),
            _ => None,
        }
    }

    /// Render as a SQL string literal argument, e.g. `'app.users'`.
    pub fn as_literal(&self) -> String {
        format!(
            "'{}.{}'",
            self.schema.replace('\'', "''"),
            self.name.replace('\'', "''")
        )
    }

    /// Render as a quoted SQL identifier pair, safe to splice into DDL.
    pub fn as_ident(&self) -> String {
        format!(
            "\"{}\".\"{}\"",
            self.schema.replace('"', "\"\""),
            self.name.replace('"', "\"\"")
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.schema == "public" {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.schema, self.name)
        }
    }
}

/// Split a dotted identifier into its parts, honoring double quotes.
/// Returns `None` on unterminated quotes or empty parts.
fn split_qualified(ident: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = ident.trim().chars().peekable();
    let mut quoted_part = false;

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted_part = true;
                loop {
                    match chars.next() {
                        Some('"') => {
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                current.push('"');
                            } else {
                                break;
                            }
                        }
                        Some(inner) => current.push(inner),
                        None => return None,
                    }
                }
            }
            '.' => {
                if current.is_empty() {
                    return None;
                }
                parts.push(current.clone());
                current.clear();
                quoted_part = false;
            }
            c if c.is_whitespace() => {}
            c => {
                if quoted_part {
                    return None;
                }
                current.extend(c.to_lowercase());
            }
        }
    }

    if current.is_empty() {
        return None;
    }
    parts.push(current);
    Some(parts)
}
