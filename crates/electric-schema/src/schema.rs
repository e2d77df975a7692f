//! Schema value objects.

use electric_core::TableName;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use thiserror::Error;

/// The resolved layout of one table, as captured by the introspection query.
/// Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Schema {
    /// The namespace the table lives in.
    pub schema: String,
    /// The relation name.
    pub name: String,
    /// Whether the table is registered for replication.
    pub electrified: bool,
    /// Ordered column list.
    pub columns: Vec<Column>,
    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,
    /// Outbound foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Column {
    /// The column name.
    pub name: String,
    /// The formatted type, e.g. `integer` or `character varying(64)`.
    pub data_type: String,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// The default expression, if any.
    #[serde(default)]
    pub default: Option<String>,
}

/// One outbound foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ForeignKey {
    /// Local columns, in constraint order.
    pub columns: Vec<String>,
    /// The referenced side.
    pub references: ForeignKeyTarget,
    /// ON DELETE action.
    pub on_delete: RefAction,
    /// ON UPDATE action.
    pub on_update: RefAction,
}

/// The referenced table and columns of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ForeignKeyTarget {
    /// Referenced namespace.
    pub schema: String,
    /// Referenced relation.
    pub table: String,
    /// Referenced columns, matching the local column order.
    pub columns: Vec<String>,
}

/// A referential action, decoded from the pg_constraint action code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl<'de> Deserialize<'de> for RefAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        match code.as_str() {
            "a" => Ok(RefAction::NoAction),
            "r" => Ok(RefAction::Restrict),
            "c" => Ok(RefAction::Cascade),
            "n" => Ok(RefAction::SetNull),
            "d" => Ok(RefAction::SetDefault),
            other => Err(de::Error::custom(format!(
                "unknown referential action code '{other}'"
            ))),
        }
    }
}

/// A malformed introspection snapshot.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The JSON row did not match the expected snapshot shape.
    #[error("malformed schema snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Schema {
    /// Decode the JSON snapshot returned by the introspection query.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The qualified name of this table.
    pub fn table(&self) -> TableName {
        TableName::new(self.schema.clone(), self.name.clone())
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether every named column exists; returns the first missing name.
    pub fn missing_column<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Option<&'a str> {
        names.into_iter().find(|name| self.column(name).is_none())
    }
}
