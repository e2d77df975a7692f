//! Permission fold errors.

use electric_core::TableName;
use thiserror::Error;

/// A contradiction between a DDLX permission command and the current schema
/// or rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionsError {
    /// The target table is not electrified.
    #[error("table {table} is not electrified")]
    NotElectrified {
        /// The offending table.
        table: TableName,
    },

    /// A referenced column does not exist on the target table.
    #[error("column \"{column}\" does not exist on table {table}")]
    UnknownColumn {
        /// The table that was checked.
        table: TableName,
        /// The missing column.
        column: String,
    },

    /// The command does not modify permissions at all.
    #[error("{tag} does not modify permission rules")]
    NotPermissionCommand {
        /// The command's canonical tag.
        tag: &'static str,
    },

    /// The persisted rules row could not be decoded.
    #[error("malformed persisted rules: {0}")]
    Malformed(String),
}
