//! The DDLX compiler.
//!
//! Turns a command plus the loaded schema of its target into the ordered
//! list of plain SQL statements the proxy runs upstream. Compilation is
//! pure: permission commands and SQLITE bodies take effect in the rules
//! fold or the replication stream, never as upstream SQL.

use crate::ast::DdlxCommand;
use electric_schema::Schema;

/// Compile a command against its target schema.
///
/// `Enable` and `Disable` each produce exactly one top-level statement; the
/// electrify procedure owns the trigger and shadow-table DDL server-side so
/// the whole registration stays a single command.
pub fn compile(command: &DdlxCommand, schema: &Schema) -> Vec<String> {
    match command {
        DdlxCommand::Enable { .. } => {
            vec![format!(
                "CALL electric.electrify({})",
                schema.table().as_literal()
            )]
        }
        DdlxCommand::Disable { .. } => {
            vec![format!(
                "CALL electric.unelectrify({})",
                schema.table().as_literal()
            )]
        }
        DdlxCommand::Grant { .. }
        | DdlxCommand::Revoke { .. }
        | DdlxCommand::Assign { .. }
        | DdlxCommand::Unassign { .. }
        | DdlxCommand::Sqlite { .. } => Vec::new(),
    }
}
