//! The DDLX command AST.

use crate::error::DdlxError;
use electric_core::features::{
    PROXY_DDLX_ASSIGN, PROXY_DDLX_GRANT, PROXY_DDLX_REVOKE, PROXY_DDLX_SQLITE,
    PROXY_DDLX_UNASSIGN, PROXY_GRANT_WRITE_PERMISSIONS,
};
use electric_core::{FeatureFlags, TableName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A privilege word as written in a GRANT/REVOKE command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    /// Alias for SELECT.
    Read,
    /// INSERT + UPDATE + DELETE.
    Write,
    /// All four concrete actions.
    All,
}

/// A concrete grantable action; composite privilege words expand to these.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Select,
    Insert,
    Update,
    Delete,
}

impl Privilege {
    /// The keyword this privilege renders as.
    pub fn keyword(self) -> &'static str {
        match self {
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
            Privilege::Read => "READ",
            Privilege::Write => "WRITE",
            Privilege::All => "ALL",
        }
    }

    /// The concrete actions this privilege word covers.
    pub fn actions(self) -> &'static [Action] {
        match self {
            Privilege::Select | Privilege::Read => &[Action::Select],
            Privilege::Insert => &[Action::Insert],
            Privilege::Update => &[Action::Update],
            Privilege::Delete => &[Action::Delete],
            Privilege::Write => &[Action::Insert, Action::Update, Action::Delete],
            Privilege::All => &[
                Action::Select,
                Action::Insert,
                Action::Update,
                Action::Delete,
            ],
        }
    }

    /// Whether any covered action writes.
    pub fn includes_write(self) -> bool {
        self.actions().iter().any(|a| *a != Action::Select)
    }
}

/// The role side of an ASSIGN/UNASSIGN: a fixed role name or a column of the
/// assignment table that carries the role per row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoleSpec {
    /// A quoted role literal.
    Literal(String),
    /// A column reference on the assignment table.
    Column(String),
}

/// One parsed `ELECTRIC …` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlxCommand {
    /// Register a table for replication.
    Enable {
        /// The table to electrify.
        table: TableName,
    },
    /// Unregister a table.
    Disable {
        /// The table to stop replicating.
        table: TableName,
    },
    /// Grant a privilege on a table to a role.
    Grant {
        /// The privilege word as written.
        privilege: Privilege,
        /// Target table.
        table: TableName,
        /// Receiving role name.
        role: String,
        /// Optional column list restriction.
        columns: Option<Vec<String>>,
        /// Optional row-level check expression (raw SQL).
        check: Option<String>,
    },
    /// Revoke a previously granted privilege.
    Revoke {
        /// The privilege word as written.
        privilege: Privilege,
        /// Target table.
        table: TableName,
        /// Role losing the privilege.
        role: String,
        /// Optional column list restriction.
        columns: Option<Vec<String>>,
    },
    /// Declare a role assignment sourced from rows of a table.
    Assign {
        /// The assignment scope table.
        table: TableName,
        /// Column holding the assigned user id.
        user_column: String,
        /// The role being assigned.
        role: RoleSpec,
        /// Optional qualifying expression (raw SQL).
        if_expr: Option<String>,
    },
    /// Remove a role assignment declaration.
    Unassign {
        /// The assignment scope table.
        table: TableName,
        /// Column holding the assigned user id.
        user_column: String,
        /// The role being unassigned.
        role: RoleSpec,
    },
    /// Opaque SQL replayed verbatim on downstream replicas.
    Sqlite {
        /// The statement body.
        body: String,
    },
}

impl DdlxCommand {
    /// The canonical completion tag the client observes for this command.
    /// This is the single source of truth for the synthetic tags.
    pub fn tag(&self) -> &'static str {
        match self {
            DdlxCommand::Enable { .. } => "ELECTRIC ENABLE",
            DdlxCommand::Disable { .. } => "ELECTRIC DISABLE",
            DdlxCommand::Grant { .. } => "ELECTRIC GRANT",
            DdlxCommand::Revoke { .. } => "ELECTRIC REVOKE",
            DdlxCommand::Assign { .. } => "ELECTRIC ASSIGN",
            DdlxCommand::Unassign { .. } => "ELECTRIC UNASSIGN",
            DdlxCommand::Sqlite { .. } => "ELECTRIC SQLITE",
        }
    }

    /// The table this command needs a schema for, if any.
    pub fn target_table(&self) -> Option<&TableName> {
        match self {
            DdlxCommand::Enable { table }
            | DdlxCommand::Disable { table }
            | DdlxCommand::Grant { table, .. }
            | DdlxCommand::Revoke { table, .. }
            | DdlxCommand::Assign { table, .. }
            | DdlxCommand::Unassign { table, .. } => Some(table),
            DdlxCommand::Sqlite { .. } => None,
        }
    }

    /// Whether this command folds into the permission rules.
    pub fn modifies_permissions(&self) -> bool {
        matches!(
            self,
            DdlxCommand::Grant { .. }
                | DdlxCommand::Revoke { .. }
                | DdlxCommand::Assign { .. }
                | DdlxCommand::Unassign { .. }
        )
    }

    /// Reject the command if a feature it needs is disabled.
    pub fn check_features(&self, flags: &FeatureFlags) -> Result<(), DdlxError> {
        let mut needed: Vec<&'static str> = Vec::new();
        match self {
            DdlxCommand::Enable { .. } | DdlxCommand::Disable { .. } => {}
            DdlxCommand::Grant { privilege, .. } => {
                needed.push(PROXY_DDLX_GRANT);
                if privilege.includes_write() {
                    needed.push(PROXY_GRANT_WRITE_PERMISSIONS);
                }
            }
            DdlxCommand::Revoke { .. } => needed.push(PROXY_DDLX_REVOKE),
            DdlxCommand::Assign { .. } => needed.push(PROXY_DDLX_ASSIGN),
            DdlxCommand::Unassign { .. } => needed.push(PROXY_DDLX_UNASSIGN),
            DdlxCommand::Sqlite { .. } => needed.push(PROXY_DDLX_SQLITE),
        }
        for flag in needed {
            if !flags.enabled(flag) {
                return Err(DdlxError::FeatureDisabled { flag });
            }
        }
        Ok(())
    }
}

impl fmt::Display for DdlxCommand {
    /// Canonical rendering; re-parsing the output yields an equal command.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DdlxCommand::Enable { table } => {
                write!(f, "ELECTRIC ENABLE {}", render_table(table))
            }
            DdlxCommand::Disable { table } => {
                write!(f, "ELECTRIC DISABLE {}", render_table(table))
            }
            DdlxCommand::Grant {
                privilege,
                table,
                role,
                columns,
                check,
            } => {
                write!(f, "ELECTRIC GRANT {}", privilege.keyword())?;
                if let Some(columns) = columns {
                    write!(f, " ({})", render_columns(columns))?;
                }
                write!(
                    f,
                    " ON {} TO '{}'",
                    render_table(table),
                    role.replace('\'', "''")
                )?;
                if let Some(check) = check {
                    write!(f, " WHERE ({check})")?;
                }
                Ok(())
            }
            DdlxCommand::Revoke {
                privilege,
                table,
                role,
                columns,
            } => {
                write!(f, "ELECTRIC REVOKE {}", privilege.keyword())?;
                if let Some(columns) = columns {
                    write!(f, " ({})", render_columns(columns))?;
                }
                write!(
                    f,
                    " ON {} FROM '{}'",
                    render_table(table),
                    role.replace('\'', "''")
                )
            }
            DdlxCommand::Assign {
                table,
                user_column,
                role,
                if_expr,
            } => {
                write!(
                    f,
                    "ELECTRIC ASSIGN {} TO {}.{}",
                    render_role(role, table),
                    render_table(table),
                    render_ident(user_column)
                )?;
                if let Some(if_expr) = if_expr {
                    write!(f, " IF ({if_expr})")?;
                }
                Ok(())
            }
            DdlxCommand::Unassign {
                table,
                user_column,
                role,
            } => write!(
                f,
                "ELECTRIC UNASSIGN {} FROM {}.{}",
                render_role(role, table),
                render_table(table),
                render_ident(user_column)
            ),
            DdlxCommand::Sqlite { body } => {
                write!(f, "ELECTRIC SQLITE '{}'", body.replace('\'', "''"))
            }
        }
    }
}

fn render_role(role: &RoleSpec, table: &TableName) -> String {
    match role {
        RoleSpec::Literal(name) => format!("'{}'", name.replace('\'', "''")),
        RoleSpec::Column(column) => {
            format!("{}.{}", render_table(table), render_ident(column))
        }
    }
}

fn render_table(table: &TableName) -> String {
    if table.schema == "public" {
        render_ident(&table.name)
    } else {
        format!("{}.{}", render_ident(&table.schema), render_ident(&table.name))
    }
}

fn render_columns(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| render_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Quote an identifier only when PostgreSQL would require it.
fn render_ident(ident: &str) -> String {
    let simple = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !ident.chars().next().is_some_and(|c| c.is_ascii_digit());
    if simple {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}
