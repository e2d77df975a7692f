//! The rules value and the permission fold.

use crate::error::PermissionsError;
use electric_core::TableName;
use electric_ddlx::{Action, DdlxCommand, RoleSpec};
use electric_schema::Schema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One granted action. Composite privilege words are expanded before rules
/// are stored, so every rule carries exactly one concrete action.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GrantRule {
    /// The electrified table the grant applies to.
    pub table: TableName,
    /// The receiving role.
    pub role: String,
    /// The granted action.
    pub action: Action,
    /// Column restriction; `None` grants the whole row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<BTreeSet<String>>,
    /// Row-level check expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

/// One role-assignment declaration.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AssignRule {
    /// The assignment scope table.
    pub table: TableName,
    /// Column holding the assigned user id.
    pub user_column: String,
    /// The assigned role.
    pub role: RoleSpec,
    /// Qualifying expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,
}

/// The global authorization rules: grants plus assignments. Ordered sets
/// keep the serialized form byte-deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rules {
    /// All granted actions.
    pub grants: BTreeSet<GrantRule>,
    /// All assignment declarations.
    pub assigns: BTreeSet<AssignRule>,
}

impl Rules {
    /// The empty rules value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no rule is present.
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.assigns.is_empty()
    }

    /// Deterministic serialized form, as persisted in the rules row.
    pub fn to_json(&self) -> String {
        // Serialization of ordered sets of plain values cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a persisted rules row.
    pub fn from_json(json: &str) -> Result<Self, PermissionsError> {
        serde_json::from_str(json).map_err(|e| PermissionsError::Malformed(e.to_string()))
    }
}

/// Fold one permission command into a new rules value.
///
/// Pure: the input rules are untouched, and equal inputs produce
/// byte-identical serialized output.
pub fn apply(
    rules: &Rules,
    command: &DdlxCommand,
    schema: &Schema,
) -> Result<Rules, PermissionsError> {
    let mut next = rules.clone();
    match command {
        DdlxCommand::Grant {
            privilege,
            table,
            role,
            columns,
            check,
        } => {
            require_electrified(schema, table)?;
            require_columns(schema, table, columns)?;
            let columns: Option<BTreeSet<String>> =
                columns.as_ref().map(|c| c.iter().cloned().collect());
            for action in privilege.actions() {
                next.grants.insert(GrantRule {
                    table: table.clone(),
                    role: role.clone(),
                    action: *action,
                    columns: columns.clone(),
                    check: check.clone(),
                });
            }
        }
        DdlxCommand::Revoke {
            privilege,
            table,
            role,
            columns,
        } => {
            require_electrified(schema, table)?;
            require_columns(schema, table, columns)?;
            let columns: Option<BTreeSet<String>> =
                columns.as_ref().map(|c| c.iter().cloned().collect());
            for action in privilege.actions() {
                // The check expression is not part of a revocation's
                // identity; a grant is removed check and all.
                next.grants.retain(|rule| {
                    !(rule.table == *table
                        && rule.role == *role
                        && rule.action == *action
                        && rule.columns == columns)
                });
            }
        }
        DdlxCommand::Assign {
            table,
            user_column,
            role,
            if_expr,
        } => {
            require_electrified(schema, table)?;
            require_column(schema, table, user_column)?;
            if let RoleSpec::Column(role_column) = role {
                require_column(schema, table, role_column)?;
            }
            next.assigns.insert(AssignRule {
                table: table.clone(),
                user_column: user_column.clone(),
                role: role.clone(),
                if_expr: if_expr.clone(),
            });
        }
        DdlxCommand::Unassign {
            table,
            user_column,
            role,
        } => {
            require_electrified(schema, table)?;
            next.assigns.retain(|rule| {
                !(rule.table == *table
                    && rule.user_column == *user_column
                    && rule.role == *role)
            });
        }
        other => {
            return Err(PermissionsError::NotPermissionCommand { tag: other.tag() });
        }
    }
    Ok(next)
}

fn require_electrified(schema: &Schema, table: &TableName) -> Result<(), PermissionsError> {
    if schema.electrified {
        Ok(())
    } else {
        Err(PermissionsError::NotElectrified {
            table: table.clone(),
        })
    }
}

fn require_columns(
    schema: &Schema,
    table: &TableName,
    columns: &Option<Vec<String>>,
) -> Result<(), PermissionsError> {
    if let Some(columns) = columns {
        if let Some(missing) = schema.missing_column(columns.iter().map(String::as_str)) {
            return Err(PermissionsError::UnknownColumn {
                table: table.clone(),
                column: missing.to_string(),
            });
        }
    }
    Ok(())
}

fn require_column(
    schema: &Schema,
    table: &TableName,
    column: &str,
) -> Result<(), PermissionsError> {
    if schema.column(column).is_some() {
        Ok(())
    } else {
        Err(PermissionsError::UnknownColumn {
            table: table.clone(),
            column: column.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use electric_ddlx::Privilege;

    fn projects_schema(electrified: bool) -> Schema {
        Schema::from_json(&format!(
            r#"{{
                "schema": "public",
                "name": "projects",
                "electrified": {electrified},
                "columns": [
                    {{"name": "id", "data_type": "uuid", "nullable": false, "default": null}},
                    {{"name": "title", "data_type": "text", "nullable": false, "default": null}},
                    {{"name": "owner_id", "data_type": "uuid", "nullable": true, "default": null}},
                    {{"name": "role_name", "data_type": "text", "nullable": true, "default": null}}
                ],
                "primary_key": ["id"],
                "foreign_keys": []
            }}"#
        ))
        .unwrap()
    }

    fn grant_all() -> DdlxCommand {
        DdlxCommand::Grant {
            privilege: Privilege::All,
            table: TableName::public("projects"),
            role: "member".into(),
            columns: None,
            check: None,
        }
    }

    #[test]
    fn test_grant_expands_composite_privileges() {
        let rules = apply(&Rules::new(), &grant_all(), &projects_schema(true)).unwrap();
        assert_eq!(rules.grants.len(), 4);
        assert!(rules.assigns.is_empty());
    }

    #[test]
    fn test_grant_on_non_electrified_rejected() {
        let err = apply(&Rules::new(), &grant_all(), &projects_schema(false)).unwrap_err();
        assert_eq!(
            err,
            PermissionsError::NotElectrified {
                table: TableName::public("projects")
            }
        );
    }

    #[test]
    fn test_grant_unknown_column_rejected() {
        let command = DdlxCommand::Grant {
            privilege: Privilege::Update,
            table: TableName::public("projects"),
            role: "member".into(),
            columns: Some(vec!["title".into(), "ghost".into()]),
            check: None,
        };
        let err = apply(&Rules::new(), &command, &projects_schema(true)).unwrap_err();
        assert!(matches!(
            err,
            PermissionsError::UnknownColumn { ref column, .. } if column == "ghost"
        ));
    }

    #[test]
    fn test_grant_revoke_inverse() {
        let schema = projects_schema(true);
        let original = Rules::new();
        let granted = apply(&original, &grant_all(), &schema).unwrap();
        assert!(!granted.is_empty());

        let revoke = DdlxCommand::Revoke {
            privilege: Privilege::All,
            table: TableName::public("projects"),
            role: "member".into(),
            columns: None,
        };
        let restored = apply(&granted, &revoke, &schema).unwrap();
        assert_eq!(restored, original);
        assert_eq!(restored.to_json(), original.to_json());
    }

    #[test]
    fn test_assign_unassign_inverse() {
        let schema = projects_schema(true);
        let original = Rules::new();
        let assign = DdlxCommand::Assign {
            table: TableName::public("projects"),
            user_column: "owner_id".into(),
            role: RoleSpec::Column("role_name".into()),
            if_expr: Some("row.active".into()),
        };
        let assigned = apply(&original, &assign, &schema).unwrap();
        assert_eq!(assigned.assigns.len(), 1);

        let unassign = DdlxCommand::Unassign {
            table: TableName::public("projects"),
            user_column: "owner_id".into(),
            role: RoleSpec::Column("role_name".into()),
        };
        let restored = apply(&assigned, &unassign, &schema).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_assign_unknown_column_rejected() {
        let command = DdlxCommand::Assign {
            table: TableName::public("projects"),
            user_column: "ghost".into(),
            role: RoleSpec::Literal("admin".into()),
            if_expr: None,
        };
        assert!(matches!(
            apply(&Rules::new(), &command, &projects_schema(true)),
            Err(PermissionsError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_fold_is_pure_and_deterministic() {
        let schema = projects_schema(true);
        let base = Rules::new();
        let once = apply(&base, &grant_all(), &schema).unwrap();
        let twice = apply(&base, &grant_all(), &schema).unwrap();
        assert!(base.is_empty());
        assert_eq!(once.to_json(), twice.to_json());

        // Granting again into an already-granted state is idempotent.
        let again = apply(&once, &grant_all(), &schema).unwrap();
        assert_eq!(once.to_json(), again.to_json());
    }

    #[test]
    fn test_json_roundtrip() {
        let schema = projects_schema(true);
        let rules = apply(&Rules::new(), &grant_all(), &schema).unwrap();
        let decoded = Rules::from_json(&rules.to_json()).unwrap();
        assert_eq!(rules, decoded);

        assert!(Rules::from_json("definitely not json").is_err());
    }

    #[test]
    fn test_non_permission_command_rejected() {
        let command = DdlxCommand::Enable {
            table: TableName::public("projects"),
        };
        assert!(matches!(
            apply(&Rules::new(), &command, &projects_schema(true)),
            Err(PermissionsError::NotPermissionCommand { .. })
        ));
    }
}
