//! Bookkeeping-SQL generation.
//!
//! The injector does not own the names of the bookkeeping objects or the
//! shape of the version stamp; it asks this collaborator. Tests substitute
//! an implementation with a fixed stamp.

use chrono::Utc;
use electric_core::TableName;
use electric_policy::Rules;

/// Produces the SQL the injector runs on its own behalf.
pub trait QueryGenerator: Send + Sync {
    /// The schema snapshot query for one table.
    fn introspection_query(&self, table: &TableName) -> String {
        electric_schema::introspection_query(table)
    }

    /// Loads the set of electrified tables at session start.
    fn electrified_query(&self) -> String;

    /// Loads the persisted permission rules row at session start.
    fn load_rules_query(&self) -> String;

    /// The version-capture insert run before a dirty transaction's COMMIT.
    fn capture_version_query(&self, version: &str) -> String;

    /// The rules upsert run when permissions changed in the transaction.
    fn save_rules_query(&self, rules: &Rules) -> String;

    /// A version stamp for transactions without a framework-supplied one.
    fn generate_version(&self) -> String;
}

/// The stock generator: bookkeeping lives in the `electric` schema and
/// generated versions are UTC timestamps at millisecond resolution.
#[derive(Debug, Clone, Default)]
pub struct StandardQueryGenerator;

impl QueryGenerator for StandardQueryGenerator {
    fn electrified_query(&self) -> String {
        "SELECT schema_name, table_name FROM electric.electrified ORDER BY schema_name, table_name"
            .to_string()
    }

    fn load_rules_query(&self) -> String {
        "SELECT convert_from(rules, 'UTF8') FROM electric.permission_rules WHERE id = 1"
            .to_string()
    }

    fn capture_version_query(&self, version: &str) -> String {
        format!(
            "INSERT INTO electric.migration_versions (version, applied_at, txid) \
             VALUES ({}, now(), txid_current())",
            sql_literal(version)
        )
    }

    fn save_rules_query(&self, rules: &Rules) -> String {
        format!(
            "INSERT INTO electric.permission_rules (id, rules, updated_at) \
             VALUES (1, convert_to({}, 'UTF8'), now()) \
             ON CONFLICT (id) DO UPDATE SET rules = EXCLUDED.rules, updated_at = EXCLUDED.updated_at",
            sql_literal(&rules.to_json())
        )
    }

    fn generate_version(&self) -> String {
        Utc::now().format("%Y%m%d%H%M%S%3f").to_string()
    }
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
