//! Session-level schema knowledge.
//!
//! Two layers: the set of electrified tables loaded once per session from
//! the bookkeeping table, and the per-transaction state — an overlay of
//! `ELECTRIC ENABLE`/`DISABLE` effects not yet committed, plus the schema
//! cache that bounds introspection to one round-trip per table per
//! transaction. The per-transaction layer is dropped whenever the
//! connection returns to idle or fails.

use electric_core::TableName;
use electric_schema::Schema;
use std::collections::{HashMap, HashSet};

/// The loader state the injector consults.
#[derive(Debug, Default)]
pub struct SchemaLoader {
    /// Electrified tables as of session start plus committed changes.
    electrified: HashSet<TableName>,
    /// Electrification changes made inside the open transaction.
    overlay: HashMap<TableName, bool>,
    /// Schemas introspected inside the open transaction.
    cache: HashMap<TableName, Schema>,
}

impl SchemaLoader {
    /// A loader seeded with the session's electrified set.
    pub fn new(electrified: HashSet<TableName>) -> Self {
        Self {
            electrified,
            overlay: HashMap::new(),
            cache: HashMap::new(),
        }
    }

    /// Is the table electrified, as seen by the open transaction?
    pub fn is_electrified(&self, table: &TableName) -> bool {
        match self.overlay.get(table) {
            Some(on) => *on,
            None => self.electrified.contains(table),
        }
    }

    /// The cached schema for a table, adjusted for uncommitted
    /// electrification changes.
    pub fn cached(&self, table: &TableName) -> Option<Schema> {
        let mut schema = self.cache.get(table)?.clone();
        if let Some(on) = self.overlay.get(table) {
            schema.electrified = *on;
        }
        Some(schema)
    }

    /// Cache an introspected schema for the rest of the transaction.
    pub fn insert(&mut self, schema: Schema) {
        self.cache.insert(schema.table(), schema);
    }

    /// Record an electrification change made inside the transaction.
    pub fn set_electrified(&mut self, table: TableName, on: bool) {
        self.overlay.insert(table, on);
    }

    /// Drop all per-transaction state (rollback or failure).
    pub fn abort_tx(&mut self) {
        self.overlay.clear();
        self.cache.clear();
    }

    /// Merge the overlay into the session set and drop the cache (commit).
    pub fn commit_tx(&mut self) {
        for (table, on) in self.overlay.drain() {
            if on {
                self.electrified.insert(table);
            } else {
                self.electrified.remove(&table);
            }
        }
        self.cache.clear();
    }
}
