//! # electric-schema
//!
//! The table-schema value model and the bundled introspection query.
//!
//! A [`Schema`] is produced from the single JSON row returned by
//! [`introspection_query`], is immutable once decoded, and is cached by the
//! proxy for the duration of the current transaction.

pub mod introspect;
pub mod schema;

pub use introspect::introspection_query;
pub use schema::{Column, ForeignKey, RefAction, Schema, SchemaError};
