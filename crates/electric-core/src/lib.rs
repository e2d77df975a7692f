//! # electric-core
//!
//! Shared kernel for the Electric Postgres proxy: the qualified table-name
//! value type, the process-wide feature flag map, and the
//! environment-variable configuration surface.

pub mod config;
pub mod features;
pub mod table;

pub use config::{ConfigError, ProxyConfig, UpstreamConfig};
pub use features::FeatureFlags;
pub use table::TableName;
