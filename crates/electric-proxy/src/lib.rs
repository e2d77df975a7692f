//! # electric-proxy
//!
//! The proxy itself: a per-connection injector state machine multiplexing
//! the client and server frame streams, the schema loader it consults, the
//! bookkeeping-SQL generator it injects with, and the TCP plumbing that
//! carries it all.

pub mod error;
pub mod generator;
pub mod injector;
pub mod loader;
pub mod server;
pub mod session;

pub use error::ProxyError;
pub use generator::{QueryGenerator, StandardQueryGenerator};
pub use injector::{Injector, Reaction, Source};
pub use loader::SchemaLoader;
pub use server::ElectricProxy;
