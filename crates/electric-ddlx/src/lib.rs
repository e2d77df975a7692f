//! # electric-ddlx
//!
//! SQL statement classification and the `ELECTRIC …` DDLX vocabulary.
//!
//! Classification is purely lexical: a tolerant tokenizer recognizes
//! transaction control, `CREATE/ALTER/DROP TABLE` with its target, and
//! statements opening with the `ELECTRIC` keyword, which are handed to the
//! DDLX parser. Whether a target table is *electrified* is the schema
//! loader's call, not this crate's.
//!
//! The DDLX side covers the typed command AST, its canonical rendering, the
//! feature-flag gate, and the compiler that turns a command plus a loaded
//! schema into the plain SQL the proxy runs upstream.

pub mod ast;
pub mod compiler;
pub mod error;
pub mod lex;
pub mod parser;
pub mod stmt;

pub use ast::{Action, DdlxCommand, Privilege, RoleSpec};
pub use compiler::compile;
pub use error::DdlxError;
pub use parser::parse;
pub use stmt::{classify, classify_batch, split_batch, DdlOp, Statement, TxControl};
