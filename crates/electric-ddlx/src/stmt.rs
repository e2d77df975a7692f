//! Lexical statement classification.
//!
//! Decides, per statement, whether the proxy needs to do anything at all:
//! transaction control, table DDL (whose electrified status the schema
//! loader resolves), an `ELECTRIC …` command, or plain SQL to pass through.
//! Classification must accept anything the upstream would accept, so the
//! fallback for unparseable-but-not-ELECTRIC input is always `Plain`.

use crate::ast::DdlxCommand;
use crate::error::DdlxError;
use crate::lex::{self, Tok, Token};
use crate::parser;
use electric_core::TableName;
use sqlparser::ast as sp;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Transaction-control statements, with all PostgreSQL synonyms folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxControl {
    /// `BEGIN`, `START TRANSACTION`.
    Begin,
    /// `COMMIT`, `END`.
    Commit,
    /// `ROLLBACK`, `ABORT`.
    Rollback,
}

/// Table DDL operations the proxy tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlOp {
    CreateTable,
    AlterTable,
    DropTable,
}

/// The classification of one SQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Transaction control.
    TxControl(TxControl),
    /// Anything the proxy forwards untouched.
    Plain,
    /// Table DDL with its target; whether the target is electrified is the
    /// schema loader's call.
    Ddl {
        /// The target table.
        table: TableName,
        /// The operation kind.
        op: DdlOp,
    },
    /// An `ELECTRIC …` command.
    Ddlx(DdlxCommand),
}

/// Classify a single statement.
pub fn classify(sql: &str) -> Result<Statement, DdlxError> {
    let tokens = match lex::tokenize(sql) {
        Ok(tokens) => tokens,
        // Malformed input that is not ours to judge: forward it and let the
        // server produce the error. ELECTRIC statements are ours.
        Err(err) => {
            return if lex::leading_word(sql).as_deref() == Some("electric") {
                Err(DdlxError::Parse {
                    line: err.line,
                    col: err.col,
                    message: err.message,
                })
            } else {
                Ok(Statement::Plain)
            };
        }
    };

    let Some(first) = word_at(&tokens, 0) else {
        return Ok(Statement::Plain);
    };

    let statement = match first {
        "begin" => Statement::TxControl(TxControl::Begin),
        "start" if word_at(&tokens, 1) == Some("transaction") => {
            Statement::TxControl(TxControl::Begin)
        }
        "commit" | "end" if word_at(&tokens, 1) != Some("prepared") => {
            Statement::TxControl(TxControl::Commit)
        }
        "abort" => Statement::TxControl(TxControl::Rollback),
        "rollback"
            if word_at(&tokens, 1) != Some("to") && word_at(&tokens, 1) != Some("prepared") =>
        {
            Statement::TxControl(TxControl::Rollback)
        }
        "electric" => Statement::Ddlx(parser::parse_tokens(sql, &tokens)?),
        "create" => classify_create(sql, &tokens),
        "alter" if word_at(&tokens, 1) == Some("table") => classify_alter(sql, &tokens)?,
        "drop" if word_at(&tokens, 1) == Some("table") => {
            match extract_table(sql, &tokens, DdlOp::DropTable) {
                Some(table) => Statement::Ddl {
                    table,
                    op: DdlOp::DropTable,
                },
                None => Statement::Plain,
            }
        }
        _ => Statement::Plain,
    };
    Ok(statement)
}

/// Split a query string into its statements, the same way
/// [`classify_batch`] does.
pub fn split_batch(sql: &str) -> Vec<&str> {
    lex::split_statements(sql)
}

/// Classify every statement of a semicolon-separated batch. A batch
/// containing a DDLX command alongside any other statement is rejected.
pub fn classify_batch(sql: &str) -> Result<Vec<Statement>, DdlxError> {
    let statements = lex::split_statements(sql)
        .into_iter()
        .map(classify)
        .collect::<Result<Vec<_>, _>>()?;

    let has_ddlx = statements
        .iter()
        .any(|s| matches!(s, Statement::Ddlx(_)));
    if has_ddlx && statements.len() > 1 {
        return Err(DdlxError::MixedBatch);
    }
    Ok(statements)
}

fn classify_create(sql: &str, tokens: &[Token]) -> Statement {
    // Skip CREATE [GLOBAL|LOCAL] [TEMPORARY|TEMP] [UNLOGGED] TABLE …
    let mut i = 1;
    while matches!(
        word_at(tokens, i),
        Some("global" | "local" | "temporary" | "temp" | "unlogged")
    ) {
        i += 1;
    }
    if word_at(tokens, i) != Some("table") {
        return Statement::Plain;
    }
    match extract_table(sql, tokens, DdlOp::CreateTable) {
        Some(table) => Statement::Ddl {
            table,
            op: DdlOp::CreateTable,
        },
        None => Statement::Plain,
    }
}

fn classify_alter(sql: &str, tokens: &[Token]) -> Result<Statement, DdlxError> {
    // The ALTER TABLE … ENABLE|DISABLE ELECTRIC alias belongs to the DDLX
    // vocabulary, not to PostgreSQL.
    let trailing: Vec<&str> = tokens
        .iter()
        .rev()
        .filter_map(|t| match &t.tok {
            Tok::Word(w) => Some(w.as_str()),
            _ => None,
        })
        .take(2)
        .collect();
    if trailing.len() == 2 && trailing[0] == "electric" {
        let verb = trailing[1];
        if verb == "enable" || verb == "disable" {
            let Some(table) = table_from_tokens(tokens) else {
                let anchor = &tokens[0];
                return Err(DdlxError::Parse {
                    line: anchor.line,
                    col: anchor.col,
                    message: "malformed ALTER TABLE … ELECTRIC statement".to_string(),
                });
            };
            let command = if verb == "enable" {
                DdlxCommand::Enable { table }
            } else {
                DdlxCommand::Disable { table }
            };
            return Ok(Statement::Ddlx(command));
        }
    }

    Ok(match extract_table(sql, tokens, DdlOp::AlterTable) {
        Some(table) => Statement::Ddl {
            table,
            op: DdlOp::AlterTable,
        },
        None => Statement::Plain,
    })
}

/// The word at token index `i`, if that token is an unquoted word.
fn word_at<'a>(tokens: &'a [Token], i: usize) -> Option<&'a str> {
    match tokens.get(i).map(|t| &t.tok) {
        Some(Tok::Word(w)) => Some(w.as_str()),
        _ => None,
    }
}

/// Extract the DDL target, preferring a real parse of the statement and
/// falling back to token scanning for SQL `sqlparser` cannot digest.
fn extract_table(sql: &str, tokens: &[Token], op: DdlOp) -> Option<TableName> {
    table_via_sqlparser(sql, op).or_else(|| table_from_tokens(tokens))
}

fn table_via_sqlparser(sql: &str, op: DdlOp) -> Option<TableName> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let [statement] = statements.as_slice() else {
        return None;
    };
    let rendered = match (op, statement) {
        (DdlOp::CreateTable, sp::Statement::CreateTable(create)) => create.name.to_string(),
        (DdlOp::AlterTable, sp::Statement::AlterTable(alter_table)) => {
            alter_table.name.to_string()
        }
        (
            DdlOp::DropTable,
            sp::Statement::Drop {
                object_type: sp::ObjectType::Table,
                names,
                ..
            },
        ) => names.first()?.to_string(),
        _ => return None,
    };
    TableName::parse(&rendered)
}

/// Token-level fallback: the identifier after the TABLE keyword, skipping
/// IF [NOT] EXISTS and ONLY.
fn table_from_tokens(tokens: &[Token]) -> Option<TableName> {
    let mut i = tokens
        .iter()
        .position(|t| matches!(&t.tok, Tok::Word(w) if w == "table"))?
        + 1;
    while matches!(word_at(tokens, i), Some("if" | "not" | "exists" | "only")) {
        i += 1;
    }

    let first = name_part(tokens, i)?;
    if matches!(tokens.get(i + 1).map(|t| &t.tok), Some(Tok::Symbol('.'))) {
        let second = name_part(tokens, i + 2)?;
        Some(TableName::new(first, second))
    } else {
        Some(TableName::new("public", first))
    }
}

fn name_part(tokens: &[Token], i: usize) -> Option<String> {
    match tokens.get(i).map(|t| &t.tok) {
        Some(Tok::Word(w)) => Some(w.clone()),
        Some(Tok::Ident(ident)) => Some(ident.clone()),
        _ => None,
    }
}
