//! Parser for the `ELECTRIC …` grammar.

use crate::ast::{DdlxCommand, Privilege, RoleSpec};
use crate::error::DdlxError;
use crate::lex::{self, Tok, Token};
use electric_core::TableName;

/// Parse one complete `ELECTRIC …` statement.
pub fn parse(sql: &str) -> Result<DdlxCommand, DdlxError> {
    let tokens = lex::tokenize(sql).map_err(|e| DdlxError::Parse {
        line: e.line,
        col: e.col,
        message: e.message,
    })?;
    parse_tokens(sql, &tokens)
}

/// Parse an already-tokenized `ELECTRIC …` statement.
pub(crate) fn parse_tokens(sql: &str, tokens: &[Token]) -> Result<DdlxCommand, DdlxError> {
    let mut cursor = Cursor {
        sql,
        tokens,
        pos: 0,
    };
    cursor.expect_word("ELECTRIC")?;

    let command = match cursor.word()?.as_str() {
        "enable" => DdlxCommand::Enable {
            table: cursor.table_name()?,
        },
        "disable" => DdlxCommand::Disable {
            table: cursor.table_name()?,
        },
        "grant" => {
            let privilege = cursor.privilege()?;
            let columns = cursor.column_list_opt()?;
            cursor.expect_word("ON")?;
            let table = cursor.table_name()?;
            cursor.expect_word("TO")?;
            let role = cursor.string()?;
            let check = if cursor.eat_word("where") {
                Some(cursor.paren_expr()?)
            } else {
                None
            };
            DdlxCommand::Grant {
                privilege,
                table,
                role,
                columns,
                check,
            }
        }
        "revoke" => {
            let privilege = cursor.privilege()?;
            let columns = cursor.column_list_opt()?;
            cursor.expect_word("ON")?;
            let table = cursor.table_name()?;
            cursor.expect_word("FROM")?;
            let role = cursor.string()?;
            DdlxCommand::Revoke {
                privilege,
                table,
                role,
                columns,
            }
        }
        "assign" => {
            let role = cursor.role_spec()?;
            cursor.expect_word("TO")?;
            let (table, user_column) = cursor.column_ref()?;
            let role = resolve_role(&mut cursor, role, &table)?;
            let if_expr = if cursor.eat_word("if") {
                Some(cursor.paren_expr()?)
            } else {
                None
            };
            DdlxCommand::Assign {
                table,
                user_column,
                role,
                if_expr,
            }
        }
        "unassign" => {
            let role = cursor.role_spec()?;
            cursor.expect_word("FROM")?;
            let (table, user_column) = cursor.column_ref()?;
            let role = resolve_role(&mut cursor, role, &table)?;
            DdlxCommand::Unassign {
                table,
                user_column,
                role,
            }
        }
        "sqlite" => DdlxCommand::Sqlite {
            body: cursor.string()?,
        },
        other => {
            return Err(cursor.error_prev(format!(
                "unknown ELECTRIC command \"{}\"",
                other.to_uppercase()
            )));
        }
    };

    cursor.expect_end()?;
    Ok(command)
}

/// The role side of ASSIGN/UNASSIGN before the scope table is known.
enum RawRole {
    Literal(String),
    Column { table: TableName, column: String },
}

/// A column-reference role must live on the assignment scope table.
fn resolve_role(
    cursor: &mut Cursor<'_>,
    role: RawRole,
    scope: &TableName,
) -> Result<RoleSpec, DdlxError> {
    match role {
        RawRole::Literal(name) => Ok(RoleSpec::Literal(name)),
        RawRole::Column { table, column } => {
            if &table == scope {
                Ok(RoleSpec::Column(column))
            } else {
                Err(cursor.error_prev(format!(
                    "role column {table}.{column} must belong to the assignment table {scope}"
                )))
            }
        }
    }
}

struct Cursor<'a> {
    sql: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    /// Error anchored at the current token (or end of input).
    fn error(&self, message: impl Into<String>) -> DdlxError {
        let (line, col) = match self.peek() {
            Some(token) => (token.line, token.col),
            None => self
                .tokens
                .last()
                .map(|t| (t.line, t.col + (t.end - t.start) as u32))
                .unwrap_or((1, 1)),
        };
        DdlxError::Parse {
            line,
            col,
            message: message.into(),
        }
    }

    /// Error anchored at the previously consumed token.
    fn error_prev(&self, message: impl Into<String>) -> DdlxError {
        let (line, col) = self
            .tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| (t.line, t.col))
            .unwrap_or((1, 1));
        DdlxError::Parse {
            line,
            col,
            message: message.into(),
        }
    }

    fn word(&mut self) -> Result<String, DdlxError> {
        match self.peek() {
            Some(Token {
                tok: Tok::Word(w), ..
            }) => {
                let w = w.clone();
                self.bump();
                Ok(w)
            }
            Some(token) => Err(self.error(format!("expected a keyword, found {}", token.tok))),
            None => Err(self.error("unexpected end of command")),
        }
    }

    fn expect_word(&mut self, expected: &str) -> Result<(), DdlxError> {
        match self.peek() {
            Some(Token {
                tok: Tok::Word(w), ..
            }) if w.eq_ignore_ascii_case(expected) => {
                self.bump();
                Ok(())
            }
            Some(token) => Err(self.error(format!("expected {expected}, found {}", token.tok))),
            None => Err(self.error(format!("expected {expected}"))),
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if let Some(Token {
            tok: Tok::Word(w), ..
        }) = self.peek()
        {
            if w == word {
                self.bump();
                return true;
            }
        }
        false
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if let Some(Token { tok: Tok::Symbol(c), .. }) = self.peek() {
            if *c == symbol {
                self.bump();
                return true;
            }
        }
        false
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<(), DdlxError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            match self.peek() {
                Some(token) => {
                    Err(self.error(format!("expected \"{symbol}\", found {}", token.tok)))
                }
                None => Err(self.error(format!("expected \"{symbol}\""))),
            }
        }
    }

    /// A single identifier part: unquoted word or quoted identifier.
    fn name_part(&mut self) -> Result<String, DdlxError> {
        match self.peek() {
            Some(Token {
                tok: Tok::Word(w), ..
            }) => {
                let w = w.clone();
                self.bump();
                Ok(w)
            }
            Some(Token {
                tok: Tok::Ident(i), ..
            }) => {
                let i = i.clone();
                self.bump();
                Ok(i)
            }
            Some(token) => Err(self.error(format!("expected an identifier, found {}", token.tok))),
            None => Err(self.error("expected an identifier")),
        }
    }

    /// A possibly schema-qualified table name.
    fn table_name(&mut self) -> Result<TableName, DdlxError> {
        let first = self.name_part()?;
        if self.eat_symbol('.') {
            let second = self.name_part()?;
            Ok(TableName::new(first, second))
        } else {
            Ok(TableName::new("public", first))
        }
    }

    /// A `table.column` or `schema.table.column` reference.
    fn column_ref(&mut self) -> Result<(TableName, String), DdlxError> {
        let first = self.name_part()?;
        self.expect_symbol('.')?;
        let second = self.name_part()?;
        if self.eat_symbol('.') {
            let third = self.name_part()?;
            Ok((TableName::new(first, second), third))
        } else {
            Ok((TableName::new("public", first), second))
        }
    }

    fn privilege(&mut self) -> Result<Privilege, DdlxError> {
        let privilege = match self.peek() {
            Some(Token {
                tok: Tok::Word(w), ..
            }) => match w.as_str() {
                "select" => Privilege::Select,
                "insert" => Privilege::Insert,
                "update" => Privilege::Update,
                "delete" => Privilege::Delete,
                "read" => Privilege::Read,
                "write" => Privilege::Write,
                "all" => Privilege::All,
                other => {
                    return Err(self.error(format!("unknown privilege \"{other}\"")));
                }
            },
            Some(token) => {
                return Err(self.error(format!("expected a privilege, found {}", token.tok)));
            }
            None => return Err(self.error("expected a privilege")),
        };
        self.bump();
        if privilege == Privilege::All {
            self.eat_word("privileges");
        }
        Ok(privilege)
    }

    /// An optional parenthesized column list.
    fn column_list_opt(&mut self) -> Result<Option<Vec<String>>, DdlxError> {
        if !self.eat_symbol('(') {
            return Ok(None);
        }
        let mut columns = vec![self.name_part()?];
        while self.eat_symbol(',') {
            columns.push(self.name_part()?);
        }
        self.expect_symbol(')')?;
        Ok(Some(columns))
    }

    /// A single-quoted string literal.
    fn string(&mut self) -> Result<String, DdlxError> {
        match self.peek() {
            Some(Token {
                tok: Tok::Str(s), ..
            }) => {
                let s = s.clone();
                self.bump();
                Ok(s)
            }
            Some(token) => {
                Err(self.error(format!("expected a string literal, found {}", token.tok)))
            }
            None => Err(self.error("expected a string literal")),
        }
    }

    /// A role spec: string literal or column reference.
    fn role_spec(&mut self) -> Result<RawRole, DdlxError> {
        match self.peek() {
            Some(Token {
                tok: Tok::Str(_), ..
            }) => Ok(RawRole::Literal(self.string()?)),
            _ => {
                let (table, column) = self.column_ref()?;
                Ok(RawRole::Column { table, column })
            }
        }
    }

    /// A parenthesized expression, captured as the raw SQL between the
    /// balanced parens.
    fn paren_expr(&mut self) -> Result<String, DdlxError> {
        self.expect_symbol('(')?;
        let start = match self.peek() {
            Some(token) => token.start,
            None => return Err(self.error("unterminated expression")),
        };
        let mut depth = 1u32;
        let mut end = start;
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated expression")),
                Some(token) => match token.tok {
                    Tok::Symbol('(') => depth += 1,
                    Tok::Symbol(')') => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                },
            }
            end = self.tokens[self.pos - 1].end;
        }
        Ok(self.sql[start..end].trim().to_string())
    }

    fn expect_end(&mut self) -> Result<(), DdlxError> {
        // A trailing semicolon is harmless.
        self.eat_symbol(';');
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.error(format!("unexpected trailing input {}", token.tok))),
        }
    }
}
