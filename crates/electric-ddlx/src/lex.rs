//! A tolerant SQL tokenizer.
//!
//! Used for batch splitting and leading-keyword classification, and as the
//! token source for the DDLX parser. It must accept anything PostgreSQL
//! would: comments (nested block comments included), single-quoted and
//! dollar-quoted strings, quoted identifiers. It never interprets; it only
//! frames tokens.

use std::fmt;

/// One lexed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// What the token is.
    pub tok: Tok,
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column.
    pub col: u32,
    /// Byte offset of the token start in the input.
    pub start: usize,
    /// Byte offset just past the token end.
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    /// Unquoted word, folded to lower case.
    Word(String),
    /// Double-quoted identifier, verbatim (embedded `""` collapsed).
    Ident(String),
    /// Single-quoted or dollar-quoted string content.
    Str(String),
    /// Numeric literal, verbatim.
    Number(String),
    /// Any other single character.
    Symbol(char),
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Word(w) => write!(f, "{w}"),
            Tok::Ident(i) => write!(f, "\"{i}\""),
            Tok::Str(_) => write!(f, "string literal"),
            Tok::Number(n) => write!(f, "{n}"),
            Tok::Symbol(c) => write!(f, "{c}"),
        }
    }
}

/// An unterminated quote or comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// 1-based line where the construct opened.
    pub line: u32,
    /// 1-based column where the construct opened.
    pub col: u32,
    /// What was left open.
    pub message: String,
}

struct Scanner<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    /// Skip whitespace and comments. Returns an error only for an
    /// unterminated block comment.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    self.bump();
                    let mut depth = 1u32;
                    loop {
                        match self.peek() {
                            None => {
                                return Err(LexError {
                                    line,
                                    col,
                                    message: "unterminated block comment".to_string(),
                                });
                            }
                            Some(b'/') if self.peek_at(1) == Some(b'*') => {
                                self.bump();
                                self.bump();
                                depth += 1;
                            }
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.bump();
                                self.bump();
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some(_) => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_trivia()?;
        let (line, col, start) = (self.line, self.col, self.pos);
        let Some(b) = self.peek() else {
            return Ok(None);
        };

        let tok = match b {
            b'\'' => {
                self.bump();
                let value = self.quoted_body(b'\'', line, col, "unterminated string literal")?;
                Tok::Str(value)
            }
            b'"' => {
                self.bump();
                let value =
                    self.quoted_body(b'"', line, col, "unterminated quoted identifier")?;
                Tok::Ident(value)
            }
            b'$' if self.dollar_tag_len().is_some() => {
                let tag_len = self.dollar_tag_len().unwrap_or(2);
                let tag = self.input[self.pos..self.pos + tag_len].to_string();
                for _ in 0..tag_len {
                    self.bump();
                }
                let body_start = self.pos;
                loop {
                    if self.pos >= self.bytes.len() {
                        return Err(LexError {
                            line,
                            col,
                            message: "unterminated dollar-quoted string".to_string(),
                        });
                    }
                    if self.bytes[self.pos..].starts_with(tag.as_bytes()) {
                        let body = self.input[body_start..self.pos].to_string();
                        for _ in 0..tag_len {
                            self.bump();
                        }
                        break Tok::Str(body);
                    }
                    self.bump();
                }
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let mut word = String::new();
                while let Some(b) = self.peek() {
                    if b.is_ascii_alphanumeric() || b == b'_' || b == b'$' {
                        word.push(b.to_ascii_lowercase() as char);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Tok::Word(word)
            }
            b if b.is_ascii_digit() => {
                let mut number = String::new();
                while let Some(b) = self.peek() {
                    if b.is_ascii_digit() || b == b'.' {
                        number.push(b as char);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Tok::Number(number)
            }
            _ => {
                self.bump();
                Tok::Symbol(b as char)
            }
        };

        Ok(Some(Token {
            tok,
            line,
            col,
            start,
            end: self.pos,
        }))
    }

    /// Consume the body of a quoted construct whose opener is already eaten,
    /// collapsing doubled quote characters. Byte-accurate for any UTF-8.
    fn quoted_body(
        &mut self,
        quote: u8,
        line: u32,
        col: u32,
        unterminated: &str,
    ) -> Result<String, LexError> {
        let mut raw: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                None => {
                    return Err(LexError {
                        line,
                        col,
                        message: unterminated.to_string(),
                    });
                }
                Some(b) if b == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                        raw.push(quote);
                    } else {
                        return Ok(String::from_utf8_lossy(&raw).into_owned());
                    }
                }
                Some(other) => raw.push(other),
            }
        }
    }

    /// Length of a `$tag$` opener at the cursor, if one is present.
    fn dollar_tag_len(&self) -> Option<usize> {
        debug_assert_eq!(self.peek(), Some(b'$'));
        let mut i = 1;
        loop {
            match self.peek_at(i) {
                Some(b'$') => return Some(i + 1),
                Some(b) if b.is_ascii_alphanumeric() || b == b'_' => i += 1,
                _ => return None,
            }
        }
    }
}

/// Tokenize a full statement.
pub fn tokenize(sql: &str) -> Result<Vec<Token>, LexError> {
    let mut scanner = Scanner::new(sql);
    let mut tokens = Vec::new();
    while let Some(token) = scanner.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

/// Split a query string into its semicolon-separated statements, honoring
/// quotes and comments. Unterminated constructs swallow the rest of the
/// input (the statement is then handed through for the server to reject).
/// Empty fragments are dropped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut scanner = Scanner::new(sql);
    let mut parts = Vec::new();
    let mut start = 0;
    let mut tokens_in_part = 0usize;
    loop {
        match scanner.next_token() {
            Ok(Some(token)) => {
                if token.tok == Tok::Symbol(';') {
                    if tokens_in_part > 0 {
                        parts.push(sql[start..token.start].trim());
                    }
                    start = token.end;
                    tokens_in_part = 0;
                } else {
                    tokens_in_part += 1;
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
    // A trailing fragment counts only if it holds real tokens; comment-only
    // tails are noise.
    if tokens_in_part > 0 {
        let tail = sql[start..].trim();
        if !tail.is_empty() {
            parts.push(tail);
        }
    }
    parts
}

/// The first unquoted word of a statement, lower case, skipping comments.
/// Total: returns `None` rather than erroring on malformed input.
pub fn leading_word(sql: &str) -> Option<String> {
    let mut scanner = Scanner::new(sql);
    match scanner.next_token() {
        Ok(Some(Token {
            tok: Tok::Word(w), ..
        })) => Some(w),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(sql: &str) -> Vec<String> {
        tokenize(sql)
            .unwrap()
            .into_iter()
            .filter_map(|t| match t.tok {
                Tok::Word(w) => Some(w),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_words_lowercased() {
        assert_eq!(words("BEGIN"), vec!["begin"]);
        assert_eq!(
            words("Alter TABLE users ADD COLUMN email text"),
            vec!["alter", "table", "users", "add", "column", "email", "text"]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            words("-- leading\n/* block /* nested */ */ COMMIT"),
            vec!["commit"]
        );
    }

    #[test]
    fn test_string_and_ident() {
        let tokens = tokenize("ELECTRIC GRANT ALL ON \"Projects\" TO 'member'").unwrap();
        assert!(tokens
            .iter()
            .any(|t| t.tok == Tok::Ident("Projects".to_string())));
        assert!(tokens
            .iter()
            .any(|t| t.tok == Tok::Str("member".to_string())));
    }

    #[test]
    fn test_quote_escapes() {
        let tokens = tokenize("'it''s' \"a\"\"b\"").unwrap();
        assert_eq!(tokens[0].tok, Tok::Str("it's".to_string()));
        assert_eq!(tokens[1].tok, Tok::Ident("a\"b".to_string()));
    }

    #[test]
    fn test_dollar_quoting() {
        let tokens = tokenize("ELECTRIC SQLITE $sql$CREATE TRIGGER x; SELECT 1;$sql$").unwrap();
        assert_eq!(
            tokens.last().unwrap().tok,
            Tok::Str("CREATE TRIGGER x; SELECT 1;".to_string())
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("SELECT 'oops").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.col, 8);
    }

    #[test]
    fn test_split_statements() {
        assert_eq!(
            split_statements("BEGIN; SELECT 1; COMMIT;"),
            vec!["BEGIN", "SELECT 1", "COMMIT"]
        );
        // Semicolons inside quotes and dollar strings do not split.
        assert_eq!(
            split_statements("SELECT 'a;b'; SELECT $$x;y$$"),
            vec!["SELECT 'a;b'", "SELECT $$x;y$$"]
        );
        assert_eq!(split_statements("  ;; "), Vec::<&str>::new());
        // Comment-only fragments are not statements.
        assert_eq!(
            split_statements("ELECTRIC ENABLE a; -- done"),
            vec!["ELECTRIC ENABLE a"]
        );
    }

    #[test]
    fn test_leading_word() {
        assert_eq!(
            leading_word("/* hi */ ELECTRIC ENABLE t").as_deref(),
            Some("electric")
        );
        assert_eq!(leading_word("  -- only a comment"), None);
        assert_eq!(leading_word("'str'"), None);
    }
}
