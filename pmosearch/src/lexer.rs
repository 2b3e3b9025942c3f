//! Lexer for UPnP search criteria.

use crate::{Result, SearchError};

/// Token families produced by [`SearchLexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `=`, `!=`, `<`, `<=`, `>`, `>=`
    CompareOp,
    /// `contains`, `doesnotcontain`, `startswith`, `derivedfrom`
    StringOp,
    Dquote,
    /// Quoted literal with `\"` and `\\` escapes resolved.
    EscapedString,
    Lparen,
    Rparen,
    And,
    Or,
    Exists,
    /// `true` / `false`, any case.
    BoolVal,
    /// Property name (`dc:title`, `res@size`, `@refID`, …).
    Property,
}

/// One lexed token; `value` keeps the original spelling except for escaped
/// strings, which are unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchToken {
    pub kind: TokenKind,
    pub value: String,
    /// 1-based column of the first character.
    pub col: usize,
}

impl SearchToken {
    pub fn new(kind: TokenKind, value: impl Into<String>, col: usize) -> Self {
        SearchToken {
            kind,
            value: value.into(),
            col,
        }
    }
}

fn is_property_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '@'
}

fn is_property_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '@'
}

#[derive(PartialEq)]
enum QuoteState {
    Normal,
    /// An opening `"` was just emitted; the literal body follows.
    InString,
    /// The literal was emitted; the closing `"` is still pending.
    Closing,
}

/// Streaming lexer over a criteria string.
pub struct SearchLexer {
    chars: Vec<char>,
    pos: usize,
    state: QuoteState,
}

impl SearchLexer {
    pub fn new(input: &str) -> Self {
        SearchLexer {
            chars: input.chars().collect(),
            pos: 0,
            state: QuoteState::Normal,
        }
    }

    /// Lexes the whole input at once.
    pub fn tokenize(input: &str) -> Result<Vec<SearchToken>> {
        let mut lexer = SearchLexer::new(input);
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    /// Returns the next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Result<Option<SearchToken>> {
        match self.state {
            QuoteState::InString => return self.lex_quoted(),
            QuoteState::Closing => {
                let col = self.pos + 1;
                self.pos += 1;
                self.state = QuoteState::Normal;
                return Ok(Some(SearchToken::new(TokenKind::Dquote, "\"", col)));
            }
            QuoteState::Normal => {}
        }

        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
        let col = self.pos + 1;
        let Some(&c) = self.chars.get(self.pos) else {
            return Ok(None);
        };

        match c {
            '(' => {
                self.pos += 1;
                Ok(Some(SearchToken::new(TokenKind::Lparen, "(", col)))
            }
            ')' => {
                self.pos += 1;
                Ok(Some(SearchToken::new(TokenKind::Rparen, ")", col)))
            }
            '"' => {
                self.pos += 1;
                self.state = QuoteState::InString;
                Ok(Some(SearchToken::new(TokenKind::Dquote, "\"", col)))
            }
            '=' => {
                self.pos += 1;
                Ok(Some(SearchToken::new(TokenKind::CompareOp, "=", col)))
            }
            '!' | '<' | '>' => {
                self.pos += 1;
                let mut op = c.to_string();
                if self.chars.get(self.pos) == Some(&'=') {
                    op.push('=');
                    self.pos += 1;
                } else if c == '!' {
                    return Err(SearchError::at(col, "expected '=' after '!'"));
                }
                Ok(Some(SearchToken::new(TokenKind::CompareOp, op, col)))
            }
            c if is_property_start(c) => {
                let start = self.pos;
                while self
                    .chars
                    .get(self.pos)
                    .is_some_and(|&c| is_property_char(c))
                {
                    self.pos += 1;
                }
                let word: String = self.chars[start..self.pos].iter().collect();
                let kind = match word.to_ascii_lowercase().as_str() {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "exists" => TokenKind::Exists,
                    "true" | "false" => TokenKind::BoolVal,
                    "contains" | "doesnotcontain" | "startswith" | "derivedfrom" => {
                        TokenKind::StringOp
                    }
                    _ => TokenKind::Property,
                };
                Ok(Some(SearchToken::new(kind, word, col)))
            }
            other => Err(SearchError::at(col, format!("unexpected character '{other}'"))),
        }
    }

    fn lex_quoted(&mut self) -> Result<Option<SearchToken>> {
        let col = self.pos + 1;
        let mut value = String::new();
        let mut closed = false;
        while let Some(&c) = self.chars.get(self.pos) {
            match c {
                '\\' => {
                    // \" and \\ resolve; a lone backslash is kept as-is.
                    match self.chars.get(self.pos + 1) {
                        Some(&'"') => {
                            value.push('"');
                            self.pos += 2;
                        }
                        Some(&'\\') => {
                            value.push('\\');
                            self.pos += 2;
                        }
                        _ => {
                            value.push('\\');
                            self.pos += 1;
                        }
                    }
                }
                '"' => {
                    closed = true;
                    break;
                }
                c => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }

        if closed {
            self.state = QuoteState::Closing;
            return Ok(Some(SearchToken::new(TokenKind::EscapedString, value, col)));
        }
        self.state = QuoteState::Normal;
        if !value.is_empty() {
            return Ok(Some(SearchToken::new(TokenKind::EscapedString, value, col)));
        }
        // A dangling opening quote at end of input yields no literal.
        Ok(None)
    }
}
