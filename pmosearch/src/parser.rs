//! Recursive-descent parser and SQL emission for search criteria.

use std::sync::Arc;

use crate::lexer::{SearchLexer, SearchToken, TokenKind};
use crate::{Result, SearchError};

/// String operators of the UPnP search grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    Contains,
    DoesNotContain,
    StartsWith,
    DerivedFrom,
}

impl StringOp {
    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "contains" => Some(StringOp::Contains),
            "doesnotcontain" => Some(StringOp::DoesNotContain),
            "startswith" => Some(StringOp::StartsWith),
            "derivedfrom" => Some(StringOp::DerivedFrom),
            _ => None,
        }
    }
}

/// Where a property lands in the backing schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyTarget {
    /// Matched against the `(name, value)` rows of the metadata table.
    Metadata,
    /// A column of the object row itself (`@refID`, `last_updated`, …).
    Attribute(String),
    /// The object's upnp:class column.
    Class(String),
}

/// Maps property names and sort keys onto backend columns.
///
/// Implementations return fully quoted, table-qualified column text; the
/// emitter splices it verbatim.
pub trait ColumnMapper: Send + Sync {
    fn target(&self, property: &str) -> PropertyTarget;
    fn meta_name_column(&self) -> String;
    fn meta_value_column(&self) -> String;
    /// Column for a sort key, or `None` for unknown keys (skipped silently).
    fn sort_column(&self, key: &str) -> Option<String>;
}

/// Table-driven [`ColumnMapper`].
pub struct TableColumnMapper {
    quote: (String, String),
    alias: Option<String>,
    meta_name: String,
    meta_value: String,
    attributes: Vec<(String, String)>,
    class_properties: Vec<(String, String)>,
    sort_keys: Vec<(String, String)>,
}

impl TableColumnMapper {
    /// # Arguments
    ///
    /// * `quote` - column quote pair, both empty for bare column names
    /// * `alias` - table alias prefix, if any
    /// * `meta_name` / `meta_value` - columns of the metadata rows
    /// * `attributes` - `property -> column` pairs for object-row columns
    /// * `class_properties` - `property -> column` pairs for the class family
    /// * `sort_keys` - `sort key -> column` pairs
    pub fn new(
        quote: (&str, &str),
        alias: Option<&str>,
        meta_name: &str,
        meta_value: &str,
        attributes: &[(&str, &str)],
        class_properties: &[(&str, &str)],
        sort_keys: &[(&str, &str)],
    ) -> Self {
        let own = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect()
        };
        TableColumnMapper {
            quote: (quote.0.to_string(), quote.1.to_string()),
            alias: alias.map(str::to_string),
            meta_name: meta_name.to_string(),
            meta_value: meta_value.to_string(),
            attributes: own(attributes),
            class_properties: own(class_properties),
            sort_keys: own(sort_keys),
        }
    }

    fn quoted(&self, column: &str) -> String {
        let (qb, qe) = (&self.quote.0, &self.quote.1);
        match &self.alias {
            Some(alias) => format!("{qb}{alias}{qe}.{qb}{column}{qe}"),
            None => format!("{qb}{column}{qe}"),
        }
    }
}

impl ColumnMapper for TableColumnMapper {
    fn target(&self, property: &str) -> PropertyTarget {
        if let Some((_, col)) = self.attributes.iter().find(|(p, _)| p == property) {
            return PropertyTarget::Attribute(self.quoted(col));
        }
        if let Some((_, col)) = self.class_properties.iter().find(|(p, _)| p == property) {
            return PropertyTarget::Class(self.quoted(col));
        }
        PropertyTarget::Metadata
    }

    fn meta_name_column(&self) -> String {
        self.quoted(&self.meta_name)
    }

    fn meta_value_column(&self) -> String {
        self.quoted(&self.meta_value)
    }

    fn sort_column(&self, key: &str) -> Option<String> {
        self.sort_keys
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, col)| self.quoted(col))
    }
}

/// Renders one relational leaf into backend text.
pub trait SqlEmitter: Send + Sync {
    fn emit_compare(&self, property: &str, op: &str, value: &str, col: usize) -> Result<String>;
    fn emit_string_op(
        &self,
        property: &str,
        op: StringOp,
        value: &str,
        col: usize,
    ) -> Result<String>;
    fn emit_exists(&self, property: &str, exists: bool, col: usize) -> Result<String>;
}

/// SQL emitter for SQLite-class backends.
pub struct DefaultSqlEmitter {
    mapper: Arc<dyn ColumnMapper>,
}

impl DefaultSqlEmitter {
    pub fn new(mapper: Arc<dyn ColumnMapper>) -> Self {
        DefaultSqlEmitter { mapper }
    }

    fn meta_pair(&self) -> (String, String) {
        (
            self.mapper.meta_name_column(),
            self.mapper.meta_value_column(),
        )
    }
}

fn sql_escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Substitutes dynamic literals (`@last7`, `@last30`, …) with an epoch
/// timestamp at parse time.
fn dynamic_literal(value: &str) -> Option<i64> {
    let days: u32 = value.strip_prefix("@last")?.parse().ok()?;
    Some(chrono::Utc::now().timestamp() - i64::from(days) * 86_400)
}

impl SqlEmitter for DefaultSqlEmitter {
    fn emit_compare(&self, property: &str, op: &str, value: &str, _col: usize) -> Result<String> {
        let dynamic = dynamic_literal(value);
        let rendered = match dynamic {
            Some(epoch) => epoch.to_string(),
            None => format!("'{}'", sql_escape(value)),
        };
        match self.mapper.target(property) {
            PropertyTarget::Metadata => {
                let (name, val) = self.meta_pair();
                if (op == "=" || op == "!=") && dynamic.is_none() {
                    Ok(format!(
                        "({name}='{}' AND LOWER({val}){op}LOWER({rendered}))",
                        sql_escape(property)
                    ))
                } else {
                    Ok(format!(
                        "({name}='{}' AND {val} {op} {rendered})",
                        sql_escape(property)
                    ))
                }
            }
            PropertyTarget::Attribute(column) => Ok(format!("({column} {op} {rendered})")),
            PropertyTarget::Class(column) => {
                if (op == "=" || op == "!=") && dynamic.is_none() {
                    Ok(format!("(LOWER({column}){op}LOWER({rendered}))"))
                } else {
                    Ok(format!("({column} {op} {rendered})"))
                }
            }
        }
    }

    fn emit_string_op(
        &self,
        property: &str,
        op: StringOp,
        value: &str,
        _col: usize,
    ) -> Result<String> {
        let value = sql_escape(value);
        let pattern = match op {
            StringOp::Contains | StringOp::DoesNotContain => format!("%{value}%"),
            StringOp::StartsWith | StringOp::DerivedFrom => format!("{value}%"),
        };
        let like = match op {
            StringOp::DoesNotContain => "NOT LIKE",
            _ => "LIKE",
        };
        match self.mapper.target(property) {
            PropertyTarget::Metadata => {
                let (name, val) = self.meta_pair();
                Ok(format!(
                    "({name}='{}' AND LOWER({val}) {like} LOWER('{pattern}'))",
                    sql_escape(property)
                ))
            }
            PropertyTarget::Attribute(column) | PropertyTarget::Class(column) => {
                Ok(format!("(LOWER({column}) {like} LOWER('{pattern}'))"))
            }
        }
    }

    fn emit_exists(&self, property: &str, exists: bool, _col: usize) -> Result<String> {
        let null_test = if exists { "IS NOT NULL" } else { "IS NULL" };
        match self.mapper.target(property) {
            PropertyTarget::Metadata => {
                let (name, val) = self.meta_pair();
                Ok(format!(
                    "({name}='{}' AND {val} {null_test})",
                    sql_escape(property)
                ))
            }
            PropertyTarget::Attribute(column) | PropertyTarget::Class(column) => {
                Ok(format!("({column} {null_test})"))
            }
        }
    }
}

enum Ast {
    And(Vec<Ast>),
    Or(Vec<Ast>),
    Group(Box<Ast>),
    Leaf(String),
}

impl Ast {
    fn emit(&self) -> String {
        match self {
            Ast::And(children) => children
                .iter()
                .map(Ast::emit)
                .collect::<Vec<_>>()
                .join(" AND "),
            Ast::Or(children) => children
                .iter()
                .map(Ast::emit)
                .collect::<Vec<_>>()
                .join(" OR "),
            Ast::Group(inner) => format!("({})", inner.emit()),
            Ast::Leaf(sql) => sql.clone(),
        }
    }
}

/// Parser over a lexed criteria string.
///
/// AND and OR associate left with no precedence inversion; parenthesized
/// groups are emitted verbatim with their parentheses.
pub struct SearchParser<'a> {
    tokens: Vec<SearchToken>,
    pos: usize,
    input_len: usize,
    emitter: &'a dyn SqlEmitter,
}

impl<'a> SearchParser<'a> {
    pub fn new(emitter: &'a dyn SqlEmitter, input: &str) -> Result<Self> {
        Ok(SearchParser {
            tokens: SearchLexer::tokenize(input)?,
            pos: 0,
            input_len: input.chars().count(),
            emitter,
        })
    }

    /// Compiles the criteria into backend predicate text.
    pub fn parse(&mut self) -> Result<String> {
        let ast = self.parse_or()?;
        if let Some(extra) = self.peek() {
            return Err(SearchError::at(
                extra.col,
                format!("unexpected token '{}'", extra.value),
            ));
        }
        Ok(ast.emit())
    }

    fn peek(&self) -> Option<&SearchToken> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&SearchToken> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn end_col(&self) -> usize {
        self.input_len + 1
    }

    fn parse_or(&mut self) -> Result<Ast> {
        let first = self.parse_and()?;
        let mut children = vec![first];
        while self.peek().is_some_and(|t| t.kind == TokenKind::Or) {
            self.pos += 1;
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.pop().unwrap()
        } else {
            Ast::Or(children)
        })
    }

    fn parse_and(&mut self) -> Result<Ast> {
        let first = self.parse_rel()?;
        let mut children = vec![first];
        while self.peek().is_some_and(|t| t.kind == TokenKind::And) {
            self.pos += 1;
            children.push(self.parse_rel()?);
        }
        Ok(if children.len() == 1 {
            children.pop().unwrap()
        } else {
            Ast::And(children)
        })
    }

    fn parse_rel(&mut self) -> Result<Ast> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Lparen => {
                self.pos += 1;
                let inner = self.parse_or()?;
                // A missing closing parenthesis at end of input is tolerated,
                // some control points send truncated criteria.
                match self.peek() {
                    Some(t) if t.kind == TokenKind::Rparen => {
                        self.pos += 1;
                    }
                    Some(t) => {
                        return Err(SearchError::at(
                            t.col,
                            format!("expected ')', got '{}'", t.value),
                        ))
                    }
                    None => {}
                }
                Ok(Ast::Group(Box::new(inner)))
            }
            _ => self.parse_simple_rel(),
        }
    }

    fn parse_simple_rel(&mut self) -> Result<Ast> {
        let end = self.end_col();
        let property = match self.bump() {
            Some(t) if t.kind == TokenKind::Property => (t.value.clone(), t.col),
            Some(t) => {
                return Err(SearchError::at(
                    t.col,
                    format!("expected property, got '{}'", t.value),
                ))
            }
            None => return Err(SearchError::at(end, "expected property")),
        };

        let sql = match self.bump().cloned() {
            Some(t) if t.kind == TokenKind::CompareOp => {
                let value = self.parse_quoted_literal()?;
                self.emitter
                    .emit_compare(&property.0, &t.value, &value, property.1)?
            }
            Some(t) if t.kind == TokenKind::StringOp => {
                let op = StringOp::from_word(&t.value)
                    .ok_or_else(|| SearchError::at(t.col, "unknown string operator"))?;
                let value = self.parse_quoted_literal()?;
                self.emitter.emit_string_op(&property.0, op, &value, property.1)?
            }
            Some(t) if t.kind == TokenKind::Exists => {
                let exists = match self.bump() {
                    Some(b) if b.kind == TokenKind::BoolVal => {
                        b.value.eq_ignore_ascii_case("true")
                    }
                    Some(b) => {
                        return Err(SearchError::at(
                            b.col,
                            format!("expected 'true' or 'false', got '{}'", b.value),
                        ))
                    }
                    None => return Err(SearchError::at(end, "expected 'true' or 'false'")),
                };
                self.emitter.emit_exists(&property.0, exists, property.1)?
            }
            Some(t) => {
                return Err(SearchError::at(
                    t.col,
                    format!("expected operator, got '{}'", t.value),
                ))
            }
            None => return Err(SearchError::at(end, "expected operator")),
        };
        Ok(Ast::Leaf(sql))
    }

    fn parse_quoted_literal(&mut self) -> Result<String> {
        let end = self.end_col();
        match self.bump() {
            Some(t) if t.kind == TokenKind::Dquote => {}
            Some(t) => {
                return Err(SearchError::at(
                    t.col,
                    format!("expected quoted literal, got '{}'", t.value),
                ))
            }
            None => return Err(SearchError::at(end, "expected quoted literal")),
        }
        let value = match self.peek() {
            Some(t) if t.kind == TokenKind::EscapedString => {
                let value = t.value.clone();
                self.pos += 1;
                value
            }
            _ => String::new(),
        };
        match self.bump() {
            Some(t) if t.kind == TokenKind::Dquote => Ok(value),
            Some(t) => Err(SearchError::at(t.col, "unterminated string literal")),
            None => Err(SearchError::at(end, "unterminated string literal")),
        }
    }
}
