//! # pmosearch
//!
//! Compiler for UPnP ContentDirectory search and sort criteria.
//!
//! This crate turns `SearchCriteria` strings
//! (`upnp:artist = "King Krule" and dc:title contains "Vine"`) into backend
//! predicates, and `SortCriteria` strings (`+dc:title,-upnp:album`) into
//! ordered column lists. It knows nothing about the storage schema: callers
//! provide a [`ColumnMapper`] describing how properties land on columns, and
//! the [`DefaultSqlEmitter`] renders SQL text from it.
//!
//! ## Pipeline
//!
//! ```text
//! criteria string -> SearchLexer -> SearchParser -> AST -> emit() -> SQL
//! ```
//!
//! Operators (`and`, `or`, `exists`, `contains`, `doesnotcontain`,
//! `startswith`, `derivedfrom`) are case-insensitive; property names are not.

pub mod lexer;
pub mod parser;
pub mod sort;

pub use lexer::{SearchLexer, SearchToken, TokenKind};
pub use parser::{
    ColumnMapper, DefaultSqlEmitter, PropertyTarget, SearchParser, SqlEmitter, StringOp,
    TableColumnMapper,
};
pub use sort::{SortCriteria, SortKey, SortOrder, SortParser};

use thiserror::Error;

/// Search/sort compilation error.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Lexical or syntactic error; the column is 1-based.
    #[error("parse error at column {col}: {msg}")]
    ParseError { col: usize, msg: String },
}

impl SearchError {
    pub fn at(col: usize, msg: impl Into<String>) -> Self {
        SearchError::ParseError {
            col,
            msg: msg.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
