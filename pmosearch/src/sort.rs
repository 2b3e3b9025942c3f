//! Sort-criteria parser (`+col1,-col2,col3`).

use std::sync::Arc;

use crate::parser::ColumnMapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// One resolved sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Original property name from the criteria string.
    pub key: String,
    /// Quoted backend column, ready to splice.
    pub column: String,
    pub order: SortOrder,
}

/// Ordered list of sort keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortCriteria(pub Vec<SortKey>);

impl SortCriteria {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `ORDER BY` body, without the keywords.
    pub fn to_sql(&self) -> String {
        self.0
            .iter()
            .map(|k| format!("{} {}", k.column, k.order.as_sql()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Parses sort criteria against a [`ColumnMapper`].
///
/// Keys without a leading `+`/`-` default to ascending. Keys the mapper does
/// not know are skipped silently, per the CDS sort contract.
pub struct SortParser {
    mapper: Arc<dyn ColumnMapper>,
}

impl SortParser {
    pub fn new(mapper: Arc<dyn ColumnMapper>) -> Self {
        SortParser { mapper }
    }

    pub fn parse(&self, criteria: &str) -> SortCriteria {
        let mut keys = Vec::new();
        for part in criteria.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (order, name) = match part.as_bytes()[0] {
                b'-' => (SortOrder::Descending, &part[1..]),
                b'+' => (SortOrder::Ascending, &part[1..]),
                _ => (SortOrder::Ascending, part),
            };
            match self.mapper.sort_column(name) {
                Some(column) => keys.push(SortKey {
                    key: name.to_string(),
                    column,
                    order,
                }),
                None => {
                    tracing::debug!(key = name, "unknown sort key skipped");
                }
            }
        }
        SortCriteria(keys)
    }
}
