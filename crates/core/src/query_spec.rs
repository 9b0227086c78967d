use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on tables joined onto the primary table.
pub const MAX_JOINED_TABLES: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [Self::Select, Self::Insert, Self::Update, Self::Delete];

    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    #[must_use]
    pub fn returns_rows(self) -> bool {
        matches!(self, Self::Select)
    }

    #[must_use]
    pub fn is_mutating(self) -> bool {
        !self.returns_rows()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operation `{0}` (expected SELECT, INSERT, UPDATE or DELETE)")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|operation| operation.keyword().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownOperation(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    FullOuter,
}

impl JoinType {
    pub const ALL: [JoinType; 4] = [Self::Inner, Self::Left, Self::Right, Self::FullOuter];

    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::FullOuter => "FULL OUTER JOIN",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One statement request, captured from the form at the moment the user asks
/// for execution. Built once and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuerySpec {
    pub operation: Operation,
    pub primary_table: String,
    pub joined_tables: Vec<String>,
    pub join_type: JoinType,
    pub join_predicate: Option<String>,
    pub columns: Vec<String>,
    pub where_clause: Option<String>,
    pub group_by_clause: Option<String>,
    pub order_by_clause: Option<String>,
    pub values_by_column: BTreeMap<String, String>,
}

impl QuerySpec {
    #[must_use]
    pub fn new(operation: Operation, primary_table: impl Into<String>) -> Self {
        Self {
            operation,
            primary_table: primary_table.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_joins(mut self, join_type: JoinType, slots: JoinSlots, predicate: &str) -> Self {
        self.join_type = join_type;
        self.joined_tables = slots.into_tables();
        self.join_predicate = Some(predicate.to_string());
        self
    }

    #[must_use]
    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    #[must_use]
    pub fn with_group_by(mut self, clause: impl Into<String>) -> Self {
        self.group_by_clause = Some(clause.into());
        self
    }

    #[must_use]
    pub fn with_order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by_clause = Some(clause.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.values_by_column.insert(column.into(), value.into());
        self
    }

    #[must_use]
    pub fn join_predicate(&self) -> Option<&str> {
        non_blank(self.join_predicate.as_deref())
    }

    #[must_use]
    pub fn where_clause(&self) -> Option<&str> {
        non_blank(self.where_clause.as_deref())
    }

    #[must_use]
    pub fn group_by_clause(&self) -> Option<&str> {
        non_blank(self.group_by_clause.as_deref())
    }

    #[must_use]
    pub fn order_by_clause(&self) -> Option<&str> {
        non_blank(self.order_by_clause.as_deref())
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at most {MAX_JOINED_TABLES} tables can be joined; `{rejected}` was not added")]
pub struct JoinLimitError {
    pub rejected: String,
}

/// Join table input slots. The fourth addition is refused here, before any
/// spec can carry it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinSlots {
    tables: Vec<String>,
}

impl JoinSlots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, table: impl Into<String>) -> Result<usize, JoinLimitError> {
        let table = table.into();
        if self.is_full() {
            return Err(JoinLimitError { rejected: table });
        }
        self.tables.push(table);
        Ok(self.tables.len())
    }

    pub fn remove_last(&mut self) -> Option<String> {
        self.tables.pop()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tables.len() >= MAX_JOINED_TABLES
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    #[must_use]
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    #[must_use]
    pub fn into_tables(self) -> Vec<String> {
        self.tables
    }
}
