use std::collections::BTreeSet;
use std::ops::Deref;

use thiserror::Error;

use crate::query_spec::{Operation, QuerySpec, MAX_JOINED_TABLES};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("primary table cannot be empty")]
    EmptyPrimaryTable,
    #[error("{operation} requires at least one column")]
    EmptyColumnList { operation: Operation },
    #[error("{count} tables joined; at most {MAX_JOINED_TABLES} are allowed")]
    TooManyJoinedTables { count: usize },
    #[error("joined tables require a join condition")]
    MissingJoinPredicate,
    #[error("join condition given but no table is joined")]
    UnexpectedJoinPredicate,
    #[error("{columns} column(s) but {values} value(s)")]
    ValueArityMismatch { columns: usize, values: usize },
    #[error("column #{position} is empty")]
    EmptyColumnName { position: usize },
    #[error("joined table #{position} is empty")]
    EmptyJoinedTable { position: usize },
    #[error("column `{column}` is listed more than once")]
    DuplicateColumn { column: String },
    #[error("no value given for column `{column}`")]
    MissingValue { column: String },
    #[error("value `{value}` for `{column}` is not a quoted string, number or NULL")]
    NotALiteral { column: String, value: String },
    #[error("UPDATE requires at least one column assignment")]
    EmptyAssignments,
    #[error("{clause} is not supported for {operation}")]
    ClauseNotSupported {
        clause: &'static str,
        operation: Operation,
    },
}

/// A spec that passed [`validate`]. Only this type reaches the statement
/// builder.
#[derive(Debug, Clone, Copy)]
pub struct ValidSpec<'a> {
    spec: &'a QuerySpec,
}

impl Deref for ValidSpec<'_> {
    type Target = QuerySpec;

    fn deref(&self) -> &Self::Target {
        self.spec
    }
}

pub fn validate(spec: &QuerySpec) -> Result<ValidSpec<'_>, ValidationError> {
    let operation = spec.operation;

    if spec.primary_table.trim().is_empty() {
        return Err(ValidationError::EmptyPrimaryTable);
    }

    if matches!(operation, Operation::Select | Operation::Insert) && spec.columns.is_empty() {
        return Err(ValidationError::EmptyColumnList { operation });
    }

    if spec.joined_tables.len() > MAX_JOINED_TABLES {
        return Err(ValidationError::TooManyJoinedTables {
            count: spec.joined_tables.len(),
        });
    }

    match (spec.joined_tables.is_empty(), spec.join_predicate().is_some()) {
        (false, false) => return Err(ValidationError::MissingJoinPredicate),
        (true, true) => return Err(ValidationError::UnexpectedJoinPredicate),
        _ => {}
    }

    if operation == Operation::Insert && spec.columns.len() != spec.values_by_column.len() {
        return Err(ValidationError::ValueArityMismatch {
            columns: spec.columns.len(),
            values: spec.values_by_column.len(),
        });
    }

    if let Some(index) = spec.columns.iter().position(|column| column.trim().is_empty()) {
        return Err(ValidationError::EmptyColumnName {
            position: index + 1,
        });
    }

    if let Some(index) = spec
        .joined_tables
        .iter()
        .position(|table| table.trim().is_empty())
    {
        return Err(ValidationError::EmptyJoinedTable {
            position: index + 1,
        });
    }

    check_clauses(spec)?;

    match operation {
        Operation::Insert => check_assignments(spec)?,
        Operation::Update => {
            if spec.values_by_column.is_empty() {
                return Err(ValidationError::EmptyAssignments);
            }
            if !spec.columns.is_empty() {
                if spec.columns.len() != spec.values_by_column.len() {
                    return Err(ValidationError::ValueArityMismatch {
                        columns: spec.columns.len(),
                        values: spec.values_by_column.len(),
                    });
                }
                check_assignments(spec)?;
            }
        }
        Operation::Select | Operation::Delete => {}
    }

    Ok(ValidSpec { spec })
}

fn check_clauses(spec: &QuerySpec) -> Result<(), ValidationError> {
    let operation = spec.operation;
    let unsupported = |clause| Err(ValidationError::ClauseNotSupported { clause, operation });

    match operation {
        Operation::Select => {
            if !spec.values_by_column.is_empty() {
                return unsupported("values");
            }
        }
        Operation::Insert | Operation::Update | Operation::Delete => {
            if !spec.joined_tables.is_empty() {
                return unsupported("JOIN");
            }
            if spec.group_by_clause().is_some() {
                return unsupported("GROUP BY");
            }
            if spec.order_by_clause().is_some() {
                return unsupported("ORDER BY");
            }
        }
    }

    if operation == Operation::Insert && spec.where_clause().is_some() {
        return unsupported("WHERE");
    }

    if operation == Operation::Delete {
        if !spec.columns.is_empty() {
            return unsupported("columns");
        }
        if !spec.values_by_column.is_empty() {
            return unsupported("values");
        }
    }

    Ok(())
}

fn check_assignments(spec: &QuerySpec) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for column in &spec.columns {
        let column = column.trim();
        if !seen.insert(column) {
            return Err(ValidationError::DuplicateColumn {
                column: column.to_string(),
            });
        }
        if !spec.values_by_column.contains_key(column) {
            return Err(ValidationError::MissingValue {
                column: column.to_string(),
            });
        }
    }
    Ok(())
}
