use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::query_spec::Operation;
use crate::validator::{ValidSpec, ValidationError};

const TERMINATOR: char = ';';
const PLACEHOLDER: &str = "?";

/// How INSERT/UPDATE values reach the database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueMode {
    /// Values are read as SQL literals (`'text'`, numbers, `NULL`) and bound
    /// to positional `?` placeholders by the driver.
    #[default]
    Bound,
    /// Values are spliced into the text exactly as typed.
    Inline,
}

/// A value handed to the driver for one placeholder. `None` binds SQL NULL.
pub type BoundValue = Option<String>;

/// Rendered statement text plus any values to bind positionally.
///
/// Table names, column references and clause fragments are copied verbatim
/// into `text`; the operator reviewing that text is the only guard against a
/// malformed fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    operation: Operation,
    text: String,
    params: Vec<BoundValue>,
}

impl Statement {
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn params(&self) -> &[BoundValue] {
        &self.params
    }
}

/// Renders `spec`. In [`ValueMode::Bound`] a value that is not a SQL literal
/// is rejected before any text is produced.
pub fn build(spec: &ValidSpec<'_>, mode: ValueMode) -> Result<Statement, ValidationError> {
    let table = spec.primary_table.trim();
    let mut params = Vec::new();

    let mut text = match spec.operation {
        Operation::Select => format!("SELECT {} FROM {table}", column_list(spec)),
        Operation::Insert => {
            let values = spec
                .columns
                .iter()
                .map(|column| {
                    render_value(column.trim(), value_for(spec, column), mode, &mut params)
                })
                .collect::<Result<Vec<_>, _>>()?
                .join(", ");
            format!("INSERT INTO {table} ({}) VALUES ({values})", column_list(spec))
        }
        Operation::Update => {
            let assignments = assignment_pairs(spec)
                .map(|(column, value)| {
                    render_value(column, value, mode, &mut params)
                        .map(|rendered| format!("{column}={rendered}"))
                })
                .collect::<Result<Vec<_>, _>>()?
                .join(", ");
            format!("UPDATE {table} SET {assignments}")
        }
        Operation::Delete => format!("DELETE FROM {table}"),
    };

    if let Some(predicate) = spec.join_predicate() {
        for joined in &spec.joined_tables {
            let _ = write!(text, " {} {} ON {predicate}", spec.join_type, joined.trim());
        }
    }
    if let Some(clause) = spec.where_clause() {
        let _ = write!(text, " WHERE {clause}");
    }
    if let Some(clause) = spec.group_by_clause() {
        let _ = write!(text, " GROUP BY {clause}");
    }
    if let Some(clause) = spec.order_by_clause() {
        let _ = write!(text, " ORDER BY {clause}");
    }
    text.push(TERMINATOR);

    Ok(Statement {
        operation: spec.operation,
        text,
        params,
    })
}

fn column_list(spec: &ValidSpec<'_>) -> String {
    spec.columns
        .iter()
        .map(|column| column.trim())
        .collect::<Vec<_>>()
        .join(", ")
}

fn value_for<'a>(spec: &'a ValidSpec<'_>, column: &str) -> &'a str {
    spec.values_by_column
        .get(column.trim())
        .map_or("", String::as_str)
}

/// UPDATE assignments follow the listed columns when there are any, otherwise
/// the value map's key order.
fn assignment_pairs<'a>(spec: &'a ValidSpec<'_>) -> Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a> {
    if spec.columns.is_empty() {
        Box::new(
            spec.values_by_column
                .iter()
                .map(|(column, value)| (column.trim(), value.as_str())),
        )
    } else {
        Box::new(
            spec.columns
                .iter()
                .map(move |column| (column.trim(), value_for(spec, column))),
        )
    }
}

fn render_value(
    column: &str,
    value: &str,
    mode: ValueMode,
    params: &mut Vec<BoundValue>,
) -> Result<String, ValidationError> {
    match mode {
        ValueMode::Bound => {
            let bound = parse_literal(value).ok_or_else(|| ValidationError::NotALiteral {
                column: column.to_string(),
                value: value.trim().to_string(),
            })?;
            params.push(bound);
            Ok(PLACEHOLDER.to_string())
        }
        ValueMode::Inline => Ok(value.trim().to_string()),
    }
}

/// Reads a typed SQL literal: `'text'` with `''` for a quote, a decimal
/// number, or `NULL`. Returns `None` for anything else.
fn parse_literal(value: &str) -> Option<BoundValue> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("null") {
        return Some(None);
    }
    if let Some(quoted) = value.strip_prefix('\'') {
        let inner = quoted.strip_suffix('\'')?;
        let mut text = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(ch) = chars.next() {
            if ch == '\'' && chars.next() != Some('\'') {
                return None;
            }
            text.push(ch);
        }
        return Some(Some(text));
    }
    is_number(value).then(|| Some(value.to_string()))
}

fn is_number(value: &str) -> bool {
    let unsigned = value.strip_prefix(['-', '+']).unwrap_or(value);
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, Some(exponent)),
        None => (unsigned, None),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = |part: &str| part.chars().all(|ch| ch.is_ascii_digit());
    let exponent_ok = match exponent {
        Some(exponent) => {
            let exponent = exponent.strip_prefix(['-', '+']).unwrap_or(exponent);
            !exponent.is_empty() && digits(exponent)
        }
        None => true,
    };
    !(whole.is_empty() && fraction.is_empty()) && digits(whole) && digits(fraction) && exponent_ok
}
