use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use thiserror::Error;
use tracing::debug;

use crate::query_spec::Operation;
use crate::statement_builder::{BoundValue, Statement};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewNote {
    /// The text splits into more than one statement outside quotes and comments.
    MultipleStatements(usize),
    ModifiesData(Operation),
    /// UPDATE or DELETE without a WHERE clause touches every row.
    UnfilteredMutation(Operation),
}

impl ReviewNote {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::MultipleStatements(count) => {
                format!("text contains {count} statements; check the clause fields")
            }
            Self::ModifiesData(operation) => format!("{operation} will modify data"),
            Self::UnfilteredMutation(operation) => {
                format!("{operation} has no WHERE clause and affects every row")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReviewToken(String);

impl ReviewToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What the operator is shown before anything runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementReview {
    pub token: ReviewToken,
    pub operation: Operation,
    pub text: String,
    pub params: Vec<BoundValue>,
    pub notes: Vec<ReviewNote>,
}

/// A statement the operator approved. Only [`ConfirmationGate`] creates these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedStatement {
    statement: Statement,
}

impl ApprovedStatement {
    #[must_use]
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    #[must_use]
    pub fn operation(&self) -> Operation {
        self.statement.operation()
    }

    #[must_use]
    pub fn text(&self) -> &str {
        self.statement.text()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Abort,
}

/// Asks the operator about one review. Implemented by whatever surface shows
/// the statement.
pub trait ConfirmationPrompt {
    fn ask(&mut self, review: &StatementReview) -> Decision;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Proceed(ApprovedStatement),
    Abort,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("review token is invalid or was already used")]
    InvalidToken,
    #[error("displayed text does not match the statement under review")]
    TextMismatch,
}

#[derive(Debug, Clone)]
struct PendingReview {
    fingerprint: u64,
    statement: Statement,
}

#[derive(Debug, Default)]
pub struct ConfirmationGate {
    nonce: u64,
    pending: HashMap<String, PendingReview>,
}

impl ConfirmationGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn review(&mut self, statement: Statement) -> StatementReview {
        self.nonce = self.nonce.saturating_add(1);
        let fingerprint = fingerprint_text(statement.text());
        let token_string = format!("review-{}-{fingerprint:016x}", self.nonce);

        let review = StatementReview {
            token: ReviewToken(token_string.clone()),
            operation: statement.operation(),
            text: statement.text().to_string(),
            params: statement.params().to_vec(),
            notes: review_notes(&statement),
        };
        debug!(token = %token_string, sql = statement.text(), "statement parked for review");
        self.pending.insert(
            token_string,
            PendingReview {
                fingerprint,
                statement,
            },
        );
        review
    }

    pub fn approve(
        &mut self,
        token: &ReviewToken,
        displayed_text: &str,
    ) -> Result<ApprovedStatement, GateError> {
        let Some(pending) = self.pending.remove(token.as_str()) else {
            return Err(GateError::InvalidToken);
        };

        if pending.fingerprint != fingerprint_text(displayed_text) {
            return Err(GateError::TextMismatch);
        }

        Ok(ApprovedStatement {
            statement: pending.statement,
        })
    }

    /// Drops the parked statement. Returns whether the token was pending.
    pub fn abort(&mut self, token: &ReviewToken) -> bool {
        self.pending.remove(token.as_str()).is_some()
    }

    pub fn confirm<P: ConfirmationPrompt + ?Sized>(
        &mut self,
        statement: Statement,
        prompt: &mut P,
    ) -> Result<GateOutcome, GateError> {
        let review = self.review(statement);
        match prompt.ask(&review) {
            Decision::Proceed => self
                .approve(&review.token, &review.text)
                .map(GateOutcome::Proceed),
            Decision::Abort => {
                self.abort(&review.token);
                Ok(GateOutcome::Abort)
            }
        }
    }
}

fn review_notes(statement: &Statement) -> Vec<ReviewNote> {
    let mut notes = Vec::new();
    let statement_count = split_outside_quotes(statement.text(), ';').len();
    if statement_count > 1 {
        notes.push(ReviewNote::MultipleStatements(statement_count));
    }

    let operation = statement.operation();
    if operation.is_mutating() {
        notes.push(ReviewNote::ModifiesData(operation));
    }
    if matches!(operation, Operation::Update | Operation::Delete)
        && !contains_keyword(statement.text(), "WHERE")
    {
        notes.push(ReviewNote::UnfilteredMutation(operation));
    }
    notes
}

fn contains_keyword(text: &str, keyword: &str) -> bool {
    text.split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
        .any(|word| word.eq_ignore_ascii_case(keyword))
}

/// Splits `sql` on `separator` wherever it is not inside a quoted string,
/// identifier or comment. Pieces are trimmed and empty pieces dropped.
#[must_use]
pub fn split_outside_quotes(sql: &str, separator: char) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_backtick = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
            }
            continue;
        }

        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
            }
            continue;
        }

        let quoted = in_single_quote || in_double_quote || in_backtick;
        if !quoted {
            if ch == '-' && chars.peek() == Some(&'-') {
                chars.next();
                in_line_comment = true;
                continue;
            }
            if ch == '/' && chars.peek() == Some(&'*') {
                chars.next();
                in_block_comment = true;
                continue;
            }
        }

        match ch {
            '\'' if !in_double_quote && !in_backtick => {
                in_single_quote = !in_single_quote;
                current.push(ch);
            }
            '"' if !in_single_quote && !in_backtick => {
                in_double_quote = !in_double_quote;
                current.push(ch);
            }
            '`' if !in_single_quote && !in_double_quote => {
                in_backtick = !in_backtick;
                current.push(ch);
            }
            _ if ch == separator && !quoted => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        statements.push(trailing.to_string());
    }

    statements
}

fn fingerprint_text(text: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
