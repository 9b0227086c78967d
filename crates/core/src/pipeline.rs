use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit_trail::{AuditOutcome, AuditRecord, FileAuditTrail};
use crate::confirmation::{
    ApprovedStatement, ConfirmationGate, ConfirmationPrompt, Decision, GateError,
    StatementReview,
};
use crate::connection::{Connection, DatabaseDriver};
use crate::executor::{execute, ExecutionError, ExecutionOptions, ExecutionResult};
use crate::query_spec::QuerySpec;
use crate::result_pane::{deliver, Delivery, ResultExporter, ResultSink};
use crate::statement_builder::{build, ValueMode};
use crate::validator::{validate, ValidationError};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[derive(Debug)]
pub enum RequestOutcome {
    Aborted,
    Completed(Delivery),
}

/// Executes approved statements and records each outcome. Cheap to clone so
/// it can travel with the connection into a worker task.
#[derive(Debug, Clone, Default)]
pub struct StatementRunner {
    options: ExecutionOptions,
    audit: Option<FileAuditTrail>,
}

impl StatementRunner {
    #[must_use]
    pub fn new(options: ExecutionOptions, audit: Option<FileAuditTrail>) -> Self {
        Self { options, audit }
    }

    #[must_use]
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub async fn execute<D: DatabaseDriver>(
        &self,
        connection: &mut Connection<D>,
        approved: &ApprovedStatement,
        cancellation: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        let target = connection.status().target;
        let outcome = execute(connection, approved, &self.options, cancellation).await;

        let statement = approved.statement();
        let mut record = AuditRecord {
            connection: target,
            bound_params: statement.params().len(),
            ..AuditRecord::new(statement.operation(), statement.text(), AuditOutcome::Succeeded)
        };
        match &outcome {
            Ok(result) => {
                record.rows = Some(result.row_count());
                record.elapsed_ms = Some(result.elapsed.as_millis());
            }
            Err(error) => {
                record.outcome = match error {
                    ExecutionError::Cancelled => AuditOutcome::Cancelled,
                    ExecutionError::TimedOut(_) => AuditOutcome::TimedOut,
                    _ => AuditOutcome::Failed,
                };
                record.error = Some(error.to_string());
            }
        }
        self.audit(&record);
        outcome
    }

    fn audit(&self, record: &AuditRecord) {
        let Some(trail) = &self.audit else {
            return;
        };
        if let Err(error) = trail.append(record) {
            warn!(%error, path = %trail.path().display(), "failed to append audit record");
        }
    }
}

/// Validate → build → review → approve/abort → execute, one request at a time.
#[derive(Debug, Default)]
pub struct RequestPipeline {
    gate: ConfirmationGate,
    value_mode: ValueMode,
    runner: StatementRunner,
}

impl RequestPipeline {
    #[must_use]
    pub fn new(value_mode: ValueMode, runner: StatementRunner) -> Self {
        Self {
            gate: ConfirmationGate::new(),
            value_mode,
            runner,
        }
    }

    #[must_use]
    pub fn value_mode(&self) -> ValueMode {
        self.value_mode
    }

    #[must_use]
    pub fn runner(&self) -> &StatementRunner {
        &self.runner
    }

    /// Builds the statement for `spec` and parks it for review. Nothing is
    /// parked when validation or value parsing fails.
    pub fn prepare(&mut self, spec: &QuerySpec) -> Result<StatementReview, RequestError> {
        let valid = validate(spec)?;
        let statement = build(&valid, self.value_mode)?;
        Ok(self.gate.review(statement))
    }

    pub fn approve(&mut self, review: &StatementReview) -> Result<ApprovedStatement, RequestError> {
        Ok(self.gate.approve(&review.token, &review.text)?)
    }

    /// Drops the reviewed statement. No database call is made.
    pub fn abort(&mut self, review: &StatementReview) {
        if self.gate.abort(&review.token) {
            info!(operation = %review.operation, "statement aborted at review");
            self.runner.audit(&AuditRecord {
                bound_params: review.params.len(),
                ..AuditRecord::new(review.operation, review.text.clone(), AuditOutcome::Aborted)
            });
        }
    }

    /// Runs one request end to end, asking `prompt` before touching the
    /// connection.
    pub async fn run<D, P, S, X>(
        &mut self,
        spec: &QuerySpec,
        prompt: &mut P,
        connection: &mut Connection<D>,
        sink: &mut S,
        exporter: Option<&X>,
        cancellation: &CancellationToken,
    ) -> Result<RequestOutcome, RequestError>
    where
        D: DatabaseDriver,
        P: ConfirmationPrompt + ?Sized,
        S: ResultSink + ?Sized,
        X: ResultExporter + ?Sized,
    {
        let review = self.prepare(spec)?;
        if prompt.ask(&review) == Decision::Abort {
            self.abort(&review);
            return Ok(RequestOutcome::Aborted);
        }

        let approved = self.approve(&review)?;
        let result = self
            .runner
            .execute(connection, &approved, cancellation)
            .await?;
        Ok(RequestOutcome::Completed(deliver(&result, sink, exporter)))
    }
}
