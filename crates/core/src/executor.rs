use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::confirmation::ApprovedStatement;
use crate::connection::{Connection, DatabaseDriver, DriverError, DriverOutput, ResultSet};
use crate::query_spec::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionOptions {
    pub timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("not connected to a database")]
    NotConnected,
    #[error("statement failed: {0}")]
    Driver(#[source] DriverError),
    #[error("statement ran but could not be committed: {0}")]
    Commit(#[source] DriverError),
    #[error("statement exceeded the {0:?} timeout; reconnect to continue")]
    TimedOut(Duration),
    #[error("statement cancelled; reconnect to continue")]
    Cancelled,
}

impl ExecutionError {
    /// Whether the session was dropped and must be reopened.
    #[must_use]
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub operation: Operation,
    pub output: DriverOutput,
    pub elapsed: Duration,
}

impl ExecutionResult {
    #[must_use]
    pub fn rows(&self) -> Option<&ResultSet> {
        match &self.output {
            DriverOutput::Rows(rows) => Some(rows),
            DriverOutput::Affected(_) => None,
        }
    }

    #[must_use]
    pub fn row_count(&self) -> u64 {
        match &self.output {
            DriverOutput::Rows(rows) => rows.row_count() as u64,
            DriverOutput::Affected(count) => *count,
        }
    }
}

enum Interrupted {
    TimedOut(Duration),
    Cancelled,
}

/// Runs one approved statement on the connection's session.
///
/// Mutating statements run inside `begin`/`commit`; a failed run is rolled
/// back so the session stays usable. A timeout or cancellation drops the
/// in-flight call and discards the session.
pub async fn execute<D: DatabaseDriver>(
    connection: &mut Connection<D>,
    approved: &ApprovedStatement,
    options: &ExecutionOptions,
    cancellation: &CancellationToken,
) -> Result<ExecutionResult, ExecutionError> {
    let started_at = Instant::now();
    let statement = approved.statement();
    let operation = statement.operation();

    let outcome = {
        let (driver, session) = connection
            .parts_mut()
            .ok_or(ExecutionError::NotConnected)?;
        debug!(sql = statement.text(), params = statement.params().len(), "executing");

        let work = run_statement(driver, session, approved);
        guarded(work, options.timeout, cancellation).await
    };

    let output = match outcome {
        Ok(result) => result?,
        Err(interrupted) => {
            connection.discard();
            return Err(match interrupted {
                Interrupted::TimedOut(limit) => ExecutionError::TimedOut(limit),
                Interrupted::Cancelled => ExecutionError::Cancelled,
            });
        }
    };

    let result = ExecutionResult {
        operation,
        output,
        elapsed: started_at.elapsed(),
    };
    info!(
        %operation,
        rows = result.row_count(),
        elapsed_ms = result.elapsed.as_millis(),
        "statement completed"
    );
    Ok(result)
}

async fn run_statement<D: DatabaseDriver>(
    driver: &D,
    session: &mut D::Session,
    approved: &ApprovedStatement,
) -> Result<DriverOutput, ExecutionError> {
    let statement = approved.statement();
    if !statement.operation().is_mutating() {
        return driver
            .run(session, statement)
            .await
            .map_err(ExecutionError::Driver);
    }

    driver.begin(session).await.map_err(ExecutionError::Driver)?;
    match driver.run(session, statement).await {
        Ok(output) => {
            driver.commit(session).await.map_err(ExecutionError::Commit)?;
            Ok(output)
        }
        Err(error) => {
            if let Err(rollback_error) = driver.rollback(session).await {
                warn!(%rollback_error, "rollback after failed statement also failed");
            }
            Err(ExecutionError::Driver(error))
        }
    }
}

async fn guarded<F, T>(
    work: F,
    timeout: Option<Duration>,
    cancellation: &CancellationToken,
) -> Result<T, Interrupted>
where
    F: std::future::Future<Output = T>,
{
    let limited = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| Interrupted::TimedOut(limit)),
            None => Ok(work.await),
        }
    };

    tokio::select! {
        biased;
        () = cancellation.cancelled() => Err(Interrupted::Cancelled),
        result = limited => result,
    }
}
