use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use crate::connection::{DriverOutput, ResultSet};
use crate::executor::ExecutionResult;
use crate::query_spec::Operation;

/// Outcome line shown for every completed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStatus {
    pub operation: Operation,
    pub rows: u64,
}

impl ExecutionStatus {
    #[must_use]
    pub fn message(&self) -> String {
        match self.operation {
            Operation::Select => format!("SELECT returned {} row(s)", self.rows),
            other => format!("{other} affected {} row(s)", self.rows),
        }
    }
}

/// Display surface for results.
pub trait ResultSink {
    /// Replaces whatever is shown with `result`.
    fn show_rows(&mut self, result: &ResultSet);
    fn show_status(&mut self, status: &ExecutionStatus);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub rows_written: usize,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode export file at {path}: {message}")]
    Encode { path: PathBuf, message: String },
}

/// Persists a full result set somewhere outside the display.
pub trait ResultExporter {
    fn export(&self, result: &ResultSet) -> Result<ExportReport, ExportError>;
}

#[derive(Debug)]
pub struct Delivery {
    pub status: ExecutionStatus,
    pub rows_displayed: Option<usize>,
    pub export: Option<Result<ExportReport, ExportError>>,
}

/// Hands a result to the display and, for SELECTs, to the exporter when one is
/// given. An export failure is reported in [`Delivery::export`] and leaves the
/// displayed rows in place.
pub fn deliver<S, X>(result: &ExecutionResult, sink: &mut S, exporter: Option<&X>) -> Delivery
where
    S: ResultSink + ?Sized,
    X: ResultExporter + ?Sized,
{
    let status = ExecutionStatus {
        operation: result.operation,
        rows: result.row_count(),
    };

    let (rows_displayed, export) = match &result.output {
        DriverOutput::Rows(rows) => {
            sink.show_rows(rows);
            let export = exporter.map(|exporter| exporter.export(rows));
            if let Some(Err(error)) = &export {
                warn!(%error, "result export failed");
            }
            (Some(rows.row_count()), export)
        }
        DriverOutput::Affected(_) => (None, None),
    };
    sink.show_status(&status);

    Delivery {
        status,
        rows_displayed,
        export,
    }
}

/// Tabular result area: the latest result set plus a row cursor.
#[derive(Debug, Clone, Default)]
pub struct ResultPane {
    result: ResultSet,
    cursor: usize,
    status: Option<ExecutionStatus>,
}

impl ResultPane {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.result.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.result.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.result.rows.is_empty()
    }

    #[must_use]
    pub fn has_result(&self) -> bool {
        !self.result.columns.is_empty()
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn status(&self) -> Option<&ExecutionStatus> {
        self.status.as_ref()
    }

    #[must_use]
    pub fn result(&self) -> &ResultSet {
        &self.result
    }

    pub fn move_cursor_up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_cursor_down(&mut self) {
        self.cursor = (self.cursor + 1).min(self.len().saturating_sub(1));
    }

    #[must_use]
    pub fn visible_rows(&self, start: usize, limit: usize) -> &[Vec<Option<String>>] {
        let rows = &self.result.rows;
        if limit == 0 || start >= rows.len() {
            return &[];
        }
        let end = (start + limit).min(rows.len());
        &rows[start..end]
    }
}

impl ResultSink for ResultPane {
    fn show_rows(&mut self, result: &ResultSet) {
        self.result = result.clone();
        self.cursor = 0;
    }

    fn show_status(&mut self, status: &ExecutionStatus) {
        self.status = Some(status.clone());
    }
}

#[must_use]
pub fn display_cell(cell: Option<&String>) -> &str {
    cell.map_or("NULL", String::as_str)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{
        deliver, ExportError, ExportReport, ResultExporter, ResultPane, ResultSink,
    };
    use crate::connection::{DriverOutput, ResultSet};
    use crate::executor::ExecutionResult;
    use crate::query_spec::Operation;

    #[derive(Default)]
    struct RecordingExporter {
        exported: RefCell<Vec<ResultSet>>,
        fail: bool,
    }

    impl ResultExporter for RecordingExporter {
        fn export(&self, result: &ResultSet) -> Result<ExportReport, ExportError> {
            if self.fail {
                return Err(ExportError::Encode {
                    path: PathBuf::from("sql_result.xlsx"),
                    message: "disk full".to_string(),
                });
            }
            self.exported.borrow_mut().push(result.clone());
            Ok(ExportReport {
                path: PathBuf::from("sql_result.xlsx"),
                rows_written: result.row_count(),
            })
        }
    }

    fn rows(values: &[&str]) -> ResultSet {
        ResultSet::new(
            vec!["id".to_string()],
            values
                .iter()
                .map(|value| vec![Some((*value).to_string())])
                .collect(),
        )
    }

    fn select_result(set: ResultSet) -> ExecutionResult {
        ExecutionResult {
            operation: Operation::Select,
            output: DriverOutput::Rows(set),
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn new_rows_replace_previous_result() {
        let mut pane = ResultPane::new();
        pane.show_rows(&rows(&["1", "2", "3"]));
        pane.move_cursor_down();
        pane.show_rows(&rows(&["9"]));

        assert_eq!(pane.len(), 1);
        assert_eq!(pane.cursor(), 0);
        assert_eq!(pane.visible_rows(0, 10), [vec![Some("9".to_string())]]);
    }

    #[test]
    fn visible_rows_returns_requested_window() {
        let mut pane = ResultPane::new();
        pane.show_rows(&rows(&["10", "20", "30", "40"]));

        let window = pane.visible_rows(1, 2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0][0].as_deref(), Some("20"));
        assert!(pane.visible_rows(9, 2).is_empty());
    }

    #[test]
    fn select_with_exporter_exports_the_displayed_rows() {
        let mut pane = ResultPane::new();
        let exporter = RecordingExporter::default();
        let result = select_result(rows(&["1", "2"]));

        let delivery = deliver(&result, &mut pane, Some(&exporter));

        assert_eq!(delivery.rows_displayed, Some(2));
        let report = delivery.export.expect("export attempted").expect("export ok");
        assert_eq!(report.rows_written, 2);
        assert_eq!(exporter.exported.borrow().as_slice(), [pane.result().clone()]);
    }

    #[test]
    fn export_disabled_writes_nothing() {
        let mut pane = ResultPane::new();
        let delivery = deliver::<_, RecordingExporter>(&select_result(rows(&["1"])), &mut pane, None);
        assert!(delivery.export.is_none());
        assert_eq!(pane.len(), 1);
    }

    #[test]
    fn export_failure_keeps_displayed_rows() {
        let mut pane = ResultPane::new();
        let exporter = RecordingExporter {
            fail: true,
            ..RecordingExporter::default()
        };
        let delivery = deliver(&select_result(rows(&["1", "2"])), &mut pane, Some(&exporter));

        assert!(matches!(delivery.export, Some(Err(ExportError::Encode { .. }))));
        assert_eq!(pane.len(), 2);
    }

    #[test]
    fn mutations_only_surface_status() {
        let mut pane = ResultPane::new();
        pane.show_rows(&rows(&["kept"]));
        let exporter = RecordingExporter::default();
        let result = ExecutionResult {
            operation: Operation::Delete,
            output: DriverOutput::Affected(4),
            elapsed: Duration::from_millis(1),
        };

        let delivery = deliver(&result, &mut pane, Some(&exporter));

        assert_eq!(delivery.rows_displayed, None);
        assert!(delivery.export.is_none());
        assert!(exporter.exported.borrow().is_empty());
        assert_eq!(pane.visible_rows(0, 5)[0][0].as_deref(), Some("kept"));
        assert_eq!(
            pane.status().map(super::ExecutionStatus::message).as_deref(),
            Some("DELETE affected 4 row(s)")
        );
    }
}
