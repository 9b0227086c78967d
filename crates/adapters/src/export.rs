use std::fs;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Workbook, XlsxError};
use sqlform_core::connection::ResultSet;
use sqlform_core::result_pane::{ExportError, ExportReport, ResultExporter};
use sqlform_core::settings::{ExportFormat, Settings};

/// Writes the full result set to one fixed file, replacing it each time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadsheetExporter {
    path: PathBuf,
    format: ExportFormat,
}

impl SpreadsheetExporter {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.export_path.clone(), settings.export_format)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn format(&self) -> ExportFormat {
        self.format
    }
}

impl ResultExporter for SpreadsheetExporter {
    fn export(&self, result: &ResultSet) -> Result<ExportReport, ExportError> {
        let rows_written = match self.format {
            ExportFormat::Xlsx => export_rows_to_xlsx(&self.path, result)?,
            ExportFormat::Csv => export_rows_to_csv(&self.path, result)?,
        };
        Ok(ExportReport {
            path: self.path.clone(),
            rows_written,
        })
    }
}

pub fn export_rows_to_xlsx(path: &Path, result: &ResultSet) -> Result<usize, ExportError> {
    let encode_error = |error: XlsxError| match error {
        XlsxError::IoError(source) => ExportError::Write {
            path: path.to_path_buf(),
            source,
        },
        other => ExportError::Encode {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    };
    let too_large = |what: &str| ExportError::Encode {
        path: path.to_path_buf(),
        message: format!("result has too many {what} for a worksheet"),
    };

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (column_index, header) in result.columns.iter().enumerate() {
        let column = u16::try_from(column_index).map_err(|_| too_large("columns"))?;
        worksheet
            .write_string(0, column, header)
            .map_err(encode_error)?;
    }

    for (row_index, row) in result.rows.iter().enumerate() {
        let sheet_row = u32::try_from(row_index + 1).map_err(|_| too_large("rows"))?;
        for column_index in 0..result.columns.len() {
            let Some(value) = row.get(column_index).and_then(Option::as_deref) else {
                continue;
            };
            let column = u16::try_from(column_index).map_err(|_| too_large("columns"))?;
            let written = match as_number(value) {
                Some(number) => worksheet.write_number(sheet_row, column, number),
                None => worksheet.write_string(sheet_row, column, value),
            };
            written.map_err(encode_error)?;
        }
    }

    workbook.save(path).map_err(encode_error)?;
    Ok(result.rows.len())
}

pub fn export_rows_to_csv(path: &Path, result: &ResultSet) -> Result<usize, ExportError> {
    let mut content = String::new();
    content.push_str(
        &result
            .columns
            .iter()
            .map(|header| csv_escape(header))
            .collect::<Vec<_>>()
            .join(","),
    );
    content.push('\n');

    for row in &result.rows {
        let mut values = Vec::with_capacity(result.columns.len());
        for column_index in 0..result.columns.len() {
            let value = row
                .get(column_index)
                .and_then(Option::as_deref)
                .unwrap_or("");
            values.push(csv_escape(value));
        }
        content.push_str(&values.join(","));
        content.push('\n');
    }

    fs::write(path, content).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(result.rows.len())
}

/// Largest number of significant digits a spreadsheet cell keeps.
const NUMERIC_CELL_DIGITS: usize = 15;

/// A cell is stored as a number only when the number prints back to exactly
/// the text the driver returned. Everything else stays a string.
fn as_number(value: &str) -> Option<f64> {
    let significant = value
        .chars()
        .filter(char::is_ascii_digit)
        .skip_while(|digit| *digit == '0')
        .count();
    if significant > NUMERIC_CELL_DIGITS {
        return None;
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite() && number.to_string() == value)
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
