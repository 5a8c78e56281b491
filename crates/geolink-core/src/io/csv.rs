//! CSV and plain-text readers for location inputs.

use std::path::Path;

use serde_json::Value;

use crate::error::{FormatError, IoError, IoErrorExt, Result};
use crate::types::Record;

const FORMAT: &str = "CSV";

/// Read a CSV file with a header row into records.
///
/// Every cell is kept as a string; empty cells become `null`. When
/// `required_column` is given, the header must contain it.
///
/// # Errors
///
/// Returns an error if the file is missing or malformed, or if
/// `required_column` is not in the header.
pub fn read_csv_records(
    path: impl AsRef<Path>,
    required_column: Option<&str>,
) -> Result<Vec<Record>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(IoError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let mut reader = csv::Reader::from_path(path).with_read_context(FORMAT, path)?;
    let headers = reader.headers().with_read_context(FORMAT, path)?.clone();

    if let Some(column) = required_column
        && !headers.iter().any(|h| h == column)
    {
        return Err(FormatError::MissingColumn {
            column: column.to_string(),
            format: FORMAT.to_string(),
        }
        .into());
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.with_read_context(FORMAT, path)?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(header, cell)| {
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                (header.to_string(), value)
            })
            .collect();
        records.push(record);
    }

    log::debug!("Read {} row(s) from {}", records.len(), path.display());
    Ok(records)
}

/// Read a plain-text file holding one place name per line.
///
/// Blank lines are skipped and surrounding whitespace is trimmed.
///
/// # Errors
///
/// Returns an error if the file is missing or unreadable.
pub fn read_location_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(IoError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let text = std::fs::read_to_string(path).with_read_context("text", path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
