//! CSV-shaped string tables and typed decoding into the enrichment
//! model.
//!
//! Raw exports arrive as text cells with site-specific column names.
//! `RawTable` keeps them untyped and rectangular; the decode functions
//! map configured column roles onto actual headers and convert cells,
//! reporting the first offending row instead of guessing.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enrich::{AlertInterval, Observation};
use crate::timestamp::{parse_utc_timestamp, TimestampError};

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("table has no header row")]
    MissingHeaders,
    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("required column for role '{role}' not found: '{column}'")]
    MissingColumn { role: &'static str, column: String },
    #[error("row {row}: field {field} (column '{column}') has unparseable value '{value}'")]
    ParseField {
        row: usize,
        field: &'static str,
        column: String,
        value: String,
    },
    #[error("row {row} column '{column}': {source}")]
    Timestamp {
        row: usize,
        column: String,
        #[source]
        source: TimestampError,
    },
    #[error("invalid output path: {0}")]
    InvalidOutputPath(String),
}

/// Rectangular string table: one header row plus data rows of equal
/// width. Row numbers in errors are 1-based data rows, the header
/// excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Builds a table, rejecting empty headers and ragged rows.
    pub fn from_parts(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, TableError> {
        if headers.is_empty() {
            return Err(TableError::MissingHeaders);
        }
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != headers.len() {
                return Err(TableError::RaggedRow {
                    row: row_idx + 1,
                    found: row.len(),
                    expected: headers.len(),
                });
            }
        }
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    /// Copy of the table without the named columns. Names that match
    /// no header are ignored.
    pub fn without_columns(&self, names: &[String]) -> RawTable {
        let keep: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !names.contains(header))
            .map(|(idx, _)| idx)
            .collect();
        RawTable {
            headers: keep.iter().map(|&idx| self.headers[idx].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| keep.iter().map(|&idx| row[idx].clone()).collect())
                .collect(),
        }
    }
}

/// Column roles of the hourly observation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationColumns {
    pub datetime: String,
    pub precipitation: String,
    pub temperature: String,
}

impl Default for ObservationColumns {
    fn default() -> Self {
        Self {
            datetime: "datetime".to_string(),
            precipitation: "quantite_precipitations".to_string(),
            temperature: "temperature_instant".to_string(),
        }
    }
}

/// Column roles of the vigilance alert table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertColumns {
    pub category: String,
    pub start: String,
    pub end: String,
    pub severity: String,
}

impl Default for AlertColumns {
    fn default() -> Self {
        Self {
            category: "phenomene_id".to_string(),
            start: "date_debut_vigilance".to_string(),
            end: "date_fin_vigilance".to_string(),
            severity: "niveau_vigilance".to_string(),
        }
    }
}

/// Reads a CSV file, header row required.
pub fn read_csv_table(path: &Path) -> Result<RawTable, TableError> {
    let file = fs::File::open(path)?;
    read_csv_table_from_reader(file)
}

/// Reads CSV from any reader, header row required.
pub fn read_csv_table_from_reader(reader: impl Read) -> Result<RawTable, TableError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(TableError::MissingHeaders);
    }

    let expected = headers.len();
    let mut rows = Vec::new();
    for (row_idx, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() != expected {
            return Err(TableError::RaggedRow {
                row: row_idx + 1,
                found: record.len(),
                expected,
            });
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(RawTable { headers, rows })
}

/// Writes the table as CSV via a temp file rename, so a crash mid-write
/// never leaves a truncated file at `path`.
pub fn write_csv_table(path: &Path, table: &RawTable) -> Result<(), TableError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.headers())?;
    for row in table.rows() {
        writer.write_record(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| TableError::Io(err.into_error()))?;
    write_atomic(path, &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TableError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| TableError::InvalidOutputPath(path.display().to_string()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn require_column(
    table: &RawTable,
    role: &'static str,
    column: &str,
) -> Result<usize, TableError> {
    table.column_index(column).ok_or_else(|| TableError::MissingColumn {
        role,
        column: column.to_string(),
    })
}

fn parse_f64_cell(
    row: &[String],
    row_no: usize,
    idx: usize,
    field: &'static str,
    column: &str,
) -> Result<f64, TableError> {
    let raw = row[idx].trim();
    raw.parse::<f64>().map_err(|_| TableError::ParseField {
        row: row_no,
        field,
        column: column.to_string(),
        value: raw.to_string(),
    })
}

fn parse_u32_cell(
    row: &[String],
    row_no: usize,
    idx: usize,
    field: &'static str,
    column: &str,
) -> Result<u32, TableError> {
    let raw = row[idx].trim();
    raw.parse::<u32>().map_err(|_| TableError::ParseField {
        row: row_no,
        field,
        column: column.to_string(),
        value: raw.to_string(),
    })
}

fn parse_u8_cell(
    row: &[String],
    row_no: usize,
    idx: usize,
    field: &'static str,
    column: &str,
) -> Result<u8, TableError> {
    let raw = row[idx].trim();
    raw.parse::<u8>().map_err(|_| TableError::ParseField {
        row: row_no,
        field,
        column: column.to_string(),
        value: raw.to_string(),
    })
}

fn parse_ts_cell(
    row: &[String],
    row_no: usize,
    idx: usize,
    column: &str,
    naive_tz: Tz,
) -> Result<i64, TableError> {
    parse_utc_timestamp(&row[idx], naive_tz).map_err(|source| TableError::Timestamp {
        row: row_no,
        column: column.to_string(),
        source,
    })
}

/// Decodes observation rows. Naive datetime cells are localized in
/// `naive_tz` before conversion to UTC.
pub fn decode_observations(
    table: &RawTable,
    columns: &ObservationColumns,
    naive_tz: Tz,
) -> Result<Vec<Observation>, TableError> {
    let dt_idx = require_column(table, "datetime", &columns.datetime)?;
    let precip_idx = require_column(table, "precipitation", &columns.precipitation)?;
    let temp_idx = require_column(table, "temperature", &columns.temperature)?;

    let mut observations = Vec::with_capacity(table.row_count());
    for (row_idx, row) in table.rows().iter().enumerate() {
        let row_no = row_idx + 1;
        observations.push(Observation {
            ts_ms_utc: parse_ts_cell(row, row_no, dt_idx, &columns.datetime, naive_tz)?,
            precipitation_mm: parse_f64_cell(
                row,
                row_no,
                precip_idx,
                "precipitation",
                &columns.precipitation,
            )?,
            temperature_c: parse_f64_cell(
                row,
                row_no,
                temp_idx,
                "temperature",
                &columns.temperature,
            )?,
        });
    }
    Ok(observations)
}

/// Decodes alert rows. Interval ordering is not checked here, the
/// enrichment engine validates start/end pairs itself.
pub fn decode_alerts(
    table: &RawTable,
    columns: &AlertColumns,
    naive_tz: Tz,
) -> Result<Vec<AlertInterval>, TableError> {
    let category_idx = require_column(table, "category", &columns.category)?;
    let start_idx = require_column(table, "start", &columns.start)?;
    let end_idx = require_column(table, "end", &columns.end)?;
    let severity_idx = require_column(table, "severity", &columns.severity)?;

    let mut alerts = Vec::with_capacity(table.row_count());
    for (row_idx, row) in table.rows().iter().enumerate() {
        let row_no = row_idx + 1;
        alerts.push(AlertInterval {
            category_id: parse_u32_cell(row, row_no, category_idx, "category", &columns.category)?,
            start_ts_ms_utc: parse_ts_cell(row, row_no, start_idx, &columns.start, naive_tz)?,
            end_ts_ms_utc: parse_ts_cell(row, row_no, end_idx, &columns.end, naive_tz)?,
            severity: parse_u8_cell(row, row_no, severity_idx, "severity", &columns.severity)?,
        });
    }
    Ok(alerts)
}
