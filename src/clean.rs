//! Upstream cleaning filters applied to raw exports before decoding.
//!
//! Mirrors the preparation the source feeds need: clamp rows to the
//! study date range, keep a single department when the table carries
//! one, and drop metadata columns the dataset never uses. Filters run
//! on the raw text table so a file can be cleaned once and decoded for
//! several purposes.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::table::{RawTable, TableError};
use crate::timestamp::{parse_utc_timestamp, TimestampError};

/// 2022-01-01 00:00:00 UTC.
pub const DEFAULT_DATE_START_TS_MS_UTC: i64 = 1_640_995_200_000;
/// 2025-12-31 00:00:00 UTC. The range end is a date-resolution bound,
/// rows later on that final day fall outside it.
pub const DEFAULT_DATE_END_TS_MS_UTC: i64 = 1_767_139_200_000;

/// Hauts-de-Seine, the department the training stations sit in.
pub const DEFAULT_DEPARTMENT: u32 = 92;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    pub date_start_ts_ms_utc: i64,
    pub date_end_ts_ms_utc: i64,
    /// Department to keep. `None` disables the filter; a configured
    /// department is also inert when the table has no department
    /// column.
    pub department: Option<u32>,
    /// Pinned datetime column. `None` detects one by header name.
    pub datetime_column: Option<String>,
    /// IANA timezone applied to naive datetime cells.
    pub naive_timezone: String,
    /// Columns dropped after filtering. Unknown names are ignored.
    pub exclude_columns: Vec<String>,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            date_start_ts_ms_utc: DEFAULT_DATE_START_TS_MS_UTC,
            date_end_ts_ms_utc: DEFAULT_DATE_END_TS_MS_UTC,
            department: Some(DEFAULT_DEPARTMENT),
            datetime_column: None,
            naive_timezone: "UTC".to_string(),
            exclude_columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    pub rows_in: u64,
    pub rows_after_date_filter: u64,
    pub rows_out: u64,
    /// Column the date filter ran on, configured or detected.
    pub datetime_column: String,
    /// Column the department filter ran on, when one was found.
    pub department_column: Option<String>,
    pub dropped_columns: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("invalid clean config: {0}")]
    InvalidConfig(String),
    #[error("table has no column usable as the datetime column")]
    NoDatetimeColumn,
    #[error("configured datetime column '{0}' not found")]
    DatetimeColumnNotFound(String),
    #[error("cannot exclude column '{0}', the date filter runs on it")]
    ExcludesRequiredColumn(String),
    #[error("row {row} column '{column}': {source}")]
    Timestamp {
        row: usize,
        column: String,
        #[source]
        source: TimestampError,
    },
    #[error("row {row}: department value '{value}' is not numeric")]
    BadDepartment { row: usize, value: String },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Index of the first header containing `date` or `time`
/// (case-insensitive), falling back to the first column.
pub fn detect_datetime_column(headers: &[String]) -> Option<usize> {
    let matched = headers.iter().position(|header| {
        let lowered = header.to_ascii_lowercase();
        lowered.contains("date") || lowered.contains("time")
    });
    matched.or(if headers.is_empty() { None } else { Some(0) })
}

/// Index of the first header naming a department column, if any.
pub fn detect_department_column(headers: &[String]) -> Option<usize> {
    headers.iter().position(|header| {
        let lowered = header.to_ascii_lowercase();
        lowered.contains("departement") || lowered.contains("department")
    })
}

/// Parses the configured naive timezone name.
pub fn resolve_naive_tz(cfg: &CleanConfig) -> Result<Tz, CleanError> {
    cfg.naive_timezone.parse::<Tz>().map_err(|_| {
        CleanError::InvalidConfig(format!(
            "unknown naive timezone '{}'",
            cfg.naive_timezone
        ))
    })
}

/// Applies the configured filters and column drops to `table`.
///
/// The date range is inclusive on both ends. Rows whose department
/// cell is empty are dropped when the filter is active; any other
/// unparseable department cell fails the clean.
pub fn clean_table(
    table: &RawTable,
    cfg: &CleanConfig,
) -> Result<(RawTable, CleanReport), CleanError> {
    if cfg.date_end_ts_ms_utc < cfg.date_start_ts_ms_utc {
        return Err(CleanError::InvalidConfig(
            "date_end_ts_ms_utc must not precede date_start_ts_ms_utc".to_string(),
        ));
    }
    let naive_tz = resolve_naive_tz(cfg)?;

    let dt_idx = match &cfg.datetime_column {
        Some(name) => table
            .column_index(name)
            .ok_or_else(|| CleanError::DatetimeColumnNotFound(name.clone()))?,
        None => detect_datetime_column(table.headers()).ok_or(CleanError::NoDatetimeColumn)?,
    };
    let datetime_column = table.headers()[dt_idx].clone();
    if cfg.exclude_columns.contains(&datetime_column) {
        return Err(CleanError::ExcludesRequiredColumn(datetime_column));
    }

    let department_idx = match cfg.department {
        Some(_) => detect_department_column(table.headers()),
        None => None,
    };
    let department_column = department_idx.map(|idx| table.headers()[idx].clone());

    let rows_in = table.row_count() as u64;
    let mut rows_after_date_filter = 0u64;
    let mut kept_rows = Vec::new();
    for (row_idx, row) in table.rows().iter().enumerate() {
        let row_no = row_idx + 1;
        let ts = parse_utc_timestamp(&row[dt_idx], naive_tz).map_err(|source| {
            CleanError::Timestamp {
                row: row_no,
                column: datetime_column.clone(),
                source,
            }
        })?;
        if ts < cfg.date_start_ts_ms_utc || ts > cfg.date_end_ts_ms_utc {
            continue;
        }
        rows_after_date_filter += 1;

        if let (Some(department), Some(idx)) = (cfg.department, department_idx) {
            let cell = row[idx].trim();
            if cell.is_empty() {
                continue;
            }
            let value: f64 = cell.parse().map_err(|_| CleanError::BadDepartment {
                row: row_no,
                value: cell.to_string(),
            })?;
            if value != f64::from(department) {
                continue;
            }
        }
        kept_rows.push(row.clone());
    }

    let filtered = RawTable::from_parts(table.headers().to_vec(), kept_rows)?;
    let cleaned = filtered.without_columns(&cfg.exclude_columns);
    let dropped_columns: Vec<String> = table
        .headers()
        .iter()
        .filter(|header| cfg.exclude_columns.contains(header))
        .cloned()
        .collect();

    let report = CleanReport {
        rows_in,
        rows_after_date_filter,
        rows_out: cleaned.row_count() as u64,
        datetime_column,
        department_column,
        dropped_columns,
    };
    info!(
        component = "clean",
        event = "clean.table.finish",
        rows_in = report.rows_in,
        rows_after_date_filter = report.rows_after_date_filter,
        rows_out = report.rows_out,
        datetime_column = %report.datetime_column,
        department_filtered = report.department_column.is_some(),
        dropped_columns = report.dropped_columns.len(),
    );
    Ok((cleaned, report))
}
