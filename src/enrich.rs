//! Temporal enrichment of hourly observations with vigilance levels.
//!
//! For every configured phenomenon category the engine resolves one
//! severity per observation timestamp: the covering alert span wins,
//! otherwise the default level fills the cell. The output table is
//! dense by construction, with exactly one row per input observation
//! and one severity column per category.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::alert_index::{AlertIndex, AlertIndexError, AlertSpan, BoundaryPolicy};
use crate::timestamp::format_datetime_second;

/// Bumped whenever the rendered column layout changes meaning.
pub const DATASET_SCHEMA_VERSION: u32 = 1;

/// One cleaned hourly observation, timestamp in epoch milliseconds UTC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub ts_ms_utc: i64,
    pub precipitation_mm: f64,
    pub temperature_c: f64,
}

/// One cleaned vigilance interval, bounds in epoch milliseconds UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertInterval {
    pub category_id: u32,
    pub start_ts_ms_utc: i64,
    pub end_ts_ms_utc: i64,
    pub severity: u8,
}

/// Enrichment knobs. The defaults mirror the Météo-France vigilance
/// feed: categories 1..=7 and green level 1 when nothing is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub categories: Vec<u32>,
    pub default_severity: u8,
    pub boundary_policy: BoundaryPolicy,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            categories: (1..=7).collect(),
            default_severity: 1,
            boundary_policy: BoundaryPolicy::InclusiveBoth,
        }
    }
}

/// One output row. `severities` is aligned with the owning table's
/// `categories` vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub ts_ms_utc: i64,
    pub precipitation_mm: f64,
    pub temperature_c: f64,
    pub severities: Vec<u8>,
}

/// Dense enrichment output, one row per input observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTable {
    pub categories: Vec<u32>,
    pub rows: Vec<EnrichedRow>,
}

impl EnrichedTable {
    /// Output header row: canonical base columns followed by one
    /// `phenomene_<id>` column per category, in configured order.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = vec![
            "datetime".to_string(),
            "quantite_precipitations".to_string(),
            "temperature_instant".to_string(),
        ];
        headers.extend(self.categories.iter().map(|id| format!("phenomene_{id}")));
        headers
    }

    /// Renders every row as text cells, datetime in canonical
    /// `YYYY-MM-DD HH:MM:SS` form.
    pub fn render_rows(&self) -> Result<Vec<Vec<String>>, EnrichError> {
        self.rows
            .iter()
            .map(|row| {
                let mut cells = Vec::with_capacity(3 + row.severities.len());
                cells.push(
                    format_datetime_second(row.ts_ms_utc)
                        .map_err(|_| EnrichError::InvalidTimestamp(row.ts_ms_utc))?,
                );
                cells.push(row.precipitation_mm.to_string());
                cells.push(row.temperature_c.to_string());
                cells.extend(row.severities.iter().map(u8::to_string));
                Ok(cells)
            })
            .collect()
    }
}

/// Per-category resolution counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEnrichStats {
    pub category_id: u32,
    pub interval_count: u64,
    pub resolved_rows: u64,
    pub defaulted_rows: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichReport {
    pub observation_rows: u64,
    pub alert_rows: u64,
    pub categories: Vec<CategoryEnrichStats>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnrichError {
    #[error("invalid enrich config: {0}")]
    InvalidConfig(String),
    #[error("alert interval for category {category_id} ends before it starts: start_ts_ms_utc={start_ts_ms_utc} end_ts_ms_utc={end_ts_ms_utc}")]
    MalformedInterval {
        category_id: u32,
        start_ts_ms_utc: i64,
        end_ts_ms_utc: i64,
    },
    #[error("duplicate observation timestamp: ts_ms_utc={ts_ms_utc}")]
    DuplicateTimestamp { ts_ms_utc: i64 },
    #[error("invalid UTC timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("alert index error: {0}")]
    Index(#[from] AlertIndexError),
    #[error("dataset schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("dataset schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// Cell type of one output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnDType {
    Text,
    F64,
    U8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetColumn {
    pub name: String,
    pub dtype: ColumnDType,
}

/// Versioned, fingerprinted description of the output table layout.
/// Downstream consumers pin the fingerprint to detect silent drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<DatasetColumn>,
}

/// Builds the output schema implied by `cfg`.
pub fn build_dataset_schema(cfg: &EnrichConfig) -> DatasetSchema {
    let mut columns = vec![
        DatasetColumn {
            name: "datetime".to_string(),
            dtype: ColumnDType::Text,
        },
        DatasetColumn {
            name: "quantite_precipitations".to_string(),
            dtype: ColumnDType::F64,
        },
        DatasetColumn {
            name: "temperature_instant".to_string(),
            dtype: ColumnDType::F64,
        },
    ];
    for id in &cfg.categories {
        columns.push(DatasetColumn {
            name: format!("phenomene_{id}"),
            dtype: ColumnDType::U8,
        });
    }

    let fingerprint = schema_fingerprint(cfg, &columns);
    info!(
        component = "enrich",
        event = "enrich.schema.built",
        version = DATASET_SCHEMA_VERSION,
        column_count = columns.len(),
        fingerprint = %fingerprint,
    );
    DatasetSchema {
        version: DATASET_SCHEMA_VERSION,
        fingerprint,
        columns,
    }
}

fn schema_fingerprint(cfg: &EnrichConfig, columns: &[DatasetColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{DATASET_SCHEMA_VERSION};"));
    hasher.update(format!("default_severity:{};", cfg.default_severity));
    hasher.update(format!("boundary:{:?};", cfg.boundary_policy));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{:?};", column.dtype));
    }
    hex::encode(hasher.finalize())
}

/// Fails when a pinned schema does not match the produced one.
pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    schema: &DatasetSchema,
) -> Result<(), EnrichError> {
    if schema.version != expected_version {
        return Err(EnrichError::SchemaVersionMismatch {
            expected: expected_version,
            actual: schema.version,
        });
    }
    if schema.fingerprint != expected_fingerprint {
        return Err(EnrichError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: schema.fingerprint.clone(),
        });
    }
    Ok(())
}

fn validate_config(cfg: &EnrichConfig) -> Result<(), EnrichError> {
    if cfg.categories.is_empty() {
        return Err(EnrichError::InvalidConfig(
            "categories must not be empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for id in &cfg.categories {
        if !seen.insert(*id) {
            return Err(EnrichError::InvalidConfig(format!(
                "duplicate category id {id}"
            )));
        }
    }
    if cfg.default_severity == 0 {
        return Err(EnrichError::InvalidConfig(
            "default_severity must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_alerts(alerts: &[AlertInterval]) -> Result<(), EnrichError> {
    for alert in alerts {
        if alert.end_ts_ms_utc < alert.start_ts_ms_utc {
            return Err(EnrichError::MalformedInterval {
                category_id: alert.category_id,
                start_ts_ms_utc: alert.start_ts_ms_utc,
                end_ts_ms_utc: alert.end_ts_ms_utc,
            });
        }
    }
    Ok(())
}

fn validate_unique_timestamps(observations: &[Observation]) -> Result<(), EnrichError> {
    let mut seen = HashSet::with_capacity(observations.len());
    for obs in observations {
        if !seen.insert(obs.ts_ms_utc) {
            return Err(EnrichError::DuplicateTimestamp {
                ts_ms_utc: obs.ts_ms_utc,
            });
        }
    }
    Ok(())
}

/// Resolves one severity per category for every observation.
///
/// All alert intervals are validated up front, including intervals of
/// categories outside `cfg.categories`, so a malformed feed fails the
/// build instead of silently narrowing it. Categories with no
/// intervals at all skip index construction and fill the whole column
/// with the default level.
pub fn enrich_observations(
    observations: &[Observation],
    alerts: &[AlertInterval],
    cfg: &EnrichConfig,
) -> Result<(EnrichedTable, EnrichReport), EnrichError> {
    validate_config(cfg)?;
    validate_alerts(alerts)?;
    validate_unique_timestamps(observations)?;

    info!(
        component = "enrich",
        event = "enrich.start",
        observation_rows = observations.len(),
        alert_rows = alerts.len(),
        category_count = cfg.categories.len(),
        default_severity = cfg.default_severity,
        boundary_policy = ?cfg.boundary_policy,
    );

    let mut stats = Vec::with_capacity(cfg.categories.len());
    let mut columns: Vec<Vec<u8>> = Vec::with_capacity(cfg.categories.len());

    for &category_id in &cfg.categories {
        let spans: Vec<AlertSpan> = alerts
            .iter()
            .filter(|alert| alert.category_id == category_id)
            .map(|alert| AlertSpan {
                start_ts_ms_utc: alert.start_ts_ms_utc,
                end_ts_ms_utc: alert.end_ts_ms_utc,
                severity: alert.severity,
            })
            .collect();

        if spans.is_empty() {
            info!(
                component = "enrich",
                event = "enrich.category.empty",
                category_id,
                default_severity = cfg.default_severity,
            );
            columns.push(vec![cfg.default_severity; observations.len()]);
            stats.push(CategoryEnrichStats {
                category_id,
                interval_count: 0,
                resolved_rows: 0,
                defaulted_rows: observations.len() as u64,
            });
            continue;
        }

        let index = AlertIndex::build(&spans, cfg.boundary_policy)?;
        let mut resolved_rows = 0u64;
        let column: Vec<u8> = observations
            .iter()
            .map(|obs| match index.resolve(obs.ts_ms_utc) {
                Some(severity) => {
                    resolved_rows += 1;
                    severity
                }
                None => cfg.default_severity,
            })
            .collect();

        stats.push(CategoryEnrichStats {
            category_id,
            interval_count: spans.len() as u64,
            resolved_rows,
            defaulted_rows: observations.len() as u64 - resolved_rows,
        });
        columns.push(column);
    }

    let rows: Vec<EnrichedRow> = observations
        .iter()
        .enumerate()
        .map(|(row_idx, obs)| EnrichedRow {
            ts_ms_utc: obs.ts_ms_utc,
            precipitation_mm: obs.precipitation_mm,
            temperature_c: obs.temperature_c,
            severities: columns.iter().map(|column| column[row_idx]).collect(),
        })
        .collect();

    let report = EnrichReport {
        observation_rows: observations.len() as u64,
        alert_rows: alerts.len() as u64,
        categories: stats,
    };
    let table = EnrichedTable {
        categories: cfg.categories.clone(),
        rows,
    };

    info!(
        component = "enrich",
        event = "enrich.finish",
        output_rows = table.rows.len(),
        category_count = table.categories.len(),
    );
    Ok((table, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(ts_ms_utc: i64) -> Observation {
        Observation {
            ts_ms_utc,
            precipitation_mm: 0.0,
            temperature_c: 10.0,
        }
    }

    fn interval(category_id: u32, start: i64, end: i64, severity: u8) -> AlertInterval {
        AlertInterval {
            category_id,
            start_ts_ms_utc: start,
            end_ts_ms_utc: end,
            severity,
        }
    }

    fn cfg(categories: &[u32]) -> EnrichConfig {
        EnrichConfig {
            categories: categories.to_vec(),
            ..EnrichConfig::default()
        }
    }

    #[test]
    fn default_config_covers_the_seven_vigilance_categories() {
        let cfg = EnrichConfig::default();
        assert_eq!(cfg.categories, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(cfg.default_severity, 1);
        assert_eq!(cfg.boundary_policy, BoundaryPolicy::InclusiveBoth);
    }

    #[test]
    fn rejects_empty_category_list() {
        let err = enrich_observations(&[obs(0)], &[], &cfg(&[]))
            .expect_err("empty category list must be rejected");
        assert!(matches!(err, EnrichError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_duplicate_category_ids() {
        let err = enrich_observations(&[obs(0)], &[], &cfg(&[1, 2, 1]))
            .expect_err("duplicate category ids must be rejected");
        assert!(matches!(err, EnrichError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_zero_default_severity() {
        let mut config = cfg(&[1]);
        config.default_severity = 0;
        let err = enrich_observations(&[obs(0)], &[], &config)
            .expect_err("zero default severity must be rejected");
        assert!(matches!(err, EnrichError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_interval_fails_even_for_unconfigured_category() {
        let err = enrich_observations(&[obs(0)], &[interval(9, 200, 100, 3)], &cfg(&[1]))
            .expect_err("inverted interval must fail the build");
        assert_eq!(
            err,
            EnrichError::MalformedInterval {
                category_id: 9,
                start_ts_ms_utc: 200,
                end_ts_ms_utc: 100,
            }
        );
    }

    #[test]
    fn duplicate_observation_timestamps_are_rejected() {
        let err = enrich_observations(&[obs(100), obs(200), obs(100)], &[], &cfg(&[1]))
            .expect_err("duplicate timestamps must be rejected");
        assert_eq!(err, EnrichError::DuplicateTimestamp { ts_ms_utc: 100 });
    }

    #[test]
    fn headers_follow_category_order() {
        let table = EnrichedTable {
            categories: vec![3, 1],
            rows: Vec::new(),
        };
        assert_eq!(
            table.headers(),
            vec![
                "datetime",
                "quantite_precipitations",
                "temperature_instant",
                "phenomene_3",
                "phenomene_1",
            ]
        );
    }

    #[test]
    fn render_rows_emits_canonical_datetime_text() {
        let (table, _) = enrich_observations(
            &[Observation {
                ts_ms_utc: 1_686_823_200_000, // 2023-06-15 10:00:00 UTC
                precipitation_mm: 1.5,
                temperature_c: 21.5,
            }],
            &[interval(2, 1_686_816_000_000, 1_686_830_400_000, 3)],
            &cfg(&[2]),
        )
        .expect("enrich");

        let rows = table.render_rows().expect("render");
        assert_eq!(rows, vec![vec!["2023-06-15 10:00:00", "1.5", "21.5", "3"]]);
    }

    #[test]
    fn render_rows_fails_on_out_of_range_timestamp() {
        let table = EnrichedTable {
            categories: vec![1],
            rows: vec![EnrichedRow {
                ts_ms_utc: i64::MAX,
                precipitation_mm: 0.0,
                temperature_c: 0.0,
                severities: vec![1],
            }],
        };
        assert_eq!(
            table.render_rows().expect_err("render must fail"),
            EnrichError::InvalidTimestamp(i64::MAX)
        );
    }

    #[test]
    fn schema_lists_base_columns_then_categories() {
        let schema = build_dataset_schema(&cfg(&[1, 5]));
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "datetime",
                "quantite_precipitations",
                "temperature_instant",
                "phenomene_1",
                "phenomene_5",
            ]
        );
        assert_eq!(schema.version, DATASET_SCHEMA_VERSION);
        assert_eq!(schema.columns[0].dtype, ColumnDType::Text);
        assert_eq!(schema.columns[1].dtype, ColumnDType::F64);
        assert_eq!(schema.columns[2].dtype, ColumnDType::F64);
        assert_eq!(schema.columns[3].dtype, ColumnDType::U8);
    }

    #[test]
    fn schema_fingerprint_is_deterministic_and_config_sensitive() {
        let base = build_dataset_schema(&cfg(&[1, 2]));
        let same = build_dataset_schema(&cfg(&[1, 2]));
        assert_eq!(base.fingerprint, same.fingerprint);

        let more_categories = build_dataset_schema(&cfg(&[1, 2, 3]));
        assert_ne!(base.fingerprint, more_categories.fingerprint);

        let mut other_default = cfg(&[1, 2]);
        other_default.default_severity = 2;
        assert_ne!(
            base.fingerprint,
            build_dataset_schema(&other_default).fingerprint
        );

        let mut half_open = cfg(&[1, 2]);
        half_open.boundary_policy = BoundaryPolicy::HalfOpenEnd;
        assert_ne!(base.fingerprint, build_dataset_schema(&half_open).fingerprint);
    }

    #[test]
    fn schema_compatibility_check_flags_version_and_fingerprint_drift() {
        let schema = build_dataset_schema(&cfg(&[1]));
        assert_schema_compatible(DATASET_SCHEMA_VERSION, &schema.fingerprint, &schema)
            .expect("identical schema must be compatible");

        let err = assert_schema_compatible(DATASET_SCHEMA_VERSION + 1, &schema.fingerprint, &schema)
            .expect_err("version drift must fail");
        assert!(matches!(err, EnrichError::SchemaVersionMismatch { .. }));

        let err = assert_schema_compatible(DATASET_SCHEMA_VERSION, "deadbeef", &schema)
            .expect_err("fingerprint drift must fail");
        assert!(matches!(err, EnrichError::SchemaFingerprintMismatch { .. }));
    }
}
