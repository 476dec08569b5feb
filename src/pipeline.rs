//! End-to-end dataset build: load, clean, decode, enrich, export.
//!
//! `build_dataset` is the pure core over in-memory tables;
//! `build_dataset_from_csv` and `write_dataset_csv` wrap it with file
//! I/O for the batch job that refreshes the training dataset.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::clean::{clean_table, resolve_naive_tz, CleanConfig, CleanError, CleanReport};
use crate::enrich::{
    build_dataset_schema, enrich_observations, DatasetSchema, EnrichConfig, EnrichError,
    EnrichReport, EnrichedTable,
};
use crate::table::{
    decode_alerts, decode_observations, read_csv_table, write_csv_table, AlertColumns,
    ObservationColumns, RawTable, TableError,
};

/// Geographic metadata and derived metrics the dataset never uses.
const HOURLY_EXCLUDED_COLUMNS: [&str; 12] = [
    "numero_poste",
    "nom_usuel",
    "latitude",
    "longitude",
    "altitude",
    "duree_precipitations",
    "vent_moyen",
    "code_etat_neige",
    "charge_neige",
    "neige_au_sol",
    "code_etat_sol_sans_neige",
    "code_etat_sol_avec_neige",
];

/// Redundant classification column in the vigilance export.
const ALERT_EXCLUDED_COLUMNS: [&str; 1] = ["type_vigilance"];

/// Full build configuration. The defaults reproduce the production
/// dataset: department 92, study range 2022 through 2025, vigilance
/// categories 1..=7, Météo-France export column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub observation_clean: CleanConfig,
    pub alert_clean: CleanConfig,
    /// Observation columns decoded after cleaning. The datetime role
    /// is not configured here, it follows the cleaned table's
    /// configured or detected datetime column.
    pub precipitation_column: String,
    pub temperature_column: String,
    pub alert_columns: AlertColumns,
    pub enrich: EnrichConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        let observation_clean = CleanConfig {
            exclude_columns: HOURLY_EXCLUDED_COLUMNS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            ..CleanConfig::default()
        };
        let alert_clean = CleanConfig {
            exclude_columns: ALERT_EXCLUDED_COLUMNS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            ..CleanConfig::default()
        };
        Self {
            observation_clean,
            alert_clean,
            precipitation_column: "quantite_precipitations".to_string(),
            temperature_column: "temperature_instant".to_string(),
            alert_columns: AlertColumns::default(),
            enrich: EnrichConfig::default(),
        }
    }
}

/// Everything one build produces: the dense table, its schema, and the
/// per-stage reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetBuildResult {
    pub schema: DatasetSchema,
    pub table: EnrichedTable,
    pub report: EnrichReport,
    pub observation_clean_report: CleanReport,
    pub alert_clean_report: CleanReport,
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("clean error: {0}")]
    Clean(#[from] CleanError),
    #[error("enrich error: {0}")]
    Enrich(#[from] EnrichError),
    #[error("config file {path}: {message}")]
    ConfigFile { path: String, message: String },
}

/// Loads a `DatasetConfig` from a JSON file. Missing fields fall back
/// to their defaults, so a config can pin only what it overrides.
pub fn load_dataset_config(path: &Path) -> Result<DatasetConfig, DatasetError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|err| DatasetError::ConfigFile {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

/// Cleans both raw tables, decodes them, and runs the enrichment.
pub fn build_dataset(
    observations: &RawTable,
    alerts: &RawTable,
    cfg: &DatasetConfig,
) -> Result<DatasetBuildResult, DatasetError> {
    info!(
        component = "dataset",
        event = "dataset.build.start",
        observation_rows_in = observations.row_count(),
        alert_rows_in = alerts.row_count(),
    );

    let (cleaned_observations, observation_clean_report) =
        clean_table(observations, &cfg.observation_clean)?;
    let (cleaned_alerts, alert_clean_report) = clean_table(alerts, &cfg.alert_clean)?;

    let observation_columns = ObservationColumns {
        datetime: observation_clean_report.datetime_column.clone(),
        precipitation: cfg.precipitation_column.clone(),
        temperature: cfg.temperature_column.clone(),
    };
    let observation_tz = resolve_naive_tz(&cfg.observation_clean)?;
    let alert_tz = resolve_naive_tz(&cfg.alert_clean)?;

    let decoded_observations =
        decode_observations(&cleaned_observations, &observation_columns, observation_tz)?;
    let decoded_alerts = decode_alerts(&cleaned_alerts, &cfg.alert_columns, alert_tz)?;

    let schema = build_dataset_schema(&cfg.enrich);
    let (table, report) = enrich_observations(&decoded_observations, &decoded_alerts, &cfg.enrich)?;

    info!(
        component = "dataset",
        event = "dataset.build.finish",
        output_rows = table.rows.len(),
        column_count = schema.columns.len(),
        schema_fingerprint = %schema.fingerprint,
    );
    Ok(DatasetBuildResult {
        schema,
        table,
        report,
        observation_clean_report,
        alert_clean_report,
    })
}

/// Reads both CSV exports and builds the dataset.
pub fn build_dataset_from_csv(
    observation_path: &Path,
    alert_path: &Path,
    cfg: &DatasetConfig,
) -> Result<DatasetBuildResult, DatasetError> {
    let observations = read_csv_table(observation_path)?;
    let alerts = read_csv_table(alert_path)?;
    build_dataset(&observations, &alerts, cfg)
}

/// Renders the enriched table and writes it as CSV, atomically.
pub fn write_dataset_csv(path: &Path, table: &EnrichedTable) -> Result<(), DatasetError> {
    let raw = RawTable::from_parts(table.headers(), table.render_rows()?)?;
    write_csv_table(path, &raw)?;
    info!(
        component = "dataset",
        event = "dataset.export.finish",
        path = %path.display(),
        rows = raw.row_count(),
    );
    Ok(())
}
