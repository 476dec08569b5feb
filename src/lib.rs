//! meteoset core crate.
//!
//! Builds the dense weather-phenomena training table out of two
//! Météo-France exports:
//! - hourly station observations (precipitation, temperature)
//! - vigilance alert intervals, one severity-tagged time span per row
//!
//! Both exports are cleaned (study date range, single department,
//! metadata columns dropped), decoded into typed rows with UTC
//! millisecond timestamps, and joined in time: for every hourly
//! observation and every phenomenon category the engine resolves the
//! covering alert's vigilance level, falling back to level 1 when no
//! alert is active. The output keeps exactly one row per observation
//! and is rendered with canonical `YYYY-MM-DD HH:MM:SS` datetimes for
//! the downstream delay-prediction trainer.

mod alert_index;
mod clean;
mod enrich;
mod observability;
mod pipeline;
mod table;
mod timestamp;

pub use alert_index::{AlertIndex, AlertIndexError, AlertSpan, BoundaryPolicy};
pub use clean::{
    clean_table, detect_datetime_column, detect_department_column, resolve_naive_tz, CleanConfig,
    CleanError, CleanReport, DEFAULT_DATE_END_TS_MS_UTC, DEFAULT_DATE_START_TS_MS_UTC,
    DEFAULT_DEPARTMENT,
};
pub use enrich::{
    assert_schema_compatible, build_dataset_schema, enrich_observations, AlertInterval,
    CategoryEnrichStats, ColumnDType, DatasetColumn, DatasetSchema, EnrichConfig, EnrichError,
    EnrichReport, EnrichedRow, EnrichedTable, Observation, DATASET_SCHEMA_VERSION,
};
pub use observability::{
    init_logging, logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    build_dataset, build_dataset_from_csv, load_dataset_config, write_dataset_csv,
    DatasetBuildResult, DatasetConfig, DatasetError,
};
pub use table::{
    decode_alerts, decode_observations, read_csv_table, read_csv_table_from_reader,
    write_csv_table, AlertColumns, ObservationColumns, RawTable, TableError,
};
pub use timestamp::{
    format_datetime_second, parse_utc_timestamp, utc_from_ts_ms, TimestampError,
    DATETIME_SECOND_FORMAT,
};
