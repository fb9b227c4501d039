mod build;
mod config;
mod step;

pub use build::BuildRecord;
pub use config::{BuildConfigRecord, PlatformRecord};
pub use step::{LogRecord, ReportRecord, StepRecord};

use crate::config::CONFIG;
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::SqlitePool;

pub type Database = SqlitePool;

/// connects to the local sqlite database and brings its schema up to date
pub async fn connect() -> Result<Database> {
    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(&CONFIG.database_path)
            .foreign_keys(true)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal),
    )
    .await
    .context("failed to connect to database")?;

    sqlx::migrate!("./migrations").run(&pool).await.context("failed to migrate database")?;

    Ok(pool)
}

/// converts a stored row into its domain type and back; rows that embed a
/// JSON column (rules, slave_info, errors, lines, items) go through this so
/// the conversion failure mode lives in one place per entity
pub(crate) trait DatabaseConversion<T> {
    fn create_record(&self) -> Result<T>;
    fn from_record(record: T) -> Result<Self>
    where
        Self: Sized;
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to serialize column to json")
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_str(value).context("failed to deserialize column from json")
}
