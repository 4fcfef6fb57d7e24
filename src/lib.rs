#![forbid(unsafe_code)]

pub mod analyzer;
pub mod config;
pub mod forecast;
pub mod models;
pub mod routes;
pub mod store;

use std::str::FromStr;

use log::debug;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

pub use crate::{
    analyzer::{Analyze, SpotAnalyzer},
    config::Config,
    forecast::ForecastEngine,
    models::{CatchInput, CatchRecord, ValidationError},
    store::CatchStore,
};

#[derive(Debug, thiserror::Error)]
pub enum OpenDatabaseError {
    #[error("Could not parse database url")]
    ParseUrl(#[source] sqlx::Error),

    #[error("Could not connect to database")]
    Connect(#[source] sqlx::Error),

    #[error("Could not migrate database")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Opens a connection pool on `url` and brings the schema up to date.
pub async fn db_pool(url: &str) -> Result<SqlitePool, OpenDatabaseError> {
    debug!("Opening database connection to {url}");
    let options = SqliteConnectOptions::from_str(url)
        .map_err(OpenDatabaseError::ParseUrl)?
        .journal_mode(SqliteJournalMode::Wal)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .map_err(OpenDatabaseError::Connect)?;

    debug!("Running migrations");
    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}
