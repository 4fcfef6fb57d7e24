use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use super::{logged_at, CatchLog, UnavailableError};
use crate::models::{CatchRecord, NewCatch};

/// Durable catch log backed by the `catches` table.
///
/// Ids come from `AUTOINCREMENT`, so SQLite never hands out an id twice even
/// after a failed insert. Appends are serialized by `append_lock`; reads go
/// straight to the pool.
#[derive(Debug)]
pub struct SqliteCatchLog {
    pool: SqlitePool,
    append_lock: Mutex<()>,
}

impl SqliteCatchLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            append_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl CatchLog for SqliteCatchLog {
    async fn append(&self, catch: NewCatch) -> Result<CatchRecord, UnavailableError> {
        let _guard = self.append_lock.lock().await;
        let logged_at = logged_at();

        let id = sqlx::query(
            r#"
            INSERT INTO catches
                (species, bait, location, catch_date, catch_time, notes, weight, length, weather, logged_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&catch.species)
        .bind(&catch.bait)
        .bind(&catch.location)
        .bind(catch.date)
        .bind(catch.time)
        .bind(&catch.notes)
        .bind(catch.weight)
        .bind(catch.length)
        .bind(&catch.weather)
        .bind(logged_at)
        .execute(&self.pool)
        .await
        .map_err(UnavailableError::Insert)?
        .last_insert_rowid();

        Ok(catch.into_record(id, logged_at))
    }

    async fn all(&self) -> Result<Vec<CatchRecord>, UnavailableError> {
        sqlx::query_as::<_, CatchRecord>("SELECT * FROM catches ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(UnavailableError::Query)
    }

    async fn count(&self) -> Result<usize, UnavailableError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM catches")
            .fetch_one(&self.pool)
            .await
            .map_err(UnavailableError::Count)?;

        Ok(count as usize)
    }
}
