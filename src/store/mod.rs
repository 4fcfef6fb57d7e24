//! The append-only catch log.
//!
//! [`CatchStore`] validates input and delegates persistence to a
//! [`CatchLog`] backend. Each backend assigns the id and appends the record
//! as a single step, so concurrent callers never share an id and readers
//! never see a half-written record.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};

pub use self::{memory::MemoryCatchLog, sqlite::SqliteCatchLog};
use crate::{
    db_pool,
    models::{CatchInput, CatchRecord, NewCatch, ValidationError},
    OpenDatabaseError,
};

/// Value of `DATABASE_URL` selecting the non-persistent backend.
pub const MEMORY_URL: &str = "memory";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Catch log is unavailable")]
    Unavailable(#[from] UnavailableError),
}

#[derive(Debug, thiserror::Error)]
pub enum UnavailableError {
    #[error("Could not insert catch")]
    Insert(#[source] sqlx::Error),

    #[error("Could not query catches")]
    Query(#[source] sqlx::Error),

    #[error("Could not count catches")]
    Count(#[source] sqlx::Error),

    #[error("Catch log lock was poisoned")]
    Poisoned,
}

/// Storage backend of a [`CatchStore`].
#[async_trait]
pub trait CatchLog: Send + Sync {
    /// Assigns the next id to `catch`, stamps it and appends it.
    async fn append(&self, catch: NewCatch) -> Result<CatchRecord, UnavailableError>;

    /// Every record, in insertion order.
    async fn all(&self) -> Result<Vec<CatchRecord>, UnavailableError>;

    async fn count(&self) -> Result<usize, UnavailableError>;
}

/// Insertion timestamp, truncated to what every backend stores losslessly.
pub(crate) fn logged_at() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub struct CatchStore {
    log: Box<dyn CatchLog>,
}

impl CatchStore {
    pub fn new(log: impl CatchLog + 'static) -> Self {
        Self { log: Box::new(log) }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryCatchLog::default())
    }

    /// Opens the store described by `url`: [`MEMORY_URL`] for a
    /// non-persistent log, anything else as a SQLite url.
    pub async fn open(url: &str) -> Result<Self, OpenDatabaseError> {
        if url == MEMORY_URL {
            return Ok(Self::in_memory());
        }

        let pool = db_pool(url).await?;
        Ok(Self::new(SqliteCatchLog::new(pool)))
    }

    /// Validates `entry` and appends it, returning the stored record.
    ///
    /// Nothing is written when validation fails.
    pub async fn add(&self, entry: CatchInput) -> Result<CatchRecord, Error> {
        let catch = NewCatch::try_from(entry)?;
        Ok(self.log.append(catch).await?)
    }

    pub async fn all(&self) -> Result<Vec<CatchRecord>, Error> {
        Ok(self.log.all().await?)
    }

    pub async fn count(&self) -> Result<usize, Error> {
        Ok(self.log.count().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;

    pub(super) fn entry(species: &str) -> CatchInput {
        CatchInput {
            species: Some(species.into()),
            bait: Some("Worm".into()),
            location: Some("Pond A".into()),
            date: Some("2024-05-01".into()),
            time: Some("07:00".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn add_then_all_ends_with_the_returned_record() {
        let store = CatchStore::in_memory();
        store.add(entry("Perch")).await.unwrap();

        let record = store.add(entry("Bass")).await.unwrap();
        let all = store.all().await.unwrap();

        assert_eq!(all.last(), Some(&record));
    }

    #[tokio::test]
    async fn first_catch_gets_id_one() {
        let store = CatchStore::in_memory();
        let record = store.add(entry("Bass")).await.unwrap();

        assert_eq!(record.id, 1);
        assert_eq!(record.species, "Bass");
        assert!(record.logged_at <= Utc::now());
        assert_eq!(store.all().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn keeps_insertion_order() {
        let store = CatchStore::in_memory();
        let first = store.add(entry("Bass")).await.unwrap();
        let second = store.add(entry("Pike")).await.unwrap();

        let all = store.all().await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(all, vec![first, second]);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn invalid_catch_leaves_the_log_unchanged() {
        let store = CatchStore::in_memory();
        store.add(entry("Bass")).await.unwrap();
        let before = store.all().await.unwrap();

        let err = store.add(entry("")).await.unwrap_err();

        assert!(matches!(err, Error::Validation(ValidationError { field: "species", .. })));
        assert_eq!(store.all().await.unwrap(), before);

        let next = store.add(entry("Pike")).await.unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn empty_store_lists_nothing() {
        let store = CatchStore::in_memory();
        assert!(store.all().await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_get_distinct_ids() {
        const N: usize = 64;
        let store = Arc::new(CatchStore::in_memory());

        let tasks: Vec<_> = (0..N)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.add(entry(&format!("Fish {i}"))).await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let all = store.all().await.unwrap();
        let ids: HashSet<_> = all.iter().map(|record| record.id).collect();

        assert_eq!(all.len(), N);
        assert_eq!(ids.len(), N);
        assert!(all.windows(2).all(|pair| pair[0].id < pair[1].id));
    }
}
