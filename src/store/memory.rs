use std::sync::RwLock;

use async_trait::async_trait;

use super::{logged_at, CatchLog, UnavailableError};
use crate::models::{CatchRecord, NewCatch};

#[derive(Debug, Default)]
struct Inner {
    last_id: i64,
    records: Vec<CatchRecord>,
}

/// Non-persistent catch log, cleared when the process exits.
#[derive(Debug, Default)]
pub struct MemoryCatchLog {
    inner: RwLock<Inner>,
}

#[async_trait]
impl CatchLog for MemoryCatchLog {
    async fn append(&self, catch: NewCatch) -> Result<CatchRecord, UnavailableError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| UnavailableError::Poisoned)?;

        inner.last_id += 1;
        let record = catch.into_record(inner.last_id, logged_at());
        inner.records.push(record.clone());

        Ok(record)
    }

    async fn all(&self) -> Result<Vec<CatchRecord>, UnavailableError> {
        let inner = self.inner.read().map_err(|_| UnavailableError::Poisoned)?;
        Ok(inner.records.clone())
    }

    async fn count(&self) -> Result<usize, UnavailableError> {
        let inner = self.inner.read().map_err(|_| UnavailableError::Poisoned)?;
        Ok(inner.records.len())
    }
}
