//! SlateDB-backed storage.
//!
//! SlateDB is an embedded LSM key-value store built on object storage. It
//! provides ordered iteration, atomic batch writes, and snapshot reads,
//! which is exactly the contract the [`Storage`] trait expects.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use slatedb::config::WriteOptions as SlateDbWriteOptions;
use slatedb::{Db, DbIterator, DbRead, WriteBatch};

use super::{
    BatchOp, Record, Storage, StorageError, StorageIterator, StorageRead, StorageResult,
    StorageSnapshot, WriteOptions,
};
use crate::util::BytesRange;

/// SlateDB implementation of the [`Storage`] trait.
pub struct SlateDbStorage {
    db: Arc<Db>,
}

impl SlateDbStorage {
    /// Creates a new storage instance wrapping the given SlateDB database.
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StorageRead for SlateDbStorage {
    /// Retrieves a single record by key from SlateDB.
    ///
    /// Returns `None` if the key does not exist.
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        let value = self
            .db
            .get(&key)
            .await
            .map_err(StorageError::from_storage)?;
        Ok(value.map(|v| Record::new(key, v)))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let iter = self
            .db
            .scan(range)
            .await
            .map_err(StorageError::from_storage)?;
        Ok(Box::new(SlateDbIterator { iter }))
    }
}

struct SlateDbIterator<'a> {
    iter: DbIterator<'a>,
}

#[async_trait]
impl StorageIterator for SlateDbIterator<'_> {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn next(&mut self) -> StorageResult<Option<Record>> {
        match self.iter.next().await.map_err(StorageError::from_storage)? {
            Some(entry) => Ok(Some(Record::new(entry.key, entry.value))),
            None => Ok(None),
        }
    }
}

/// SlateDB snapshot wrapper that implements [`StorageSnapshot`].
///
/// Provides a consistent read-only view of the database at the time the
/// snapshot was created.
pub struct SlateDbStorageSnapshot<S> {
    snapshot: Arc<S>,
}

#[async_trait]
impl<S: DbRead + Send + Sync + 'static> StorageRead for SlateDbStorageSnapshot<S> {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        let value = self
            .snapshot
            .get(&key)
            .await
            .map_err(StorageError::from_storage)?;
        Ok(value.map(|v| Record::new(key, v)))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let iter = self
            .snapshot
            .scan(range)
            .await
            .map_err(StorageError::from_storage)?;
        Ok(Box::new(SlateDbIterator { iter }))
    }
}

#[async_trait]
impl<S: DbRead + Send + Sync + 'static> StorageSnapshot for SlateDbStorageSnapshot<S> {}

#[async_trait]
impl Storage for SlateDbStorage {
    /// Applies the batch through SlateDB's write API.
    ///
    /// Puts and deletes are staged into a single `WriteBatch`, so the whole
    /// batch commits atomically.
    async fn write_batch_with_options(
        &self,
        ops: Vec<BatchOp>,
        options: WriteOptions,
    ) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        for op in ops {
            match op {
                BatchOp::Put(record) => batch.put(record.key, record.value),
                BatchOp::Delete(key) => batch.delete(key),
            }
        }
        let slate_options = SlateDbWriteOptions {
            await_durable: options.await_durable,
        };
        self.db
            .write_with_options(batch, &slate_options)
            .await
            .map_err(StorageError::from_storage)?;
        Ok(())
    }

    async fn snapshot(&self) -> StorageResult<Arc<dyn StorageSnapshot>> {
        let snapshot = self
            .db
            .snapshot()
            .await
            .map_err(StorageError::from_storage)?;
        Ok(Arc::new(SlateDbStorageSnapshot { snapshot }))
    }

    async fn flush(&self) -> StorageResult<()> {
        self.db.flush().await.map_err(StorageError::from_storage)?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.db.close().await.map_err(StorageError::from_storage)?;
        Ok(())
    }
}
