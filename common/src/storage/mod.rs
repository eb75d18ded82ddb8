//! Ordered key/value storage abstraction.
//!
//! This module defines the storage traits shared by every backend:
//!
//! - [`StorageRead`]: point reads and ordered range scans.
//! - [`Storage`]: adds atomic batched writes and snapshots.
//! - [`StorageSnapshot`]: a consistent read-only view of the store.
//! - [`StorageIterator`]: the async iterator yielded by range scans.
//!
//! Keys and values are opaque byte sequences. Backends must iterate keys in
//! lexicographic order; engines built on top encode their sort order into
//! the key bytes.

pub mod config;
pub mod factory;
pub mod in_memory;
pub mod slate;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::util::BytesRange;

/// A key/value pair read from or written to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

impl Record {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// A single operation within an atomic write batch.
///
/// Batches mix puts and deletes; the backend applies the whole batch or
/// none of it.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put(Record),
    Delete(Bytes),
}

impl BatchOp {
    pub fn put(key: Bytes, value: Bytes) -> Self {
        BatchOp::Put(Record::new(key, value))
    }

    pub fn delete(key: Bytes) -> Self {
        BatchOp::Delete(key)
    }
}

/// Options for write operations.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Whether to wait for the write to be durable before returning.
    ///
    /// When `false` (the default), the write returns as soon as it is
    /// visible to readers, providing lower latency at the cost of possible
    /// loss on crash.
    pub await_durable: bool,
}

/// Direction of a range scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanDirection {
    #[default]
    Forward,
    Reverse,
}

/// Errors surfaced by storage backends.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// Backend-reported failure.
    Storage(String),
    /// Invariant violation inside the storage layer.
    Internal(String),
}

impl StorageError {
    pub fn from_storage<E: std::fmt::Display>(err: E) -> Self {
        StorageError::Storage(err.to_string())
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Storage(msg) => write!(f, "storage error: {}", msg),
            StorageError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Async iterator over records in a range scan.
#[async_trait]
pub trait StorageIterator {
    /// Returns the next record, or `None` when the scan is exhausted.
    async fn next(&mut self) -> StorageResult<Option<Record>>;
}

/// Read operations on ordered key/value storage.
#[async_trait]
pub trait StorageRead: Send + Sync {
    /// Retrieves a single record by key. Returns `None` if absent.
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>>;

    /// Retrieves several records in one call.
    ///
    /// The result vector is positionally aligned with `keys`; missing keys
    /// yield `None`. Backends may override this with a batched lookup.
    async fn multi_get(&self, keys: Vec<Bytes>) -> StorageResult<Vec<Option<Record>>> {
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            records.push(self.get(key).await?);
        }
        Ok(records)
    }

    /// Opens a forward scan over the given key range.
    ///
    /// Records are yielded in ascending lexicographic key order.
    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>>;

    /// Opens a scan over the given key range in the requested direction.
    ///
    /// The default implementation materializes the range and reverses it;
    /// backends with native reverse iteration should override it. Callers
    /// are expected to bound the range, as reverse scans on backends
    /// without native support hold the whole range in memory.
    async fn scan_iter_directed(
        &self,
        range: BytesRange,
        direction: ScanDirection,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        match direction {
            ScanDirection::Forward => self.scan_iter(range).await,
            ScanDirection::Reverse => {
                let mut iter = self.scan_iter(range).await?;
                let mut records = Vec::new();
                while let Some(record) = iter.next().await? {
                    records.push(record);
                }
                records.reverse();
                Ok(Box::new(VecIterator::new(records)))
            }
        }
    }
}

/// A consistent read-only view of the store at a point in time.
#[async_trait]
pub trait StorageSnapshot: StorageRead {}

/// Full read/write storage operations.
#[async_trait]
pub trait Storage: StorageRead {
    /// Applies a batch of puts and deletes atomically with default options.
    async fn write_batch(&self, ops: Vec<BatchOp>) -> StorageResult<()> {
        self.write_batch_with_options(ops, WriteOptions::default())
            .await
    }

    /// Applies a batch of puts and deletes atomically.
    ///
    /// Either every operation in the batch becomes visible or none does.
    /// Concurrent batches are serialized by the backend.
    async fn write_batch_with_options(
        &self,
        ops: Vec<BatchOp>,
        options: WriteOptions,
    ) -> StorageResult<()>;

    /// Creates a consistent snapshot for reads.
    async fn snapshot(&self) -> StorageResult<Arc<dyn StorageSnapshot>>;

    /// Flushes buffered writes to durable storage.
    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Closes the backend, releasing its resources.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Iterator over an already-materialized record list.
pub(crate) struct VecIterator {
    records: std::vec::IntoIter<Record>,
}

impl VecIterator {
    pub(crate) fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

#[async_trait]
impl StorageIterator for VecIterator {
    async fn next(&mut self) -> StorageResult<Option<Record>> {
        Ok(self.records.next())
    }
}
