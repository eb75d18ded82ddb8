//! In-memory storage backend.
//!
//! An ordered map behind a lock, used by tests and local development. Scans
//! materialize the requested range at open time, which gives every scan
//! snapshot semantics over a single lock acquisition.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    BatchOp, Record, ScanDirection, Storage, StorageError, StorageIterator, StorageRead,
    StorageResult, StorageSnapshot, VecIterator, WriteOptions,
};
use crate::util::BytesRange;

/// BTreeMap-backed implementation of the [`Storage`] trait.
#[derive(Default)]
pub struct InMemoryStorage {
    data: Arc<RwLock<BTreeMap<Bytes, Bytes>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn collect_range(
    data: &BTreeMap<Bytes, Bytes>,
    range: &BytesRange,
    direction: ScanDirection,
) -> Vec<Record> {
    let iter = data
        .range((range.start.clone(), range.end.clone()))
        .map(|(k, v)| Record::new(k.clone(), v.clone()));
    match direction {
        ScanDirection::Forward => iter.collect(),
        ScanDirection::Reverse => iter.rev().collect(),
    }
}

fn poisoned<T>(_err: T) -> StorageError {
    StorageError::Internal("storage lock poisoned".to_string())
}

#[async_trait]
impl StorageRead for InMemoryStorage {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(&key).map(|v| Record::new(key, v.clone())))
    }

    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        self.scan_iter_directed(range, ScanDirection::Forward)
            .await
    }

    async fn scan_iter_directed(
        &self,
        range: BytesRange,
        direction: ScanDirection,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(Box::new(VecIterator::new(collect_range(
            &data, &range, direction,
        ))))
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn write_batch_with_options(
        &self,
        ops: Vec<BatchOp>,
        _options: WriteOptions,
    ) -> StorageResult<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        for op in ops {
            match op {
                BatchOp::Put(record) => {
                    data.insert(record.key, record.value);
                }
                BatchOp::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn snapshot(&self) -> StorageResult<Arc<dyn StorageSnapshot>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(Arc::new(InMemorySnapshot { data: data.clone() }))
    }
}

/// Point-in-time copy of the map contents.
pub struct InMemorySnapshot {
    data: BTreeMap<Bytes, Bytes>,
}

#[async_trait]
impl StorageRead for InMemorySnapshot {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        Ok(self.data.get(&key).map(|v| Record::new(key, v.clone())))
    }

    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        self.scan_iter_directed(range, ScanDirection::Forward)
            .await
    }

    async fn scan_iter_directed(
        &self,
        range: BytesRange,
        direction: ScanDirection,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        Ok(Box::new(VecIterator::new(collect_range(
            &self.data, &range, direction,
        ))))
    }
}

#[async_trait]
impl StorageSnapshot for InMemorySnapshot {}
