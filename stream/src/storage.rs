//! Stream-specific storage wrappers.
//!
//! [`StreamStorage`] and [`StreamStorageRead`] wrap the underlying storage
//! traits with stream-aware operations: header access, entry point reads,
//! and bounded entry scans. All key construction happens here, so the rest
//! of the crate works in terms of stream names and entry ids.

use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;
use common::{BatchOp, ScanDirection, Storage, StorageRead};

use crate::error::{Error, Result};
use crate::model::{StreamEntry, StreamEntryId};
use crate::serde::{
    decode_entry_values, entry_scan_range, StreamEntryKey, StreamMeta, StreamMetaKey,
};

/// Read-only stream storage operations.
///
/// Works over either the live store or a snapshot, depending on what the
/// caller wraps.
#[derive(Clone)]
pub(crate) struct StreamStorageRead {
    storage: Arc<dyn StorageRead>,
    namespace: Bytes,
}

impl StreamStorageRead {
    pub(crate) fn new(storage: Arc<dyn StorageRead>, namespace: Bytes) -> Self {
        Self { storage, namespace }
    }

    /// Serializes the key for a single entry.
    pub(crate) fn entry_key(&self, stream: &Bytes, id: StreamEntryId) -> Bytes {
        StreamEntryKey::new(stream.clone(), id).serialize(&self.namespace)
    }

    /// Loads a stream's metadata header, or `None` when the stream does not
    /// exist.
    pub(crate) async fn get_meta(&self, stream: &Bytes) -> Result<Option<StreamMeta>> {
        let key = StreamMetaKey::new(stream.clone()).serialize(&self.namespace);
        let record = self.storage.get(key).await?;
        match record {
            Some(r) => Ok(Some(StreamMeta::deserialize(&r.value)?)),
            None => Ok(None),
        }
    }

    /// Loads a single entry's field/value vector.
    pub(crate) async fn get_entry_values(
        &self,
        stream: &Bytes,
        id: StreamEntryId,
    ) -> Result<Option<Vec<Bytes>>> {
        let key = StreamEntryKey::new(stream.clone(), id).serialize(&self.namespace);
        let record = self.storage.get(key).await?;
        match record {
            Some(r) => Ok(Some(decode_entry_values(&r.value)?)),
            None => Ok(None),
        }
    }

    /// Probes which of the given ids have a stored entry.
    ///
    /// The result is positionally aligned with `ids`.
    pub(crate) async fn entries_exist(
        &self,
        stream: &Bytes,
        ids: &[StreamEntryId],
    ) -> Result<Vec<bool>> {
        let keys = ids.iter().map(|&id| self.entry_key(stream, id)).collect();
        let records = self.storage.multi_get(keys).await?;
        Ok(records.into_iter().map(|r| r.is_some()).collect())
    }

    /// Scans entries with ids inside the given bounds.
    ///
    /// Entries are returned in the scan direction's order, capped at
    /// `limit` when provided. A limit of zero yields nothing.
    pub(crate) async fn entries_in(
        &self,
        stream: &Bytes,
        start: Bound<StreamEntryId>,
        end: Bound<StreamEntryId>,
        direction: ScanDirection,
        limit: Option<u64>,
    ) -> Result<Vec<StreamEntry>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        let range = entry_scan_range(&self.namespace, stream, start, end);
        let mut iter = self.storage.scan_iter_directed(range, direction).await?;

        let mut entries = Vec::new();
        while let Some(record) = iter.next().await? {
            let key = StreamEntryKey::deserialize(&record.key, self.namespace.len())?;
            let values = decode_entry_values(&record.value)?;
            entries.push(StreamEntry::new(key.id, values));
            if let Some(limit) = limit {
                if entries.len() as u64 >= limit {
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Scans entry ids in ascending order without decoding values.
    pub(crate) async fn entry_ids_in(
        &self,
        stream: &Bytes,
        start: Bound<StreamEntryId>,
        end: Bound<StreamEntryId>,
        limit: Option<u64>,
    ) -> Result<Vec<StreamEntryId>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        let range = entry_scan_range(&self.namespace, stream, start, end);
        let mut iter = self.storage.scan_iter(range).await?;

        let mut ids = Vec::new();
        while let Some(record) = iter.next().await? {
            let key = StreamEntryKey::deserialize(&record.key, self.namespace.len())?;
            ids.push(key.id);
            if let Some(limit) = limit {
                if ids.len() as u64 >= limit {
                    break;
                }
            }
        }
        Ok(ids)
    }

    /// Counts entries with ids inside the given bounds.
    pub(crate) async fn count_entries(
        &self,
        stream: &Bytes,
        start: Bound<StreamEntryId>,
        end: Bound<StreamEntryId>,
    ) -> Result<u64> {
        let range = entry_scan_range(&self.namespace, stream, start, end);
        let mut iter = self.storage.scan_iter(range).await?;
        let mut count = 0;
        while iter.next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Returns the smallest stored entry, if any.
    pub(crate) async fn first_entry(&self, stream: &Bytes) -> Result<Option<StreamEntry>> {
        let entries = self
            .entries_in(
                stream,
                Bound::Unbounded,
                Bound::Unbounded,
                ScanDirection::Forward,
                Some(1),
            )
            .await?;
        Ok(entries.into_iter().next())
    }

    /// Returns the largest stored id that is at most `hi`, if any.
    ///
    /// Backends are not required to iterate in reverse, so this bisects the
    /// id space with single-entry forward probes instead of scanning back
    /// from `hi`. Each probe is one bounded seek; the number of probes is
    /// capped by the 128-bit id width regardless of stream size.
    pub(crate) async fn max_entry_id_at_most(
        &self,
        stream: &Bytes,
        hi: StreamEntryId,
    ) -> Result<Option<StreamEntryId>> {
        let probe_from = |id: StreamEntryId| {
            self.entry_ids_in(stream, Bound::Included(id), Bound::Included(hi), Some(1))
        };

        let Some(mut best) = probe_from(StreamEntryId::MIN).await?.into_iter().next() else {
            return Ok(None);
        };
        let mut hi_val = hi.as_u128();
        // best is a stored id; any greater stored id lies in (best, hi_val].
        while best.as_u128() < hi_val {
            let lo_val = best.as_u128();
            let mid = StreamEntryId::from_u128(lo_val + (hi_val - lo_val + 1) / 2);
            match probe_from(mid).await?.into_iter().next() {
                Some(id) => best = id,
                None => hi_val = mid.as_u128() - 1,
            }
        }
        Ok(Some(best))
    }

    /// Returns the largest stored entry with an id at most `hi`, if any.
    pub(crate) async fn last_entry(
        &self,
        stream: &Bytes,
        hi: StreamEntryId,
    ) -> Result<Option<StreamEntry>> {
        let Some(id) = self.max_entry_id_at_most(stream, hi).await? else {
            return Ok(None);
        };
        match self.get_entry_values(stream, id).await? {
            Some(values) => Ok(Some(StreamEntry::new(id, values))),
            None => Ok(None),
        }
    }
}

/// Read-write stream storage operations.
#[derive(Clone)]
pub(crate) struct StreamStorage {
    storage: Arc<dyn Storage>,
    namespace: Bytes,
}

impl StreamStorage {
    pub(crate) fn new(storage: Arc<dyn Storage>, namespace: Bytes) -> Self {
        Self { storage, namespace }
    }

    /// Creates stream storage with an in-memory backend.
    #[cfg(test)]
    pub(crate) fn in_memory() -> Self {
        use common::storage::in_memory::InMemoryStorage;
        Self::new(Arc::new(InMemoryStorage::new()), Bytes::from_static(b"test"))
    }

    /// Returns a read view over the live store.
    pub(crate) fn as_read(&self) -> StreamStorageRead {
        StreamStorageRead::new(
            Arc::clone(&self.storage) as Arc<dyn StorageRead>,
            self.namespace.clone(),
        )
    }

    /// Returns a read view over a fresh snapshot.
    pub(crate) async fn snapshot_read(&self) -> Result<StreamStorageRead> {
        let snapshot = self.storage.snapshot().await?;
        Ok(StreamStorageRead::new(
            snapshot as Arc<dyn StorageRead>,
            self.namespace.clone(),
        ))
    }

    /// Serializes the key for a stream's metadata header.
    pub(crate) fn meta_key(&self, stream: &Bytes) -> Bytes {
        StreamMetaKey::new(stream.clone()).serialize(&self.namespace)
    }

    /// Serializes the key for a single entry.
    pub(crate) fn entry_key(&self, stream: &Bytes, id: StreamEntryId) -> Bytes {
        StreamEntryKey::new(stream.clone(), id).serialize(&self.namespace)
    }

    /// Commits a batch of operations atomically.
    pub(crate) async fn commit(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.storage.write_batch(ops).await.map_err(Error::from)
    }
}

/// Test backend without native reverse iteration.
///
/// Forwards every operation to an in-memory store except
/// `scan_iter_directed`, which is deliberately not overridden so reverse
/// scans fall through to the trait's materialize-and-reverse default. Tests
/// use it to cover the code paths a production backend without reverse
/// support takes.
#[cfg(test)]
pub(crate) mod forward_only {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use common::storage::in_memory::InMemoryStorage;
    use common::{
        BatchOp, BytesRange, Record, Storage, StorageIterator, StorageRead, StorageResult,
        StorageSnapshot, WriteOptions,
    };

    #[derive(Default)]
    pub(crate) struct ForwardOnlyStorage {
        inner: InMemoryStorage,
    }

    impl ForwardOnlyStorage {
        pub(crate) fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl StorageRead for ForwardOnlyStorage {
        async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
            self.inner.get(key).await
        }

        async fn scan_iter(
            &self,
            range: BytesRange,
        ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
            self.inner.scan_iter(range).await
        }
    }

    #[async_trait]
    impl Storage for ForwardOnlyStorage {
        async fn write_batch_with_options(
            &self,
            ops: Vec<BatchOp>,
            options: WriteOptions,
        ) -> StorageResult<()> {
            self.inner.write_batch_with_options(ops, options).await
        }

        async fn snapshot(&self) -> StorageResult<Arc<dyn StorageSnapshot>> {
            let inner = self.inner.snapshot().await?;
            Ok(Arc::new(ForwardOnlySnapshot { inner }))
        }
    }

    struct ForwardOnlySnapshot {
        inner: Arc<dyn StorageSnapshot>,
    }

    #[async_trait]
    impl StorageRead for ForwardOnlySnapshot {
        async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
            self.inner.get(key).await
        }

        async fn scan_iter(
            &self,
            range: BytesRange,
        ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
            self.inner.scan_iter(range).await
        }
    }

    #[async_trait]
    impl StorageSnapshot for ForwardOnlySnapshot {}
}
