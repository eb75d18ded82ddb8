//! Core stream engine with the public operation set.
//!
//! This module provides [`StreamDb`], the entry point for stream storage.
//! It implements the add/range/delete/len/trim/info/set-id/del operation
//! family over an ordered key/value backend.
//!
//! # Atomicity
//!
//! Every mutation commits exactly one backend batch containing the entry
//! changes and the rewritten metadata header, so readers never observe a
//! header that disagrees with the entry set. Queries read the header and
//! the entries through one storage snapshot for the same reason.
//!
//! # Concurrency
//!
//! The engine keeps no state between calls beyond the backend itself.
//! Mutations serialize on an internal lock across their read-plan-commit
//! cycle; queries bypass the lock entirely and rely on snapshot isolation.

use std::collections::HashSet;
use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;
use common::clock::{Clock, SystemClock};
use common::storage::factory::create_storage;
use common::{BatchOp, ScanDirection, Storage};
use tokio::sync::Mutex;

use crate::config::{AddOptions, Config, LenOptions, RangeOptions, TrimOptions};
use crate::error::{Error, Result};
use crate::model::{NextEntryId, StreamEntry, StreamEntryId, StreamInfo};
use crate::serde::{encode_entry_values, StreamMeta};
use crate::storage::StreamStorage;
use crate::trim::plan_trim;

/// The stream storage engine.
///
/// `StreamDb` is designed to be shared across tasks: all methods take
/// `&self`, and mutations are internally serialized. Two instances over
/// the same backend and namespace must not run mutations concurrently.
///
/// # Example
///
/// ```ignore
/// use stream::{AddOptions, RangeOptions, StreamDb};
/// use bytes::Bytes;
///
/// let db = StreamDb::open(config).await?;
/// let id = db
///     .add(
///         Bytes::from("events"),
///         AddOptions::default(),
///         vec![Bytes::from("type"), Bytes::from("created")],
///     )
///     .await?;
/// let entries = db.range(Bytes::from("events"), RangeOptions::default()).await?;
/// assert_eq!(entries[0].id, id);
/// ```
pub struct StreamDb {
    storage: StreamStorage,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl StreamDb {
    /// Opens a stream engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend cannot be initialized.
    pub async fn open(config: Config) -> Result<Self> {
        let storage = create_storage(&config.storage).await?;
        Ok(Self::new(
            storage,
            Bytes::from(config.namespace.into_bytes()),
        ))
    }

    /// Creates a stream engine over an existing storage backend.
    ///
    /// All keys written by the engine carry the given namespace prefix;
    /// the engine assumes exclusive ownership of that key space.
    pub fn new(storage: Arc<dyn Storage>, namespace: Bytes) -> Self {
        Self::with_clock(storage, namespace, Arc::new(SystemClock))
    }

    /// Creates a stream engine with an explicit clock.
    ///
    /// Auto-generated entry ids derive their millisecond component from
    /// this clock.
    pub fn with_clock(storage: Arc<dyn Storage>, namespace: Bytes, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage: StreamStorage::new(storage, namespace),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Appends an entry to a stream, creating the stream when needed.
    ///
    /// The entry id is resolved from `options.entry_id` against the
    /// stream's `last_generated_id`; ids must be strictly increasing. When
    /// `options.trim` carries a strategy, the trim is applied in the same
    /// atomic batch and may remove the entry being added. The header's
    /// `last_generated_id` and `entries_added` reflect the add regardless.
    ///
    /// Returns the id assigned to the entry.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] with `nomkstream` on a missing stream.
    /// - [`Error::InvalidEntryId`] for an explicit `0-0`.
    /// - [`Error::IdNotMonotonic`], [`Error::SeqOverflow`],
    ///   [`Error::Overflow`] per the id resolution rules.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn add(
        &self,
        stream: Bytes,
        options: AddOptions,
        values: Vec<Bytes>,
    ) -> Result<StreamEntryId> {
        let _guard = self.write_lock.lock().await;
        let reader = self.storage.as_read();

        let existing = reader.get_meta(&stream).await?;
        if existing.is_none() && options.nomkstream {
            return Err(Error::NotFound);
        }
        let mut meta = existing.unwrap_or_default();
        let was_empty = meta.size == 0;

        let next = options.entry_id.unwrap_or(NextEntryId::Auto);
        let new_id = resolve_entry_id(next, &meta, self.clock.now_ms())?;

        meta.last_generated_id = new_id;
        meta.entries_added += 1;
        meta.size += 1;
        if was_empty {
            meta.recorded_first_entry_id = new_id;
        }

        let mut ops = Vec::new();
        let outcome = plan_trim(
            &reader,
            &stream,
            meta.size,
            &options.trim,
            Some(new_id),
            &mut ops,
        )
        .await?;
        if !outcome.deleted_pending {
            ops.push(BatchOp::put(
                self.storage.entry_key(&stream, new_id),
                encode_entry_values(&values),
            ));
        }
        if outcome.deleted > 0 {
            meta.size -= outcome.deleted;
            if let Some(max) = outcome.max_deleted_id {
                meta.max_deleted_entry_id = meta.max_deleted_entry_id.max(max);
            }
            meta.recorded_first_entry_id = outcome.first_remaining.unwrap_or(StreamEntryId::MIN);
        }
        ops.push(BatchOp::put(
            self.storage.meta_key(&stream),
            meta.serialize(),
        ));
        self.storage.commit(ops).await?;
        Ok(new_id)
    }

    /// Returns stored entries with ids within the requested interval.
    ///
    /// Forward queries return ids in `[start, end]` ascending; reverse
    /// queries return ids in `[end, start]` descending. Exclusions tighten
    /// the corresponding endpoint. A missing stream yields an empty result.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRange`] when an exclusion is combined with the
    /// sentinel it cannot move past (`start = MAX`, `end = MIN`).
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn range(&self, stream: Bytes, options: RangeOptions) -> Result<Vec<StreamEntry>> {
        if options.exclude_start && options.start == StreamEntryId::MAX {
            return Err(Error::InvalidRange(
                "cannot exclude the maximum entry id as range start".to_string(),
            ));
        }
        if options.exclude_end && options.end == StreamEntryId::MIN {
            return Err(Error::InvalidRange(
                "cannot exclude the minimum entry id as range end".to_string(),
            ));
        }
        if options.with_count && options.count == 0 {
            return Ok(Vec::new());
        }
        if options.start == options.end {
            if options.exclude_start || options.exclude_end {
                return Ok(Vec::new());
            }
        } else if options.reverse != (options.start > options.end) {
            // Inverted interval for the requested direction.
            return Ok(Vec::new());
        }

        let (lo, lo_excluded, hi, hi_excluded, direction) = if options.reverse {
            (
                options.end,
                options.exclude_end,
                options.start,
                options.exclude_start,
                ScanDirection::Reverse,
            )
        } else {
            (
                options.start,
                options.exclude_start,
                options.end,
                options.exclude_end,
                ScanDirection::Forward,
            )
        };
        let start = if lo_excluded {
            Bound::Excluded(lo)
        } else {
            Bound::Included(lo)
        };
        let end = if hi_excluded {
            Bound::Excluded(hi)
        } else {
            Bound::Included(hi)
        };
        let limit = options.with_count.then_some(options.count);

        let reader = self.storage.snapshot_read().await?;
        reader.entries_in(&stream, start, end, direction, limit).await
    }

    /// Deletes the given entries, returning how many existed.
    ///
    /// Ids without a stored entry are ignored; duplicates in the input
    /// count once. A missing stream yields zero. The header's size,
    /// `max_deleted_entry_id`, and `recorded_first_entry_id` are updated in
    /// the same batch as the deletions.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn delete_entries(&self, stream: Bytes, ids: &[StreamEntryId]) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let reader = self.storage.as_read();
        let Some(mut meta) = reader.get_meta(&stream).await? else {
            return Ok(0);
        };

        let present = reader.entries_exist(&stream, ids).await?;
        let mut ops = Vec::new();
        let mut staged: HashSet<StreamEntryId> = HashSet::new();
        let mut max_deleted: Option<StreamEntryId> = None;
        for (&id, present) in ids.iter().zip(present) {
            if present && staged.insert(id) {
                ops.push(BatchOp::delete(self.storage.entry_key(&stream, id)));
                max_deleted = Some(max_deleted.map_or(id, |m| m.max(id)));
            }
        }
        let deleted = staged.len() as u64;
        if deleted == 0 {
            return Ok(0);
        }

        meta.size -= deleted;
        if let Some(max) = max_deleted {
            meta.max_deleted_entry_id = meta.max_deleted_entry_id.max(max);
        }
        if meta.size == 0 {
            meta.recorded_first_entry_id = StreamEntryId::MIN;
        } else if staged.contains(&meta.recorded_first_entry_id) {
            // The smallest survivor is among the first deleted+1 stored ids.
            let candidates = reader
                .entry_ids_in(&stream, Bound::Unbounded, Bound::Unbounded, Some(deleted + 1))
                .await?;
            if let Some(first) = candidates.into_iter().find(|id| !staged.contains(id)) {
                meta.recorded_first_entry_id = first;
            }
        }
        ops.push(BatchOp::put(
            self.storage.meta_key(&stream),
            meta.serialize(),
        ));
        self.storage.commit(ops).await?;
        Ok(deleted)
    }

    /// Returns the number of stored entries.
    ///
    /// With [`LenOptions::entry_id`] set, counts the entries strictly
    /// greater than the given id, or strictly less when
    /// [`LenOptions::to_first`] is set. The id itself is never counted.
    /// A missing stream yields zero.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn len(&self, stream: Bytes, options: LenOptions) -> Result<u64> {
        let reader = self.storage.snapshot_read().await?;
        let Some(meta) = reader.get_meta(&stream).await? else {
            return Ok(0);
        };
        match options.entry_id {
            None => Ok(meta.size),
            Some(id) => {
                if options.to_first {
                    reader
                        .count_entries(&stream, Bound::Unbounded, Bound::Excluded(id))
                        .await
                } else {
                    reader
                        .count_entries(&stream, Bound::Excluded(id), Bound::Unbounded)
                        .await
                }
            }
        }
    }

    /// Trims the stream per the configured strategy, returning the number
    /// of entries removed.
    ///
    /// An unset strategy and a missing stream are both no-ops.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn trim(&self, stream: Bytes, options: TrimOptions) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let reader = self.storage.as_read();
        let Some(mut meta) = reader.get_meta(&stream).await? else {
            return Ok(0);
        };

        let mut ops = Vec::new();
        let outcome = plan_trim(&reader, &stream, meta.size, &options, None, &mut ops).await?;
        if outcome.deleted == 0 {
            return Ok(0);
        }

        meta.size -= outcome.deleted;
        if let Some(max) = outcome.max_deleted_id {
            meta.max_deleted_entry_id = meta.max_deleted_entry_id.max(max);
        }
        meta.recorded_first_entry_id = outcome.first_remaining.unwrap_or(StreamEntryId::MIN);
        ops.push(BatchOp::put(
            self.storage.meta_key(&stream),
            meta.serialize(),
        ));
        self.storage.commit(ops).await?;
        Ok(outcome.deleted)
    }

    /// Returns the stream's header fields plus boundary entries.
    ///
    /// Non-full queries resolve the smallest and largest stored entries
    /// when the stream is non-empty. Full queries instead return up to
    /// `count` forward-ordered entries (zero meaning no cap) and leave the
    /// boundary entries unset.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the stream does not exist.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn get_stream_info(&self, stream: Bytes, full: bool, count: u64) -> Result<StreamInfo> {
        let reader = self.storage.snapshot_read().await?;
        let Some(meta) = reader.get_meta(&stream).await? else {
            return Err(Error::NotFound);
        };

        let mut info = StreamInfo {
            size: meta.size,
            last_generated_id: meta.last_generated_id,
            max_deleted_entry_id: meta.max_deleted_entry_id,
            entries_added: meta.entries_added,
            recorded_first_entry_id: meta.recorded_first_entry_id,
            ..StreamInfo::default()
        };
        if full {
            let limit = (count > 0).then_some(count);
            info.entries = reader
                .entries_in(
                    &stream,
                    Bound::Unbounded,
                    Bound::Unbounded,
                    ScanDirection::Forward,
                    limit,
                )
                .await?;
        } else if meta.size > 0 {
            info.first_entry = reader.first_entry(&stream).await?;
            // Stored ids never exceed last_generated_id, which bounds the
            // boundary lookup without a reverse scan.
            info.last_entry = reader.last_entry(&stream, meta.last_generated_id).await?;
        }
        Ok(info)
    }

    /// Overwrites the stream's id bookkeeping.
    ///
    /// On a missing stream, creates an empty stream with the supplied
    /// header; both `entries_added` and `max_deleted_id` are then
    /// mandatory. On an existing stream, `last_id` must not be below any
    /// stored entry's id, `entries_added` must cover the current size, and
    /// `max_deleted_id` must not exceed `last_id`. A `max_deleted_id` of
    /// `0-0` leaves the stored value unchanged; any other value is stored
    /// verbatim, including values below the current maximum.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn set_id(
        &self,
        stream: Bytes,
        last_id: StreamEntryId,
        entries_added: Option<u64>,
        max_deleted_id: Option<StreamEntryId>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let reader = self.storage.as_read();

        let meta = match reader.get_meta(&stream).await? {
            None => {
                let (Some(entries_added), Some(max_deleted_id)) = (entries_added, max_deleted_id)
                else {
                    return Err(Error::InvalidArguments(
                        "creating a stream requires both entries-added and max-deleted-id"
                            .to_string(),
                    ));
                };
                if max_deleted_id > last_id {
                    return Err(Error::InvalidArguments(
                        "max-deleted-id must not exceed last-id".to_string(),
                    ));
                }
                StreamMeta {
                    size: 0,
                    last_generated_id: last_id,
                    max_deleted_entry_id: max_deleted_id,
                    entries_added,
                    recorded_first_entry_id: StreamEntryId::MIN,
                }
            }
            Some(mut meta) => {
                if meta.size > 0 {
                    let max_stored = reader
                        .max_entry_id_at_most(&stream, meta.last_generated_id)
                        .await?;
                    if let Some(max_stored) = max_stored {
                        if last_id < max_stored {
                            return Err(Error::IdTooSmall);
                        }
                    }
                }
                if let Some(added) = entries_added {
                    if added < meta.size {
                        return Err(Error::InvalidArguments(
                            "entries-added must be at least the stream size".to_string(),
                        ));
                    }
                    meta.entries_added = added;
                }
                if let Some(max_deleted) = max_deleted_id {
                    if max_deleted != StreamEntryId::MIN {
                        if max_deleted > last_id {
                            return Err(Error::InvalidArguments(
                                "max-deleted-id must not exceed last-id".to_string(),
                            ));
                        }
                        meta.max_deleted_entry_id = max_deleted;
                    }
                }
                meta.last_generated_id = last_id;
                meta
            }
        };

        self.storage
            .commit(vec![BatchOp::put(
                self.storage.meta_key(&stream),
                meta.serialize(),
            )])
            .await
    }

    /// Destroys the stream, removing its header and every entry.
    ///
    /// Returns whether the stream existed.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn del(&self, stream: Bytes) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let reader = self.storage.as_read();
        if reader.get_meta(&stream).await?.is_none() {
            return Ok(false);
        }

        let ids = reader
            .entry_ids_in(&stream, Bound::Unbounded, Bound::Unbounded, None)
            .await?;
        let mut ops: Vec<BatchOp> = ids
            .into_iter()
            .map(|id| BatchOp::delete(self.storage.entry_key(&stream, id)))
            .collect();
        ops.push(BatchOp::delete(self.storage.meta_key(&stream)));
        self.storage.commit(ops).await?;
        Ok(true)
    }
}

/// Resolves an incoming entry id against the stream header.
fn resolve_entry_id(next: NextEntryId, meta: &StreamMeta, now_ms: u64) -> Result<StreamEntryId> {
    let last = meta.last_generated_id;
    match next {
        NextEntryId::Explicit { ms, seq } => {
            let id = StreamEntryId::new(ms, seq);
            if id == StreamEntryId::MIN {
                return Err(Error::InvalidEntryId(
                    "the entry id 0-0 is reserved".to_string(),
                ));
            }
            if (meta.size > 0 || last != StreamEntryId::MIN) && id <= last {
                return Err(Error::IdNotMonotonic);
            }
            Ok(id)
        }
        NextEntryId::MsOnly { ms } => resolve_ms_only(ms, last),
        NextEntryId::Auto => {
            if now_ms > last.ms {
                Ok(StreamEntryId::new(now_ms, 0))
            } else if last == StreamEntryId::MAX {
                Err(Error::Overflow)
            } else {
                resolve_ms_only(last.ms, last)
            }
        }
    }
}

fn resolve_ms_only(ms: u64, last: StreamEntryId) -> Result<StreamEntryId> {
    if ms > last.ms {
        Ok(StreamEntryId::new(ms, 0))
    } else if ms == last.ms {
        if last.seq == u64::MAX {
            Err(Error::SeqOverflow)
        } else {
            Ok(StreamEntryId::new(ms, last.seq + 1))
        }
    } else {
        Err(Error::IdNotMonotonic)
    }
}
