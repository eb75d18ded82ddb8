//! Trim planning shared by explicit trims and trim-on-add.
//!
//! A trim never commits anything itself. It stages entry deletions into the
//! caller's batch and reports what changed, so the caller can fold the
//! outcome into the header update and commit everything in one atomic
//! write. Trim-on-add passes the id of the entry staged in the same batch
//! as `pending`; the planner treats it as the largest entry of the stream
//! and may decide it has to go as well.

use bytes::Bytes;
use common::BatchOp;
use std::ops::Bound;

use crate::config::{TrimOptions, TrimStrategy};
use crate::error::Result;
use crate::model::StreamEntryId;
use crate::storage::StreamStorageRead;

/// What a trim decided to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct TrimOutcome {
    /// Number of entries removed, including a removed pending entry.
    pub deleted: u64,
    /// The largest removed id, when anything was removed.
    pub max_deleted_id: Option<StreamEntryId>,
    /// The smallest id left in the stream after the trim, counting the
    /// pending entry. Meaningful only when `deleted > 0`.
    pub first_remaining: Option<StreamEntryId>,
    /// Whether the pending entry itself was trimmed away.
    pub deleted_pending: bool,
}

/// Stages the deletions required by `options` into `ops`.
///
/// `size` is the stream's entry count including the pending entry, and the
/// pending id (when present) must be strictly greater than every stored id,
/// which add guarantees through id monotonicity.
pub(crate) async fn plan_trim(
    reader: &StreamStorageRead,
    stream: &Bytes,
    size: u64,
    options: &TrimOptions,
    pending: Option<StreamEntryId>,
    ops: &mut Vec<BatchOp>,
) -> Result<TrimOutcome> {
    match options.strategy {
        TrimStrategy::None => Ok(TrimOutcome::default()),
        TrimStrategy::MaxLen(keep) => plan_max_len(reader, stream, size, keep, pending, ops).await,
        TrimStrategy::MinId(min_id) => plan_min_id(reader, stream, min_id, pending, ops).await,
    }
}

async fn plan_max_len(
    reader: &StreamStorageRead,
    stream: &Bytes,
    size: u64,
    keep: u64,
    pending: Option<StreamEntryId>,
    ops: &mut Vec<BatchOp>,
) -> Result<TrimOutcome> {
    if size <= keep {
        return Ok(TrimOutcome::default());
    }
    let to_delete = size - keep;

    // One extra id beyond the doomed prefix tells us the new first entry.
    let ids = reader
        .entry_ids_in(stream, Bound::Unbounded, Bound::Unbounded, Some(to_delete + 1))
        .await?;
    let mut ids = ids.into_iter();

    let mut outcome = TrimOutcome::default();
    while outcome.deleted < to_delete {
        let Some(id) = ids.next() else {
            break;
        };
        ops.push(BatchOp::delete(reader.entry_key(stream, id)));
        outcome.max_deleted_id = Some(id);
        outcome.deleted += 1;
    }

    if outcome.deleted < to_delete {
        // Stored entries are exhausted; the pending entry is the surplus.
        if let Some(pending_id) = pending {
            outcome.deleted_pending = true;
            outcome.max_deleted_id = Some(pending_id);
            outcome.deleted += 1;
        }
    }

    outcome.first_remaining = if outcome.deleted_pending {
        None
    } else {
        ids.next().or(pending)
    };
    Ok(outcome)
}

async fn plan_min_id(
    reader: &StreamStorageRead,
    stream: &Bytes,
    min_id: StreamEntryId,
    pending: Option<StreamEntryId>,
    ops: &mut Vec<BatchOp>,
) -> Result<TrimOutcome> {
    let doomed = reader
        .entry_ids_in(stream, Bound::Unbounded, Bound::Excluded(min_id), None)
        .await?;

    let mut outcome = TrimOutcome::default();
    for id in doomed {
        ops.push(BatchOp::delete(reader.entry_key(stream, id)));
        outcome.max_deleted_id = Some(id);
        outcome.deleted += 1;
    }

    if let Some(pending_id) = pending {
        if pending_id < min_id {
            outcome.deleted_pending = true;
            outcome.max_deleted_id = Some(pending_id);
            outcome.deleted += 1;
        }
    }

    if outcome.deleted > 0 {
        let surviving = reader
            .entry_ids_in(stream, Bound::Included(min_id), Bound::Unbounded, Some(1))
            .await?;
        outcome.first_remaining = surviving
            .into_iter()
            .next()
            .or_else(|| pending.filter(|p| *p >= min_id));
    }
    Ok(outcome)
}
