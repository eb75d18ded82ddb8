//! Core data types for streams.
//!
//! This module defines the entry identifier algebra and the data structures
//! exchanged with callers: entries, the per-stream metadata summary, and the
//! richer info record returned by [`StreamDb::get_stream_info`].
//!
//! [`StreamDb::get_stream_info`]: crate::StreamDb::get_stream_info

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Identifier of a single stream entry.
///
/// An entry id is a pair of a millisecond timestamp and a sequence number,
/// compared component-wise: first `ms`, then `seq`. Ids are unique within a
/// stream and strictly increase in insertion order.
///
/// The string form is the decimal `"<ms>-<seq>"` used by the command layer
/// (e.g. `"1526919030474-55"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamEntryId {
    /// Milliseconds since the Unix epoch.
    pub ms: u64,
    /// Sequence number distinguishing entries within one millisecond.
    pub seq: u64,
}

impl StreamEntryId {
    /// The smallest possible id, `0-0`.
    pub const MIN: StreamEntryId = StreamEntryId { ms: 0, seq: 0 };

    /// The largest possible id.
    pub const MAX: StreamEntryId = StreamEntryId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Returns the id immediately greater than this one.
    ///
    /// The sequence number is incremented, carrying into the millisecond
    /// component when the sequence is saturated. Fails with
    /// [`Error::Overflow`] when both components are already at their
    /// maximum.
    pub fn next(&self) -> Result<StreamEntryId> {
        if self.seq < u64::MAX {
            Ok(StreamEntryId::new(self.ms, self.seq + 1))
        } else if self.ms < u64::MAX {
            Ok(StreamEntryId::new(self.ms + 1, 0))
        } else {
            Err(Error::Overflow)
        }
    }

    /// Returns the id immediately smaller than this one, or `None` for the
    /// minimum id.
    pub fn prev(&self) -> Option<StreamEntryId> {
        if self.seq > 0 {
            Some(StreamEntryId::new(self.ms, self.seq - 1))
        } else if self.ms > 0 {
            Some(StreamEntryId::new(self.ms - 1, u64::MAX))
        } else {
            None
        }
    }

    /// Returns the id as one 128-bit integer, `ms` in the high bits.
    ///
    /// The integer order equals the id order, which makes arithmetic over
    /// the id space (midpoints, distances) well defined.
    pub fn as_u128(&self) -> u128 {
        ((self.ms as u128) << 64) | self.seq as u128
    }

    /// Reconstructs an id from its 128-bit integer form.
    pub fn from_u128(value: u128) -> Self {
        StreamEntryId::new((value >> 64) as u64, value as u64)
    }
}

impl fmt::Display for StreamEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamEntryId {
    type Err = Error;

    /// Parses `"<ms>"` or `"<ms>-<seq>"`; a missing sequence defaults to 0.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidEntryId(s.to_string());
        match s.split_once('-') {
            Some((ms, seq)) => {
                let ms = ms.parse::<u64>().map_err(|_| invalid())?;
                let seq = seq.parse::<u64>().map_err(|_| invalid())?;
                Ok(StreamEntryId::new(ms, seq))
            }
            None => {
                let ms = s.parse::<u64>().map_err(|_| invalid())?;
                Ok(StreamEntryId::new(ms, 0))
            }
        }
    }
}

/// An entry id as supplied by the command layer, possibly partial.
///
/// `XADD` accepts fully specified ids, ids with only the millisecond part
/// fixed (`"<ms>-*"`), and the fully automatic `"*"`. The engine resolves
/// partial forms against the stream's `last_generated_id` at add time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextEntryId {
    /// Both components fixed by the caller.
    Explicit { ms: u64, seq: u64 },
    /// Milliseconds fixed, sequence chosen by the engine.
    MsOnly { ms: u64 },
    /// Both components chosen by the engine from the clock.
    Auto,
}

/// One stream entry: its id and the field/value vector.
///
/// `values` is an even-length sequence alternating field names and values.
/// The engine treats every element as an opaque byte sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamEntryId,
    pub values: Vec<Bytes>,
}

impl StreamEntry {
    pub fn new(id: StreamEntryId, values: Vec<Bytes>) -> Self {
        Self { id, values }
    }
}

/// Stream summary returned by [`StreamDb::get_stream_info`].
///
/// The counter fields mirror the stored per-stream header. `first_entry`
/// and `last_entry` are populated only for non-full queries on non-empty
/// streams; `entries` is populated only for full queries.
///
/// [`StreamDb::get_stream_info`]: crate::StreamDb::get_stream_info
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamInfo {
    /// Number of currently stored entries.
    pub size: u64,
    /// The greatest id ever generated for this stream.
    pub last_generated_id: StreamEntryId,
    /// The greatest id ever deleted from this stream, `0-0` if none.
    pub max_deleted_entry_id: StreamEntryId,
    /// Total number of entries added over the stream's lifetime.
    pub entries_added: u64,
    /// Id of the smallest currently stored entry, `0-0` when empty.
    pub recorded_first_entry_id: StreamEntryId,
    /// The smallest stored entry, when present and not a full query.
    pub first_entry: Option<StreamEntry>,
    /// The largest stored entry, when present and not a full query.
    pub last_entry: Option<StreamEntry>,
    /// Forward-ordered entries, full queries only.
    pub entries: Vec<StreamEntry>,
}
