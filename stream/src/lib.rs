//! Stream storage engine over an ordered key/value backend.
//!
//! This crate implements the stream data structure behind a Redis-style
//! `XADD`/`XRANGE`/`XDEL`/`XLEN`/`XTRIM`/`XINFO`/`XSETID` command family:
//! monotonic 128-bit entry ids, a binary entry codec, a key layout whose
//! lexicographic order matches id order, and the per-stream metadata
//! bookkeeping that keeps `XINFO` answers consistent through deletions and
//! trims.
//!
//! # Architecture
//!
//! The engine is a stateless library over the `common` storage traits. Each
//! stream owns two key families under a configurable namespace: one header
//! record and one record per entry. Every mutation rewrites the header in
//! the same atomic batch as the entry changes; every query reads through a
//! single storage snapshot.
//!
//! Command parsing, consumer groups, blocking reads, and replication live
//! in outer layers; this crate only speaks stream names, entry ids, and
//! opaque field/value bytes.
//!
//! # Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use stream::{AddOptions, Config, RangeOptions, StreamDb};
//!
//! let db = StreamDb::open(Config::default()).await?;
//!
//! let id = db
//!     .add(
//!         Bytes::from("orders"),
//!         AddOptions::default(),
//!         vec![Bytes::from("state"), Bytes::from("created")],
//!     )
//!     .await?;
//!
//! let entries = db.range(Bytes::from("orders"), RangeOptions::default()).await?;
//! assert_eq!(entries[0].id, id);
//! ```

mod config;
mod error;
mod model;
mod serde;
mod storage;
mod stream;
mod trim;

pub use config::{AddOptions, Config, LenOptions, RangeOptions, TrimOptions, TrimStrategy};
pub use error::{Error, Result};
pub use model::{NextEntryId, StreamEntry, StreamEntryId, StreamInfo};
pub use stream::StreamDb;
