pub mod clock;
pub mod storage;
pub mod util;

pub use clock::{Clock, MockClock, SystemClock};
pub use storage::config::StorageConfig;
pub use storage::{
    BatchOp, Record, ScanDirection, Storage, StorageError, StorageIterator, StorageRead,
    StorageResult, StorageSnapshot, WriteOptions,
};
pub use util::BytesRange;
