//! Byte-key range utilities.

use std::ops::{Bound, RangeBounds};

use bytes::Bytes;

/// A range over byte keys with explicit bounds on both ends.
///
/// `BytesRange` is the range type accepted by
/// [`StorageRead::scan_iter`](crate::StorageRead::scan_iter). It implements
/// [`RangeBounds<Bytes>`] so it can be handed directly to backends that take
/// standard range bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesRange {
    pub start: Bound<Bytes>,
    pub end: Bound<Bytes>,
}

impl BytesRange {
    /// Creates a range with the given bounds.
    pub fn new(start: Bound<Bytes>, end: Bound<Bytes>) -> Self {
        Self { start, end }
    }

    /// Creates a range covering the entire key space.
    pub fn unbounded() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Creates a range covering exactly the keys that start with `prefix`.
    ///
    /// The upper bound is the prefix with its last non-0xFF byte incremented
    /// (trailing 0xFF bytes dropped). A prefix of all 0xFF bytes has no such
    /// successor, so the range is unbounded above.
    pub fn prefix(prefix: Bytes) -> Self {
        let end = match next_prefix(&prefix) {
            Some(next) => Bound::Excluded(next),
            None => Bound::Unbounded,
        };
        Self {
            start: Bound::Included(prefix),
            end,
        }
    }

    /// Returns true if `key` falls within the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        let above_start = match &self.start {
            Bound::Included(s) => key >= s.as_ref(),
            Bound::Excluded(s) => key > s.as_ref(),
            Bound::Unbounded => true,
        };
        let below_end = match &self.end {
            Bound::Included(e) => key <= e.as_ref(),
            Bound::Excluded(e) => key < e.as_ref(),
            Bound::Unbounded => true,
        };
        above_start && below_end
    }
}

impl RangeBounds<Bytes> for BytesRange {
    fn start_bound(&self) -> Bound<&Bytes> {
        self.start.as_ref()
    }

    fn end_bound(&self) -> Bound<&Bytes> {
        self.end.as_ref()
    }
}

/// Returns the smallest key that is greater than every key starting with
/// `prefix`, or `None` when no such key exists (all bytes are 0xFF).
fn next_prefix(prefix: &[u8]) -> Option<Bytes> {
    let mut bytes = prefix.to_vec();
    while let Some(last) = bytes.last() {
        if *last == 0xFF {
            bytes.pop();
        } else {
            *bytes.last_mut().unwrap() += 1;
            return Some(Bytes::from(bytes));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_create_range_from_bounds() {
        // given
        let start = Bound::Included(Bytes::from("start"));
        let end = Bound::Excluded(Bytes::from("end"));

        // when
        let range = BytesRange::new(start.clone(), end.clone());

        // then
        assert_eq!(range.start, start);
        assert_eq!(range.end, end);
    }

    #[test]
    fn should_create_unbounded_range() {
        // given/when
        let range = BytesRange::unbounded();

        // then
        assert_eq!(range.start, Bound::Unbounded);
        assert_eq!(range.end, Bound::Unbounded);
    }

    #[test]
    fn should_create_prefix_range() {
        // given
        let prefix = Bytes::from(vec![1, 2, 3]);

        // when
        let range = BytesRange::prefix(prefix.clone());

        // then
        assert_eq!(range.start, Bound::Included(prefix));
        assert_eq!(range.end, Bound::Excluded(Bytes::from(vec![1, 2, 4])));
    }

    #[test]
    fn should_carry_past_max_byte_in_prefix_range() {
        // given
        let prefix = Bytes::from(vec![1, 2, 0xFF]);

        // when
        let range = BytesRange::prefix(prefix.clone());

        // then
        assert_eq!(range.start, Bound::Included(prefix));
        assert_eq!(range.end, Bound::Excluded(Bytes::from(vec![1, 3])));
    }

    #[test]
    fn should_leave_all_max_prefix_unbounded_above() {
        // given
        let prefix = Bytes::from(vec![0xFF, 0xFF]);

        // when
        let range = BytesRange::prefix(prefix.clone());

        // then
        assert_eq!(range.start, Bound::Included(prefix));
        assert_eq!(range.end, Bound::Unbounded);
    }

    #[test]
    fn should_contain_keys_with_prefix() {
        // given
        let range = BytesRange::prefix(Bytes::from_static(b"\x12\xff\xff"));

        // when/then
        assert!(range.contains(b"\x12\xff\xff"));
        assert!(range.contains(b"\x12\xff\xff\x00\x01"));
        assert!(!range.contains(b"\x13"));
        assert!(!range.contains(b"\x12\xff\xfe"));
    }

    #[test]
    fn should_respect_exclusive_bounds() {
        // given
        let range = BytesRange::new(
            Bound::Excluded(Bytes::from_static(b"a")),
            Bound::Included(Bytes::from_static(b"c")),
        );

        // when/then
        assert!(!range.contains(b"a"));
        assert!(range.contains(b"b"));
        assert!(range.contains(b"c"));
        assert!(!range.contains(b"d"));
    }
}
