//! Serde for stream storage.
//!
//! This module implements the durable layout of a stream: the per-stream
//! metadata header and the entry records, both living under a configurable
//! namespace prefix.
//!
//! # Key Format
//!
//! Two key families exist per stream, distinguished by a tag byte and
//! joined with the reserved `0x7C` (`|`) separator:
//!
//! ```text
//! META : <namespace> | M | <stream_name>
//! ENTRY: <namespace> | E | <stream_name> | <ms u64 BE> <seq u64 BE>
//! ```
//!
//! Encoding `ms` and `seq` as big-endian integers makes the lexicographic
//! order of entry keys identical to the numeric order of entry ids, so
//! range queries translate directly into backend range scans. Stream names
//! must not contain the separator byte; the command layer rejects such
//! names before they reach the engine.
//!
//! # Value Format
//!
//! The metadata value is a fixed-layout record behind a version tag:
//!
//! ```text
//! | version (u8 = 1) | size (u64 BE) | last_generated_id (16B BE)
//! | max_deleted_entry_id (16B BE) | entries_added (u64 BE)
//! | recorded_first_entry_id (16B BE) |
//! ```
//!
//! Entry values pack the field/value vector as a little-endian element
//! count followed by length-prefixed byte strings.

use std::ops::Bound;

use bytes::{BufMut, Bytes, BytesMut};
use common::BytesRange;

use crate::error::{Error, Result};
use crate::model::StreamEntryId;

/// Metadata value format version (currently 1).
pub(crate) const META_VERSION: u8 = 1;

/// Reserved separator byte between key components.
pub(crate) const SEPARATOR: u8 = 0x7C;

/// Tag byte for metadata keys.
const META_TAG: u8 = b'M';

/// Tag byte for entry keys.
const ENTRY_TAG: u8 = b'E';

fn read_u64_be(data: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[..8]);
    u64::from_be_bytes(buf)
}

fn read_id_be(data: &[u8]) -> StreamEntryId {
    StreamEntryId::new(read_u64_be(&data[..8]), read_u64_be(&data[8..16]))
}

/// Key addressing a stream's metadata header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamMetaKey {
    pub stream: Bytes,
}

impl StreamMetaKey {
    pub(crate) fn new(stream: Bytes) -> Self {
        Self { stream }
    }

    /// Serializes the key under the given namespace prefix.
    pub(crate) fn serialize(&self, namespace: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(namespace.len() + 3 + self.stream.len());
        buf.put_slice(namespace);
        buf.put_u8(SEPARATOR);
        buf.put_u8(META_TAG);
        buf.put_u8(SEPARATOR);
        buf.put_slice(&self.stream);
        buf.freeze()
    }
}

/// Key addressing a single stream entry.
///
/// Entry keys for one stream are contiguous in the backend and sort by
/// `(ms, seq)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamEntryKey {
    pub stream: Bytes,
    pub id: StreamEntryId,
}

impl StreamEntryKey {
    pub(crate) fn new(stream: Bytes, id: StreamEntryId) -> Self {
        Self { stream, id }
    }

    /// Serializes the key under the given namespace prefix.
    pub(crate) fn serialize(&self, namespace: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(namespace.len() + 4 + self.stream.len() + 16);
        buf.put_slice(namespace);
        buf.put_u8(SEPARATOR);
        buf.put_u8(ENTRY_TAG);
        buf.put_u8(SEPARATOR);
        buf.put_slice(&self.stream);
        buf.put_u8(SEPARATOR);
        buf.put_u64(self.id.ms);
        buf.put_u64(self.id.seq);
        buf.freeze()
    }

    /// Deserializes an entry key produced under a namespace of the given
    /// length.
    pub(crate) fn deserialize(data: &[u8], namespace_len: usize) -> Result<Self> {
        // namespace + "|E|" + name + "|" + 16 id bytes
        let min_len = namespace_len + 3 + 1 + 16;
        if data.len() < min_len {
            return Err(Error::CorruptEntry(format!(
                "entry key too short: {} bytes",
                data.len()
            )));
        }
        let header = &data[namespace_len..namespace_len + 3];
        if header != [SEPARATOR, ENTRY_TAG, SEPARATOR] {
            return Err(Error::CorruptEntry(
                "entry key tag mismatch".to_string(),
            ));
        }
        let id_start = data.len() - 16;
        if data[id_start - 1] != SEPARATOR {
            return Err(Error::CorruptEntry(
                "entry key missing id separator".to_string(),
            ));
        }
        let stream = Bytes::copy_from_slice(&data[namespace_len + 3..id_start - 1]);
        let id = read_id_be(&data[id_start..]);
        Ok(StreamEntryKey { stream, id })
    }
}

/// Builds the backend key range covering the entry ids within the given
/// bounds for one stream.
///
/// Unbounded ends are pinned to the sentinel ids, so the range never leaks
/// into another stream's key space.
pub(crate) fn entry_scan_range(
    namespace: &[u8],
    stream: &Bytes,
    start: Bound<StreamEntryId>,
    end: Bound<StreamEntryId>,
) -> BytesRange {
    let key = |id: StreamEntryId| StreamEntryKey::new(stream.clone(), id).serialize(namespace);
    let start = match start {
        Bound::Included(id) => Bound::Included(key(id)),
        Bound::Excluded(id) => Bound::Excluded(key(id)),
        Bound::Unbounded => Bound::Included(key(StreamEntryId::MIN)),
    };
    let end = match end {
        Bound::Included(id) => Bound::Included(key(id)),
        Bound::Excluded(id) => Bound::Excluded(key(id)),
        Bound::Unbounded => Bound::Included(key(StreamEntryId::MAX)),
    };
    BytesRange::new(start, end)
}

/// The per-stream metadata header.
///
/// Stored once per stream and rewritten by every mutation, in the same
/// batch as the entry changes it accounts for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct StreamMeta {
    /// Number of currently stored entries.
    pub size: u64,
    /// The greatest id ever generated for this stream.
    pub last_generated_id: StreamEntryId,
    /// The greatest id ever deleted, `0-0` if none.
    pub max_deleted_entry_id: StreamEntryId,
    /// Lifetime count of added entries; never decreases on add/trim.
    pub entries_added: u64,
    /// Id of the smallest currently stored entry, `0-0` when empty.
    pub recorded_first_entry_id: StreamEntryId,
}

impl StreamMeta {
    /// Encodes the header value.
    pub(crate) fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(65);
        buf.put_u8(META_VERSION);
        buf.put_u64(self.size);
        buf.put_u64(self.last_generated_id.ms);
        buf.put_u64(self.last_generated_id.seq);
        buf.put_u64(self.max_deleted_entry_id.ms);
        buf.put_u64(self.max_deleted_entry_id.seq);
        buf.put_u64(self.entries_added);
        buf.put_u64(self.recorded_first_entry_id.ms);
        buf.put_u64(self.recorded_first_entry_id.seq);
        buf.freeze()
    }

    /// Decodes a header value.
    pub(crate) fn deserialize(data: &[u8]) -> Result<Self> {
        let Some((&version, rest)) = data.split_first() else {
            return Err(Error::CorruptEntry("empty stream metadata".to_string()));
        };
        if version != META_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        if rest.len() != 64 {
            return Err(Error::CorruptEntry(format!(
                "stream metadata length mismatch: {} bytes",
                data.len()
            )));
        }
        Ok(StreamMeta {
            size: read_u64_be(&rest[0..]),
            last_generated_id: read_id_be(&rest[8..]),
            max_deleted_entry_id: read_id_be(&rest[24..]),
            entries_added: read_u64_be(&rest[40..]),
            recorded_first_entry_id: read_id_be(&rest[48..]),
        })
    }
}

/// Encodes a field/value vector into one opaque entry value.
pub(crate) fn encode_entry_values(values: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(values.len() as u32);
    for value in values {
        buf.put_u32_le(value.len() as u32);
        buf.put_slice(value);
    }
    buf.freeze()
}

/// Decodes an entry value back into its field/value vector.
pub(crate) fn decode_entry_values(data: &[u8]) -> Result<Vec<Bytes>> {
    let short = || Error::CorruptEntry("entry value truncated".to_string());
    let mut rest = data;
    if rest.len() < 4 {
        return Err(short());
    }
    let count = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    rest = &rest[4..];

    let mut values = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        if rest.len() < 4 {
            return Err(short());
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            return Err(short());
        }
        values.push(Bytes::copy_from_slice(&rest[..len]));
        rest = &rest[len..];
    }
    if !rest.is_empty() {
        return Err(Error::CorruptEntry(format!(
            "entry value has {} trailing bytes",
            rest.len()
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &[u8] = b"ns";

    fn entry_key(stream: &'static [u8], ms: u64, seq: u64) -> Bytes {
        StreamEntryKey::new(Bytes::from_static(stream), StreamEntryId::new(ms, seq))
            .serialize(NS)
    }

    #[test]
    fn should_serialize_meta_key_with_expected_structure() {
        // given
        let key = StreamMetaKey::new(Bytes::from_static(b"s1"));

        // when
        let serialized = key.serialize(NS);

        // then
        assert_eq!(serialized.as_ref(), b"ns\x7cM\x7cs1");
    }

    #[test]
    fn should_serialize_entry_key_with_expected_structure() {
        // given
        let serialized = entry_key(b"s1", 1, 2);

        // then - ns | E | name | ms BE | seq BE
        let mut expected = Vec::new();
        expected.extend_from_slice(b"ns\x7cE\x7cs1\x7c");
        expected.extend_from_slice(&1u64.to_be_bytes());
        expected.extend_from_slice(&2u64.to_be_bytes());
        assert_eq!(serialized.as_ref(), expected.as_slice());
    }

    #[test]
    fn should_round_trip_entry_key() {
        // given
        let key = StreamEntryKey::new(
            Bytes::from_static(b"orders"),
            StreamEntryId::new(12345, 6789),
        );

        // when
        let serialized = key.serialize(NS);
        let deserialized = StreamEntryKey::deserialize(&serialized, NS.len()).unwrap();

        // then
        assert_eq!(deserialized, key);
    }

    #[test]
    fn should_fail_to_deserialize_short_entry_key() {
        // given
        let data = b"ns\x7cE\x7cs";

        // when
        let result = StreamEntryKey::deserialize(data, NS.len());

        // then
        assert!(matches!(result, Err(Error::CorruptEntry(_))));
    }

    #[test]
    fn should_fail_to_deserialize_entry_key_with_wrong_tag() {
        // given - metadata tag in place of the entry tag
        let mut data = entry_key(b"s1", 1, 2).to_vec();
        data[3] = b'M';

        // when
        let result = StreamEntryKey::deserialize(&data, NS.len());

        // then
        assert!(matches!(result, Err(Error::CorruptEntry(_))));
    }

    #[test]
    fn should_keep_meta_and_entry_keys_distinct() {
        // given
        let meta = StreamMetaKey::new(Bytes::from_static(b"s1")).serialize(NS);
        let entry = entry_key(b"s1", 0, 0);

        // then
        assert_ne!(meta, entry);
    }

    #[test]
    fn should_order_entry_keys_by_ms_then_seq() {
        // given
        let k1 = entry_key(b"s1", 1, 5);
        let k2 = entry_key(b"s1", 2, 0);
        let k3 = entry_key(b"s1", 2, 1);

        // then
        assert!(k1 < k2, "ms ordering takes precedence");
        assert!(k2 < k3, "seq breaks ties within one ms");
    }

    #[test]
    fn should_scan_range_cover_exactly_requested_ids() {
        // given
        let stream = Bytes::from_static(b"s1");
        let range = entry_scan_range(
            NS,
            &stream,
            Bound::Included(StreamEntryId::new(5, 0)),
            Bound::Excluded(StreamEntryId::new(7, 0)),
        );

        // then
        assert!(range.contains(&entry_key(b"s1", 5, 0)));
        assert!(range.contains(&entry_key(b"s1", 6, u64::MAX)));
        assert!(!range.contains(&entry_key(b"s1", 7, 0)));
        assert!(!range.contains(&entry_key(b"s1", 4, u64::MAX)));
    }

    #[test]
    fn should_pin_unbounded_scan_range_to_sentinels() {
        // given
        let stream = Bytes::from_static(b"s1");
        let range = entry_scan_range(NS, &stream, Bound::Unbounded, Bound::Unbounded);

        // then
        assert!(range.contains(&entry_key(b"s1", 0, 0)));
        assert!(range.contains(&entry_key(b"s1", u64::MAX, u64::MAX)));
        assert!(!range.contains(&StreamMetaKey::new(Bytes::from_static(b"s1")).serialize(NS)));
    }

    #[test]
    fn should_round_trip_meta() {
        // given
        let meta = StreamMeta {
            size: 3,
            last_generated_id: StreamEntryId::new(123458, 0),
            max_deleted_entry_id: StreamEntryId::new(123456, 0),
            entries_added: 5,
            recorded_first_entry_id: StreamEntryId::new(123457, 0),
        };

        // when
        let serialized = meta.serialize();
        let deserialized = StreamMeta::deserialize(&serialized).unwrap();

        // then
        assert_eq!(serialized.len(), 65);
        assert_eq!(serialized[0], META_VERSION);
        assert_eq!(deserialized, meta);
    }

    #[test]
    fn should_reject_meta_with_unknown_version() {
        // given
        let mut data = StreamMeta::default().serialize().to_vec();
        data[0] = 9;

        // when
        let result = StreamMeta::deserialize(&data);

        // then
        assert_eq!(result, Err(Error::UnsupportedVersion(9)));
    }

    #[test]
    fn should_reject_truncated_meta() {
        // given
        let data = StreamMeta::default().serialize();

        // when
        let result = StreamMeta::deserialize(&data[..data.len() - 1]);

        // then
        assert!(matches!(result, Err(Error::CorruptEntry(_))));
    }

    #[test]
    fn should_reject_empty_meta() {
        assert!(matches!(
            StreamMeta::deserialize(&[]),
            Err(Error::CorruptEntry(_))
        ));
    }

    #[test]
    fn should_round_trip_entry_values() {
        // given
        let values: Vec<Bytes> = ["day", "first", "month", "eleventh", "epoch", "fairly-old"]
            .iter()
            .map(|s| Bytes::from_static(s.as_bytes()))
            .collect();

        // when
        let encoded = encode_entry_values(&values);
        let decoded = decode_entry_values(&encoded).unwrap();

        // then
        assert_eq!(decoded, values);
    }

    #[test]
    fn should_round_trip_empty_entry_values() {
        // given
        let values: Vec<Bytes> = Vec::new();

        // when
        let encoded = encode_entry_values(&values);
        let decoded = decode_entry_values(&encoded).unwrap();

        // then
        assert_eq!(encoded.len(), 4);
        assert!(decoded.is_empty());
    }

    #[test]
    fn should_fail_to_decode_truncated_entry_values() {
        // given
        let encoded = encode_entry_values(&[Bytes::from_static(b"key"), Bytes::from_static(b"val")]);

        // when
        let result = decode_entry_values(&encoded[..encoded.len() - 1]);

        // then
        assert!(matches!(result, Err(Error::CorruptEntry(_))));
    }

    #[test]
    fn should_fail_to_decode_entry_values_with_trailing_bytes() {
        // given
        let mut data = encode_entry_values(&[Bytes::from_static(b"k")]).to_vec();
        data.push(0);

        // when
        let result = decode_entry_values(&data);

        // then
        assert!(matches!(result, Err(Error::CorruptEntry(_))));
    }

    #[test]
    fn should_fail_to_decode_entry_values_with_overstated_count() {
        // given - claims two elements but carries one
        let mut data = encode_entry_values(&[Bytes::from_static(b"k")]).to_vec();
        data[0] = 2;

        // when
        let result = decode_entry_values(&data);

        // then
        assert!(matches!(result, Err(Error::CorruptEntry(_))));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn should_preserve_id_ordering_in_key_encoding(
                a_ms: u64, a_seq: u64, b_ms: u64, b_seq: u64,
            ) {
                let stream = Bytes::from_static(b"s");
                let a = StreamEntryId::new(a_ms, a_seq);
                let b = StreamEntryId::new(b_ms, b_seq);
                let enc_a = StreamEntryKey::new(stream.clone(), a).serialize(NS);
                let enc_b = StreamEntryKey::new(stream, b).serialize(NS);

                prop_assert_eq!(
                    a.cmp(&b),
                    enc_a.cmp(&enc_b),
                    "ordering mismatch: a={}, b={}",
                    a, b
                );
            }

            #[test]
            fn should_round_trip_arbitrary_entry_values(
                raw in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..8),
            ) {
                let values: Vec<Bytes> = raw.into_iter().map(Bytes::from).collect();
                let encoded = encode_entry_values(&values);
                let decoded = decode_entry_values(&encoded).unwrap();
                prop_assert_eq!(decoded, values);
            }
        }
    }
}
