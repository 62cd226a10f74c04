//! Pure function layer that computes packed binary keys for every
//! namespace (§4.1): facts, the position map, six secondary indexes, and
//! idempotency.
//!
//! Every key lives under `root/<storeName>/<subspace-tag>/...`. Two stores
//! with distinct names cannot overlap: `store_name` is itself a
//! length-prefixed tuple element, so no key from store `"a"` is ever a
//! prefix of, or prefixed by, a key from store `"ab"`.

use crate::engine::{Bound, KeyRange};
use crate::types::FactPosition;

mod tuple {
    //! A minimal tuple encoder that preserves lexicographic order.
    //!
    /// Fixed-width integers are encoded big-endian so byte order matches
    /// numeric order. Variable-length strings are length-prefixed (`u32`
    /// big-endian byte length, then UTF-8 bytes) rather than the
    /// NUL-terminated-and-escaped scheme FoundationDB's tuple layer uses.
    ///
    /// Length-prefixing only preserves cross-tuple ordering when every key
    /// built from a given prefix shares the same tuple *shape* (the same
    /// sequence of element kinds) — which is true here: no subspace ever
    /// mixes a variable number of string elements, so two encoded keys
    /// compare equal to their decoded tuples' lexicographic order. This is
    /// recorded as design decision D-1.
    pub fn push_u8(buf: &mut Vec<u8>, tag: u8) {
        buf.push(tag);
    }

    pub fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn push_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn push_u128(buf: &mut Vec<u8>, v: u128) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Maps the full `i64` range onto `u64` while preserving order, by
    /// flipping the sign bit — the standard trick for sorting signed
    /// integers as unsigned big-endian bytes.
    pub fn push_i64_ordered(buf: &mut Vec<u8>, v: i64) {
        let flipped = (v as u64) ^ 0x8000_0000_0000_0000;
        buf.extend_from_slice(&flipped.to_be_bytes());
    }

    pub fn push_str(buf: &mut Vec<u8>, s: &str) {
        push_u32(buf, s.len() as u32);
        buf.extend_from_slice(s.as_bytes());
    }
}

/// Single-byte subspace discriminants. Order across subspaces is
/// irrelevant — each is a disjoint prefix.
#[derive(Clone, Copy)]
#[repr(u8)]
enum Subspace {
    Facts = 1,
    Positions = 2,
    TypeIndex = 3,
    TimeIndex = 4,
    SubjectIndex = 5,
    TagIndex = 6,
    TypeTagIndex = 7,
    MetadataIndex = 8,
    Idempotency = 9,
}

/// Precomputed key-building context for one logical store. Immutable after
/// construction — safe to share across components and across concurrent
/// tasks.
#[derive(Debug, Clone)]
pub struct KeySpace {
    root_prefix: Vec<u8>,
}

impl KeySpace {
    pub fn new(store_name: &str) -> Self {
        let mut root_prefix = Vec::with_capacity(8 + store_name.len());
        tuple::push_str(&mut root_prefix, store_name);
        Self { root_prefix }
    }

    fn prefix(&self, subspace: Subspace) -> Vec<u8> {
        let mut buf = self.root_prefix.clone();
        tuple::push_u8(&mut buf, subspace as u8);
        buf
    }

    // -- FACTS: (position) -> envelope -------------------------------------

    pub fn facts_key(&self, position: FactPosition) -> Vec<u8> {
        let mut buf = self.prefix(Subspace::Facts);
        tuple::push_u64(&mut buf, position.0);
        buf
    }

    pub fn facts_range_after(&self, after: Option<FactPosition>) -> KeyRange {
        let prefix = self.prefix(Subspace::Facts);
        let start = match after {
            Some(pos) => Bound::Excluded(self.facts_key(pos)),
            None => Bound::Included(prefix.clone()),
        };
        KeyRange::new(start, Bound::Excluded(prefix_upper_bound(&prefix)))
    }

    pub fn decode_position_from_facts_key(&self, key: &[u8]) -> Option<FactPosition> {
        let prefix = self.prefix(Subspace::Facts);
        let suffix = key.strip_prefix(prefix.as_slice())?;
        let bytes: [u8; 8] = suffix.try_into().ok()?;
        Some(FactPosition::from_be_bytes(bytes))
    }

    /// Every index key in this keyspace ends in an 8-byte big-endian
    /// position, regardless of how many string elements precede it — so
    /// decoding needs no knowledge of the subspace's shape.
    pub fn decode_position_from_index_key(&self, key: &[u8]) -> Option<FactPosition> {
        if key.len() < 8 {
            return None;
        }
        let tail = &key[key.len() - 8..];
        let bytes: [u8; 8] = tail.try_into().ok()?;
        Some(FactPosition::from_be_bytes(bytes))
    }

    // -- POSITIONS: (factId) -> position -----------------------------------

    pub fn positions_key(&self, fact_id: u128) -> Vec<u8> {
        let mut buf = self.prefix(Subspace::Positions);
        tuple::push_u128(&mut buf, fact_id);
        buf
    }

    // -- TYPE_INDEX: (type, position) -> factId ----------------------------

    pub fn type_index_key(&self, fact_type: &str, position: FactPosition) -> Vec<u8> {
        let mut buf = self.prefix(Subspace::TypeIndex);
        tuple::push_str(&mut buf, fact_type);
        tuple::push_u64(&mut buf, position.0);
        buf
    }

    // -- TIME_INDEX: (epochSec, nanos, position) -> factId -----------------

    pub fn time_index_key(&self, seconds: i64, nanos: u32, position: FactPosition) -> Vec<u8> {
        let mut buf = self.prefix(Subspace::TimeIndex);
        tuple::push_i64_ordered(&mut buf, seconds);
        buf.extend_from_slice(&nanos.to_be_bytes());
        tuple::push_u64(&mut buf, position.0);
        buf
    }

    /// Inclusive range `[start, end]` over `(epochSec, nanos)`, matching the
    /// chosen boundary policy (§9 Open Question, DESIGN.md D-4): both ends
    /// are inclusive, so `findInTimeRange(t, t)` returns facts exactly at
    /// `t`.
    pub fn time_index_range(&self, start: (i64, u32), end: (i64, u32)) -> KeyRange {
        let prefix = self.prefix(Subspace::TimeIndex);
        let mut start_key = prefix.clone();
        tuple::push_i64_ordered(&mut start_key, start.0);
        start_key.extend_from_slice(&start.1.to_be_bytes());

        let mut end_key_prefix = prefix;
        tuple::push_i64_ordered(&mut end_key_prefix, end.0);
        end_key_prefix.extend_from_slice(&end.1.to_be_bytes());
        let end_key = prefix_upper_bound(&end_key_prefix);

        KeyRange::new(Bound::Included(start_key), Bound::Excluded(end_key))
    }

    // -- SUBJECT_INDEX: (subjectType, subjectId, position) -> factId -------

    pub fn subject_index_key(
        &self,
        subject_type: &str,
        subject_id: &str,
        position: FactPosition,
    ) -> Vec<u8> {
        let mut buf = self.prefix(Subspace::SubjectIndex);
        tuple::push_str(&mut buf, subject_type);
        tuple::push_str(&mut buf, subject_id);
        tuple::push_u64(&mut buf, position.0);
        buf
    }

    pub fn subject_index_range(&self, subject_type: &str, subject_id: &str) -> KeyRange {
        let mut prefix = self.prefix(Subspace::SubjectIndex);
        tuple::push_str(&mut prefix, subject_type);
        tuple::push_str(&mut prefix, subject_id);
        KeyRange::new(
            Bound::Included(prefix.clone()),
            Bound::Excluded(prefix_upper_bound(&prefix)),
        )
    }

    // -- TAG_INDEX: (tagKey, tagValue, position) -> factId ------------------

    pub fn tag_index_key(&self, key: &str, value: &str, position: FactPosition) -> Vec<u8> {
        let mut buf = self.prefix(Subspace::TagIndex);
        tuple::push_str(&mut buf, key);
        tuple::push_str(&mut buf, value);
        tuple::push_u64(&mut buf, position.0);
        buf
    }

    pub fn tag_index_range(&self, key: &str, value: &str, after: Option<FactPosition>) -> KeyRange {
        let mut prefix = self.prefix(Subspace::TagIndex);
        tuple::push_str(&mut prefix, key);
        tuple::push_str(&mut prefix, value);
        let start = match after {
            Some(pos) => Bound::Excluded(self.tag_index_key(key, value, pos)),
            None => Bound::Included(prefix.clone()),
        };
        KeyRange::new(start, Bound::Excluded(prefix_upper_bound(&prefix)))
    }

    // -- TYPE_TAG_INDEX: (type, tagKey, tagValue, position) -> factId -------

    pub fn type_tag_index_key(
        &self,
        fact_type: &str,
        key: &str,
        value: &str,
        position: FactPosition,
    ) -> Vec<u8> {
        let mut buf = self.prefix(Subspace::TypeTagIndex);
        tuple::push_str(&mut buf, fact_type);
        tuple::push_str(&mut buf, key);
        tuple::push_str(&mut buf, value);
        tuple::push_u64(&mut buf, position.0);
        buf
    }

    pub fn type_tag_index_range(
        &self,
        fact_type: &str,
        key: &str,
        value: &str,
        after: Option<FactPosition>,
    ) -> KeyRange {
        let mut prefix = self.prefix(Subspace::TypeTagIndex);
        tuple::push_str(&mut prefix, fact_type);
        tuple::push_str(&mut prefix, key);
        tuple::push_str(&mut prefix, value);
        let start = match after {
            Some(pos) => Bound::Excluded(self.type_tag_index_key(fact_type, key, value, pos)),
            None => Bound::Included(prefix.clone()),
        };
        KeyRange::new(start, Bound::Excluded(prefix_upper_bound(&prefix)))
    }

    // -- METADATA_INDEX: (key, value, position) -> factId -------------------

    pub fn metadata_index_key(&self, key: &str, value: &str, position: FactPosition) -> Vec<u8> {
        let mut buf = self.prefix(Subspace::MetadataIndex);
        tuple::push_str(&mut buf, key);
        tuple::push_str(&mut buf, value);
        tuple::push_u64(&mut buf, position.0);
        buf
    }

    // -- IDEMPOTENCY: (idempotencyKey) -> empty -----------------------------

    pub fn idempotency_key(&self, idempotency_key: u128) -> Vec<u8> {
        let mut buf = self.prefix(Subspace::Idempotency);
        tuple::push_u128(&mut buf, idempotency_key);
        buf
    }

    /// The whole key range owned by this store, for `Store::reset`.
    pub fn whole_store_range(&self) -> (Vec<u8>, Vec<u8>) {
        let start = self.root_prefix.clone();
        let end = prefix_upper_bound(&self.root_prefix);
        (start, end)
    }

    /// Every index key to write for a fact at the given position, used by
    /// the Appender so that the write set for one fact is assembled in one
    /// place. Returns `(key, value = factId bytes)` pairs for every
    /// subspace except FACTS/POSITIONS, which the Appender writes directly.
    pub fn index_rows(&self, fact: &crate::types::Fact, position: FactPosition) -> Vec<Vec<u8>> {
        let mut keys = Vec::with_capacity(3 + fact.tags.len() * 2 + fact.metadata.len());
        keys.push(self.type_index_key(&fact.fact_type, position));
        keys.push(self.time_index_key(
            fact.appended_at.seconds,
            fact.appended_at.nanos,
            position,
        ));
        keys.push(self.subject_index_key(
            &fact.subject.subject_type,
            &fact.subject.subject_id,
            position,
        ));
        for (k, v) in &fact.tags {
            keys.push(self.tag_index_key(k, v, position));
            keys.push(self.type_tag_index_key(&fact.fact_type, k, v, position));
        }
        for (k, v) in &fact.metadata {
            keys.push(self.metadata_index_key(k, v, position));
        }
        keys
    }
}

/// Encodes a fact id as the value stored in every index row.
pub fn encode_fact_id_value(id: u128) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Decodes a fact id from an index row's value.
pub fn decode_fact_id_value(bytes: &[u8]) -> Option<u128> {
    let arr: [u8; 16] = bytes.try_into().ok()?;
    Some(u128::from_be_bytes(arr))
}

/// Smallest byte string that is strictly greater than every string with
/// `prefix` as a prefix, assuming `prefix` is not composed entirely of
/// `0xFF` bytes (never the case here: every key begins with a `u32`
/// length-prefixed store name, which would require a 4-gigabyte store name
/// of all-0xFF bytes to violate).
fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut v = prefix.to_vec();
    for i in (0..v.len()).rev() {
        if v[i] != 0xFF {
            v[i] += 1;
            v.truncate(i + 1);
            return v;
        }
    }
    v.push(0xFF);
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_store_names_do_not_overlap() {
        let a = KeySpace::new("a");
        let ab = KeySpace::new("ab");
        let (a_start, a_end) = a.whole_store_range();
        let (ab_start, _ab_end) = ab.whole_store_range();
        assert!(ab_start >= a_end || ab_start < a_start);
    }

    #[test]
    fn facts_key_orders_by_position() {
        let ks = KeySpace::new("s");
        let k1 = ks.facts_key(FactPosition(1));
        let k2 = ks.facts_key(FactPosition(2));
        let k10 = ks.facts_key(FactPosition(10));
        assert!(k1 < k2);
        assert!(k2 < k10, "byte order must match numeric order past 9");
    }

    #[test]
    fn time_index_orders_negative_and_positive_seconds() {
        let ks = KeySpace::new("s");
        let neg = ks.time_index_key(-5, 0, FactPosition(1));
        let zero = ks.time_index_key(0, 0, FactPosition(1));
        let pos = ks.time_index_key(5, 0, FactPosition(1));
        assert!(neg < zero);
        assert!(zero < pos);
    }

    #[test]
    fn prefix_upper_bound_is_strictly_greater_than_all_extensions() {
        let prefix = vec![1, 2, 3];
        let bound = prefix_upper_bound(&prefix);
        assert!(bound > vec![1, 2, 3]);
        assert!(bound > vec![1, 2, 3, 255, 255]);
        assert!(bound <= vec![1, 2, 4]);
    }

    #[test]
    fn decode_position_from_facts_key_round_trips() {
        let ks = KeySpace::new("s");
        let pos = FactPosition(42);
        let key = ks.facts_key(pos);
        assert_eq!(ks.decode_position_from_facts_key(&key), Some(pos));
    }
}
