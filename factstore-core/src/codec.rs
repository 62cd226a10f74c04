//! Encodes/decodes the stored fact envelope as a single opaque byte string.
//!
//! Format is internal and versioned (§4.2): a one-byte format tag followed
//! by a `bincode`-encoded [`Fact`]. `bincode` is deterministic and compact,
//! the same family of binary codec the wider event-store lineage this crate
//! descends from used for its own on-the-wire records — here it is used
//! purely for the envelope blob, never for anything the core treats as a
//! wire format.

use crate::errors::StoreError;
use crate::types::Fact;

const FORMAT_V1: u8 = 1;

pub fn encode(fact: &Fact) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::with_capacity(128);
    buf.push(FORMAT_V1);
    bincode::serialize_into(&mut buf, fact)
        .map_err(|e| StoreError::Engine(anyhow::anyhow!("fact encode failed: {e}")))?;
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<Fact, StoreError> {
    let (tag, body) = bytes
        .split_first()
        .ok_or_else(|| StoreError::Engine(anyhow::anyhow!("empty fact envelope")))?;
    match *tag {
        FORMAT_V1 => bincode::deserialize(body)
            .map_err(|e| StoreError::Engine(anyhow::anyhow!("fact decode failed: {e}"))),
        other => Err(StoreError::Engine(anyhow::anyhow!(
            "unknown fact envelope format tag {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FactId, Metadata, Payload, Subject, Tags, Timestamp};

    fn sample_fact() -> Fact {
        let mut metadata = Metadata::new();
        metadata.insert("trace_id".into(), "abc123".into());
        let mut tags = Tags::new();
        tags.insert("user".into(), "ALICE".into());
        tags.insert("region".into(), "".into());

        Fact::new(
            FactId(42),
            "USER_ONBOARDED",
            Payload {
                data: vec![0xDE, 0xAD, 0xBE, 0xEF],
                format: Some("application/octet-stream".into()),
                schema: None,
            },
            Subject::new("USER", "ALICE"),
            Timestamp::new(1_700_000_000, 123_456_789),
            metadata,
            tags,
        )
        .unwrap()
    }

    #[test]
    fn round_trips_all_fields() {
        let fact = sample_fact();
        let encoded = encode(&fact).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(fact, decoded);
    }

    #[test]
    fn round_trips_empty_metadata_and_tags() {
        let fact = Fact::new(
            FactId(1),
            "T",
            Payload::new(vec![]),
            Subject::new("S", "1"),
            Timestamp::new(0, 0),
            Metadata::new(),
            Tags::new(),
        )
        .unwrap();
        let decoded = decode(&encode(&fact).unwrap()).unwrap();
        assert_eq!(fact, decoded);
    }

    #[test]
    fn rejects_empty_envelope() {
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn rejects_unknown_format_tag() {
        let mut bytes = encode(&sample_fact()).unwrap();
        bytes[0] = 99;
        assert!(decode(&bytes).is_err());
    }
}
