use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

/// A globally unique, 128-bit fact identifier.
///
/// Facts are identified by their caller, not by the store — nothing here
/// generates a `FactId`. Idempotency keys, by contrast, are generated by the
/// store's convenience constructors; see [`IdempotencyKey::fresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactId(pub u128);

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// An opaque 128-bit token whose first successful commit is recorded in the
/// `IDEMPOTENCY` subspace; subsequent commits under the same key short-circuit
/// to [`AppendResult::AlreadyApplied`] without re-examining the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub u128);

impl IdempotencyKey {
    /// Generate a fresh random key, used by the `append(fact)` /
    /// `append(facts)` convenience wrappers that have no caller-supplied key.
    pub fn fresh() -> Self {
        let mut buf = [0u8; 16];
        getrandom::getrandom(&mut buf).expect("system RNG unavailable");
        Self(u128::from_be_bytes(buf))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Opaque, engine-assigned, store-wide monotonically increasing commit token.
/// The sole basis for ordering among facts in one store. Positions are
/// unique and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactPosition(pub u64);

impl FactPosition {
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for FactPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A caller-supplied logical timestamp (not wall-clock-derived by the core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }
}

/// Entity grouping: `(type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub subject_type: String,
    pub subject_id: String,
}

impl Subject {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
        }
    }
}

/// Opaque payload. The core never interprets `data`, `format`, or `schema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub data: Vec<u8>,
    pub format: Option<String>,
    pub schema: Option<String>,
}

impl Payload {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            format: None,
            schema: None,
        }
    }
}

/// Order-irrelevant string-to-string mapping.
pub type Metadata = BTreeMap<String, String>;

/// Tag mapping: non-blank key to value (value may be empty).
pub type Tags = BTreeMap<String, String>;

/// An immutable, caller-constructed domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub fact_type: String,
    pub payload: Payload,
    pub subject: Subject,
    pub appended_at: Timestamp,
    pub metadata: Metadata,
    pub tags: Tags,
}

impl Fact {
    /// Construct a fact, validating the non-blank-type and non-blank-tag-key
    /// invariants from §3 eagerly, at construction time rather than at
    /// append time — so a caller building a bad fact fails immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: FactId,
        fact_type: impl Into<String>,
        payload: Payload,
        subject: Subject,
        appended_at: Timestamp,
        metadata: Metadata,
        tags: Tags,
    ) -> Result<Self, StoreError> {
        let fact_type = fact_type.into();
        if fact_type.trim().is_empty() {
            return Err(StoreError::Invalid("fact type must not be blank".into()));
        }
        for key in tags.keys() {
            if key.trim().is_empty() {
                return Err(StoreError::Invalid("tag key must not be blank".into()));
            }
        }
        Ok(Self {
            id,
            fact_type,
            payload,
            subject,
            appended_at,
            metadata,
            tags,
        })
    }
}

/// One item of a [`TagQuery`]'s outer OR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagQueryItem {
    /// Matches facts whose type is one of `types` AND whose tags contain
    /// every listed `(key, value)` pair.
    TagType {
        types: Vec<String>,
        tags: Vec<(String, String)>,
    },
    /// Matches facts whose tags contain every listed `(key, value)` pair,
    /// regardless of type.
    TagOnly { tags: Vec<(String, String)> },
}

impl TagQueryItem {
    pub fn tag_type(
        types: Vec<String>,
        tags: Vec<(String, String)>,
    ) -> Result<Self, StoreError> {
        if types.is_empty() {
            return Err(StoreError::Invalid(
                "TagTypeItem requires at least one type".into(),
            ));
        }
        if tags.is_empty() {
            return Err(StoreError::Invalid(
                "TagTypeItem requires at least one tag".into(),
            ));
        }
        Ok(Self::TagType { types, tags })
    }

    pub fn tag_only(tags: Vec<(String, String)>) -> Result<Self, StoreError> {
        if tags.is_empty() {
            return Err(StoreError::Invalid(
                "TagOnlyQueryItem requires at least one tag".into(),
            ));
        }
        Ok(Self::TagOnly { tags })
    }
}

/// A logical OR over a non-empty list of [`TagQueryItem`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagQuery {
    pub items: Vec<TagQueryItem>,
}

impl TagQuery {
    pub fn new(items: Vec<TagQueryItem>) -> Result<Self, StoreError> {
        if items.is_empty() {
            return Err(StoreError::Invalid(
                "TagQuery requires at least one item".into(),
            ));
        }
        Ok(Self { items })
    }
}

/// A precondition evaluated in the same transaction as the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppendCondition {
    /// No precondition.
    None,
    /// The latest fact for `subject` must equal `expected_last_id`
    /// (`None` means "no prior fact for this subject").
    ExpectedLastFact {
        subject: Subject,
        expected_last_id: Option<FactId>,
    },
    /// All entries must hold simultaneously.
    ExpectedMultiSubjectLastFact {
        expectations: Vec<(Subject, Option<FactId>)>,
    },
    /// The request fails if any fact matching `fail_if_events_match` exists
    /// strictly after the position of `after` (or anywhere, when `after` is
    /// `None`) — the dynamic consistency boundary check.
    TagQueryBased {
        fail_if_events_match: TagQuery,
        after: Option<FactId>,
    },
}

/// The outcome of a valid append request — reported as a value, never an
/// error. See [`StoreError`] for the separate, permanent-failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    Appended { positions: Vec<FactPosition> },
    AlreadyApplied,
    AppendConditionViolated { reason: String },
}

/// A batch write request. Constructed only through [`AppendRequest::new`],
/// which enforces the non-empty and id-uniqueness-within-request invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    pub facts: Vec<Fact>,
    pub idempotency_key: IdempotencyKey,
    pub condition: AppendCondition,
}

impl AppendRequest {
    pub fn new(
        facts: Vec<Fact>,
        idempotency_key: IdempotencyKey,
        condition: AppendCondition,
    ) -> Result<Self, StoreError> {
        if facts.is_empty() {
            return Err(StoreError::Invalid(
                "AppendRequest requires at least one fact".into(),
            ));
        }
        let mut seen = std::collections::HashSet::with_capacity(facts.len());
        let mut dupes = Vec::new();
        for fact in &facts {
            if !seen.insert(fact.id) {
                dupes.push(fact.id);
            }
        }
        if !dupes.is_empty() {
            return Err(StoreError::DuplicateFactId(dupes));
        }
        Ok(Self {
            facts,
            idempotency_key,
            condition,
        })
    }
}

/// Where a [`crate::streamer::Streamer`] session should begin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    /// Start before the first recorded position.
    Beginning,
    /// Start after the current last position; only facts committed after
    /// the call are emitted.
    End,
    /// Start strictly after the position of `factId`.
    After(FactId),
}

/// Recognized configuration options (§6); not a CLI surface.
#[derive(Debug, Clone)]
pub struct Config {
    /// How to reach the underlying engine (a file path for an embedded
    /// engine, a connection string for a networked one). Backend-specific.
    pub cluster_file: Option<String>,
    /// Engine protocol level, carried through but currently unused —
    /// reserved for a future engine generation.
    pub api_version: u32,
    /// Logical store identity; becomes part of every key. Default
    /// `"default"`.
    pub store_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_file: None,
            api_version: 1,
            store_name: "default".to_string(),
        }
    }
}
