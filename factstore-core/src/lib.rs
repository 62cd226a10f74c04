pub mod appender;
pub mod codec;
pub mod engine;
pub mod errors;
pub mod finder;
pub mod keyspace;
pub mod query;
pub mod store;
pub mod streamer;
pub mod types;

#[cfg(feature = "test-support")]
pub mod conformance;

pub use appender::Appender;
pub use engine::{Bound, Engine, KeyRange, ReadTransaction, Watchable, WatchHandle, WriteTransaction};
pub use errors::StoreError;
pub use finder::Finder;
pub use query::QueryEvaluator;
pub use store::Store;
pub use streamer::{FactStream, Streamer};
pub use types::{
    AppendCondition, AppendRequest, AppendResult, Config, Fact, FactId, FactPosition,
    IdempotencyKey, Metadata, Payload, StartPosition, Subject, TagQuery, TagQueryItem, Tags,
    Timestamp,
};
