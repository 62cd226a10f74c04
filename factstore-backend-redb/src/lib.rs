pub mod engine_redb;

pub use engine_redb::RedbEngine;

use std::path::Path;
use std::sync::Arc;

use factstore_core::errors::StoreError;

/// Convenience constructor matching [`factstore_core::Store`]'s own doc
/// comment: opens (creating if absent) a `redb` file at `path` and wraps it
/// in a `Store` named `store_name`.
pub fn open(path: &Path, store_name: &str) -> Result<factstore_core::Store<RedbEngine>, StoreError> {
    let engine = RedbEngine::open(path)?;
    Ok(factstore_core::Store::new(Arc::new(engine), store_name))
}
