pub mod engine_memory;

pub use engine_memory::MemoryEngine;

/// Convenience constructor matching [`factstore_core::Store`]'s own doc
/// comment: a fresh in-process store, ready to use, no configuration.
pub fn open(store_name: &str) -> factstore_core::Store<MemoryEngine> {
    factstore_core::Store::new(std::sync::Arc::new(MemoryEngine::new()), store_name)
}
