//! Runs the shared black-box scenario suite against both shipped backends.
//! A future third backend only needs to add an equivalent pair of tests
//! here (or in its own crate, dev-depending on `factstore-core` with
//! `features = ["test-support"]`) to prove conformance.

use std::sync::Arc;

use factstore_backend_memory::MemoryEngine;
use factstore_backend_redb::RedbEngine;
use factstore_core::conformance;

#[tokio::test]
async fn memory_backend_passes_conformance_suite() {
    let engine = Arc::new(MemoryEngine::new());
    conformance::run_all(engine.clone()).await;
    conformance::streaming_resume(engine).await;
}

#[tokio::test]
async fn redb_backend_passes_conformance_suite() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("conformance.redb");
    let engine = Arc::new(RedbEngine::open(&path).expect("open redb engine"));
    conformance::run_all(engine.clone()).await;
    conformance::streaming_resume(engine).await;
}
