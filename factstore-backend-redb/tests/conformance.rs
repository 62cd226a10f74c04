//! Proves `RedbEngine` conforms to the same black-box suite the in-memory
//! backend is held to, plus a restart test specific to a persistent engine:
//! reserved positions must never be reused after the process restarts.

use std::sync::Arc;

use factstore_backend_redb::RedbEngine;
use factstore_core::conformance;
use factstore_core::{Engine, WriteTransaction};

#[tokio::test]
async fn redb_backend_passes_conformance_suite() {
    let engine = Arc::new(RedbEngine::open_in_memory().expect("open in-memory redb engine"));
    conformance::run_all(engine.clone()).await;
    conformance::streaming_resume(engine).await;
}

#[tokio::test]
async fn positions_survive_restart() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("restart.redb");

    let first = Arc::new(RedbEngine::open(&path).expect("open redb engine"));
    conformance::run_all(first).await;

    let second = RedbEngine::open(&path).expect("reopen redb engine");
    let mut txn = second.begin_write().await.expect("begin write after reopen");
    let position = txn.reserve_position();
    assert!(
        position.0 > 0,
        "a reopened store must resume its position counter, not restart it at zero"
    );
}
