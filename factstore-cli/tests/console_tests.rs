//! Exercises `resolve_backend`'s env-var resolution, in the style of the
//! teacher's `resolve_backend` tests: set the variables, call it, restore
//! them. `#[serial]` because `std::env::set_var` is process-global and these
//! tests would otherwise race each other.

use factstore_cli::{resolve_backend, run_console, AnyStore};
use serial_test::serial;

fn set_env_and_get_prev(key: &str, val: Option<&str>) -> Option<String> {
    let prev = std::env::var(key).ok();
    match val {
        Some(v) => std::env::set_var(key, v),
        None => std::env::remove_var(key),
    }
    prev
}

fn restore_env(key: &str, prev: Option<String>) {
    match prev {
        Some(v) => std::env::set_var(key, v),
        None => std::env::remove_var(key),
    }
}

#[tokio::test]
#[serial]
async fn resolve_backend_defaults_to_memory() {
    let prev_backend = set_env_and_get_prev("BACKEND", None);
    let store = resolve_backend().await.expect("memory backend should resolve");
    assert!(matches!(store, AnyStore::Memory(_)));
    restore_env("BACKEND", prev_backend);
}

#[tokio::test]
#[serial]
async fn resolve_backend_redb_requires_path() {
    let prev_backend = set_env_and_get_prev("BACKEND", Some("redb"));
    let prev_path = set_env_and_get_prev("FACTSTORE_PATH", None);
    let result = resolve_backend().await;
    assert!(result.is_err(), "redb backend without FACTSTORE_PATH should error");
    restore_env("FACTSTORE_PATH", prev_path);
    restore_env("BACKEND", prev_backend);
}

#[tokio::test]
#[serial]
async fn resolve_backend_redb_opens_given_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("console.redb");

    let prev_backend = set_env_and_get_prev("BACKEND", Some("redb"));
    let prev_path = set_env_and_get_prev("FACTSTORE_PATH", Some(path.to_str().unwrap()));
    let store = resolve_backend().await.expect("redb backend should resolve");
    assert!(matches!(store, AnyStore::Redb(_)));
    restore_env("FACTSTORE_PATH", prev_path);
    restore_env("BACKEND", prev_backend);

    run_console(&store, b"append t s i hi\n".as_slice(), tokio::io::sink())
        .await
        .expect("console command should run");
}

#[tokio::test]
#[serial]
async fn resolve_backend_unsupported_errors() {
    let prev_backend = set_env_and_get_prev("BACKEND", Some("nope"));
    let result = resolve_backend().await;
    assert!(result.is_err(), "unsupported backend should error");
    let msg = format!("{:#}", result.err().unwrap());
    assert!(msg.contains("unsupported BACKEND"));
    restore_env("BACKEND", prev_backend);
}
