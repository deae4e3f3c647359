//! Integration tests for the complete kvexpress apply cycle
//!
//! These tests drive the core engine the way `kvexpress out` does:
//! - KV store → DesiredState → SafeApplyEngine → target file
//! - lock marker → rejection → unlock → commit
//!
//! Run with: cargo test --test integration_tests

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use tempfile::tempdir;

use kvexpress_core::{
    checksum, ApplyConfig, ApplyOutcome, AtomicFileWriter, ChownPolicy, DesiredState, FixedOwners,
    KeyPaths, LockGuard, LockRequest, MemoryKv, SafeApplyEngine, SystemOwners, TargetSpec,
};

fn engine(min_length: usize) -> SafeApplyEngine {
    let config = ApplyConfig {
        min_length,
        chown_policy: ChownPolicy::Required,
        post_exec: None,
    };
    SafeApplyEngine::new(config, Arc::new(FixedOwners(SystemOwners::current())))
}

// ============================================================================
// Commit, no-op rerun, then lock
// ============================================================================

#[test]
fn test_commit_rerun_and_lock_cycle() {
    let dir = tempdir().unwrap();
    let target_path = dir.path().join("etc/service.conf");
    let target = TargetSpec::new(&target_path, 0o644, None).unwrap();
    let engine = engine(10);

    let first = "0123456789".repeat(5);
    assert_eq!(first.len(), 50);
    let state = DesiredState::new(first.as_bytes(), checksum::compute(first.as_bytes()), 10);

    let outcome = engine.apply(&state, &target).unwrap();
    assert!(outcome.is_committed());
    assert_eq!(fs::read(&target_path).unwrap(), first.as_bytes());
    let mode = fs::metadata(&target_path).unwrap().permissions().mode() & 0o7777;
    assert_eq!(mode, 0o644);

    let before = fs::metadata(&target_path).unwrap().modified().unwrap();
    assert_eq!(engine.apply(&state, &target).unwrap(), ApplyOutcome::NoChange);
    let after = fs::metadata(&target_path).unwrap().modified().unwrap();
    assert_eq!(before, after);

    fs::write(dir.path().join("etc/service.conf.locked"), "held\n").unwrap();
    let second = "abcdefghij".repeat(5);
    let state = DesiredState::new(second.as_bytes(), checksum::compute(second.as_bytes()), 10);
    assert_eq!(engine.apply(&state, &target).unwrap(), ApplyOutcome::RejectedLocked);
    assert_eq!(fs::read(&target_path).unwrap(), first.as_bytes());
}

// ============================================================================
// KV store → engine
// ============================================================================

#[test]
fn test_fetch_and_apply_from_memory_store() {
    let dir = tempdir().unwrap();
    let target_path = dir.path().join("hosts");
    let target = TargetSpec::new(&target_path, 0o640, None).unwrap();
    let engine = engine(10);

    let paths = KeyPaths::new("kvexpress", "hosts");
    let mut kv = MemoryKv::new();
    kv.publish(&paths, b"127.0.0.1 localhost\n");

    let outcome = engine.fetch_and_apply(&kv, &paths, &target).unwrap();
    assert!(outcome.is_committed());
    assert_eq!(fs::read(&target_path).unwrap(), b"127.0.0.1 localhost\n");
    assert_eq!(
        engine.snapshots().load(&target_path).as_deref(),
        Some(&b"127.0.0.1 localhost\n"[..])
    );

    // A store that lost the key yields nothing to write.
    let empty = MemoryKv::new();
    let outcome = engine.fetch_and_apply(&empty, &paths, &target).unwrap();
    assert!(matches!(outcome, ApplyOutcome::RejectedTooShort { length: 0, .. }));
    assert_eq!(fs::read(&target_path).unwrap(), b"127.0.0.1 localhost\n");
}

#[test]
fn test_lock_guard_round_trip_with_engine() {
    let dir = tempdir().unwrap();
    let target_path = dir.path().join("app.conf");
    let target = TargetSpec::new(&target_path, 0o600, None).unwrap();
    let engine = engine(1);

    let writer = AtomicFileWriter::new(
        Arc::new(FixedOwners(SystemOwners::current())),
        ChownPolicy::Required,
    );
    let guard = LockGuard::new(writer);
    assert!(guard
        .lock(&target, &LockRequest { reason: "maintenance".to_string() })
        .unwrap());
    assert!(LockGuard::is_locked(&target_path).unwrap());

    let state = DesiredState::new("content".as_bytes(), checksum::compute(b"content"), 1);
    assert_eq!(engine.apply(&state, &target).unwrap(), ApplyOutcome::RejectedLocked);
    assert!(!target_path.exists());

    assert!(LockGuard::unlock(&target_path).unwrap());
    assert!(engine.apply(&state, &target).unwrap().is_committed());
    assert_eq!(fs::read_to_string(&target_path).unwrap(), "content");
}
