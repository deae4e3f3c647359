//! The apply sequence.
//!
//! ```text
//! Fetched → LengthChecked → ChecksumChecked → LockChecked → DiffEvaluated → Committed
//!               │                 │                │              │
//!               ▼                 ▼                ▼              ▼
//!        RejectedTooShort  RejectedChecksum  RejectedLocked    NoChange
//! ```
//!
//! Each gate runs only if the previous one passed. Nothing on disk is mutated
//! before `Committed`, and the snapshot is only updated after the target
//! rename succeeded.

use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use crate::checksum;
use crate::config::{ApplyConfig, TargetSpec};
use crate::error::ApplyError;
use crate::hook::{run_post_exec, HookStatus};
use crate::lock::LockGuard;
use crate::owner::OwnerResolver;
use crate::snapshot::SnapshotStore;
use crate::source::{DesiredState, KeyPaths, KvFetch};
use crate::writer::AtomicFileWriter;

/// How an apply attempt ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The target now holds the new content. `hook` is set if a post-commit
    /// command was configured.
    Committed { hook: Option<HookStatus> },
    /// Target already holds identical content; nothing was written.
    NoChange,
    RejectedTooShort { length: usize, min_length: usize },
    RejectedChecksumMismatch { expected: String, actual: String },
    RejectedLocked,
}

impl ApplyOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, ApplyOutcome::Committed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApplyOutcome::Committed { .. } => "committed",
            ApplyOutcome::NoChange => "no_change",
            ApplyOutcome::RejectedTooShort { .. } => "rejected_too_short",
            ApplyOutcome::RejectedChecksumMismatch { .. } => "rejected_checksum_mismatch",
            ApplyOutcome::RejectedLocked => "rejected_locked",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafeApplyEngine {
    config: ApplyConfig,
    writer: AtomicFileWriter,
    snapshots: SnapshotStore,
}

impl SafeApplyEngine {
    pub fn new(config: ApplyConfig, owners: Arc<dyn OwnerResolver>) -> Self {
        let writer = AtomicFileWriter::new(owners, config.chown_policy);
        Self {
            snapshots: SnapshotStore::new(writer.clone()),
            writer,
            config,
        }
    }

    pub fn config(&self) -> &ApplyConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Fetch `paths` from `kv` (with the configured minimum length) and apply.
    pub fn fetch_and_apply(
        &self,
        kv: &dyn KvFetch,
        paths: &KeyPaths,
        target: &TargetSpec,
    ) -> Result<ApplyOutcome, ApplyError> {
        let state = DesiredState::fetch(kv, paths, self.config.min_length);
        self.apply(&state, target)
    }

    pub fn apply(&self, state: &DesiredState, target: &TargetSpec) -> Result<ApplyOutcome, ApplyError> {
        let path = target.path();
        if !path.is_absolute() {
            return Err(ApplyError::RelativePath(path.to_path_buf()).logged());
        }

        let length = state.content.len();
        let long_enough = length >= state.min_length;
        tracing::info!(long_enough, length, min_length = state.min_length, "length check");
        if !long_enough {
            return Ok(ApplyOutcome::RejectedTooShort {
                length,
                min_length: state.min_length,
            });
        }

        let actual = checksum::compute(&state.content);
        let checksum_match = checksum::matches(&state.content, &state.checksum);
        tracing::info!(checksum_match, "checksum check");
        if !checksum_match {
            return Ok(ApplyOutcome::RejectedChecksumMismatch {
                expected: state.checksum.clone(),
                actual,
            });
        }

        if LockGuard::is_locked(path).map_err(ApplyError::logged)? {
            tracing::info!(locked = true, location = %path.display(), "target is locked; not writing");
            return Ok(ApplyOutcome::RejectedLocked);
        }

        if self.target_matches(target, &actual)? {
            tracing::info!(location = %path.display(), "target has the same checksum; stopping");
            return Ok(ApplyOutcome::NoChange);
        }

        self.writer.write(&state.content, target)?;
        self.snapshots.save(target, &state.content)?;
        tracing::info!(location = %path.display(), bytes = length, "wrote file");

        let hook = self.config.post_exec.as_deref().map(run_post_exec);
        Ok(ApplyOutcome::Committed { hook })
    }

    /// Compare the live target (not the snapshot) against `digest`.
    fn target_matches(&self, target: &TargetSpec, digest: &str) -> Result<bool, ApplyError> {
        let path = target.path();
        match fs::metadata(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(location = %path.display(), "no existing file");
                return Ok(false);
            }
            Ok(meta) if meta.is_dir() => {
                return Err(ApplyError::TargetIsDirectory(path.to_path_buf()).logged());
            }
            _ => {}
        }

        // An unreadable target is treated as different; the write that follows
        // surfaces any real permission problem.
        match fs::read(path) {
            Ok(current) => Ok(checksum::compute(&current) == digest),
            Err(e) => {
                tracing::warn!(location = %path.display(), error = %e, "could not read existing file");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChownPolicy, LockRequest};
    use crate::owner::{FixedOwners, OwnerIds};
    use crate::paths::last_path;
    use tempfile::tempdir;

    fn engine(config: ApplyConfig) -> SafeApplyEngine {
        let ids = OwnerIds { uid: 0, gid: 0 };
        let config = ApplyConfig {
            chown_policy: ChownPolicy::BestEffort,
            ..config
        };
        SafeApplyEngine::new(config, Arc::new(FixedOwners(ids)))
    }

    fn valid(content: &[u8]) -> DesiredState {
        DesiredState::new(content, checksum::compute(content), 10)
    }

    #[test]
    fn commit_writes_target_and_snapshot() {
        let dir = tempdir().unwrap();
        let target = TargetSpec::new(dir.path().join("app.conf"), 0o640, None).unwrap();
        let e = engine(ApplyConfig::default());

        let outcome = e.apply(&valid(b"server=10.0.0.1\n"), &target).unwrap();
        assert_eq!(outcome, ApplyOutcome::Committed { hook: None });
        assert_eq!(fs::read(target.path()).unwrap(), b"server=10.0.0.1\n");
        assert_eq!(fs::read(last_path(target.path())).unwrap(), b"server=10.0.0.1\n");
    }

    #[test]
    fn same_content_is_a_no_change() {
        let dir = tempdir().unwrap();
        let target = TargetSpec::new(dir.path().join("app.conf"), 0o640, None).unwrap();
        let e = engine(ApplyConfig::default());

        e.apply(&valid(b"server=10.0.0.1\n"), &target).unwrap();
        let before = fs::metadata(target.path()).unwrap().modified().unwrap();
        let outcome = e.apply(&valid(b"server=10.0.0.1\n"), &target).unwrap();
        assert_eq!(outcome, ApplyOutcome::NoChange);
        assert_eq!(fs::metadata(target.path()).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn short_content_is_rejected_before_anything_else() {
        let dir = tempdir().unwrap();
        let target = TargetSpec::new(dir.path().join("app.conf"), 0o640, None).unwrap();
        let outcome = engine(ApplyConfig::default())
            .apply(&DesiredState::new(&b"tiny"[..], "bogus", 10), &target)
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::RejectedTooShort {
                length: 4,
                min_length: 10
            }
        );
        assert!(!target.path().exists());
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let dir = tempdir().unwrap();
        let target = TargetSpec::new(dir.path().join("app.conf"), 0o640, None).unwrap();
        let state = DesiredState::new(&b"long enough content"[..], checksum::compute(b"other"), 10);
        let outcome = engine(ApplyConfig::default()).apply(&state, &target).unwrap();
        assert!(matches!(outcome, ApplyOutcome::RejectedChecksumMismatch { .. }));
        assert!(!target.path().exists());
    }

    #[test]
    fn locked_target_is_not_written() {
        let dir = tempdir().unwrap();
        let target = TargetSpec::new(dir.path().join("app.conf"), 0o640, None).unwrap();
        let e = engine(ApplyConfig::default());
        e.apply(&valid(b"first version\n"), &target).unwrap();

        LockGuard::new(e.writer.clone())
            .lock(&target, &LockRequest { reason: "test".into() })
            .unwrap();
        let outcome = e.apply(&valid(b"second version\n"), &target).unwrap();
        assert_eq!(outcome, ApplyOutcome::RejectedLocked);
        assert_eq!(fs::read(target.path()).unwrap(), b"first version\n");
        assert_eq!(fs::read(last_path(target.path())).unwrap(), b"first version\n");
    }

    struct RefusingOwners;

    impl OwnerResolver for RefusingOwners {
        fn resolve(&self, owner: Option<&str>) -> Result<OwnerIds, ApplyError> {
            Err(ApplyError::ResolveOwner {
                owner: owner.unwrap_or_default().to_string(),
                message: "no such user".to_string(),
            })
        }
    }

    #[test]
    fn failed_write_leaves_target_and_snapshot_at_prior_commit() {
        let dir = tempdir().unwrap();
        let target = TargetSpec::new(dir.path().join("app.conf"), 0o640, None).unwrap();
        engine(ApplyConfig::default())
            .apply(&valid(b"prior content\n"), &target)
            .unwrap();

        let failing = SafeApplyEngine::new(
            ApplyConfig {
                chown_policy: ChownPolicy::Required,
                ..ApplyConfig::default()
            },
            Arc::new(RefusingOwners),
        );
        let err = failing
            .apply(&valid(b"replacement content\n"), &target)
            .unwrap_err();
        assert!(matches!(err, ApplyError::ResolveOwner { .. }));

        assert_eq!(fs::read(target.path()).unwrap(), b"prior content\n");
        assert_eq!(fs::read(last_path(target.path())).unwrap(), b"prior content\n");
        assert!(!crate::paths::temp_path(target.path()).exists());
    }

    #[test]
    fn unreadable_lock_state_stops_the_apply() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("blocker"), b"x").unwrap();
        let target = TargetSpec::new(dir.path().join("blocker/app.conf"), 0o640, None).unwrap();

        let err = engine(ApplyConfig::default())
            .apply(&valid(b"some content here"), &target)
            .unwrap_err();
        assert!(matches!(err, ApplyError::CheckLock { .. }));
        assert_eq!(fs::read(dir.path().join("blocker")).unwrap(), b"x");
    }

    #[test]
    fn directory_at_target_is_fatal() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("app.conf")).unwrap();
        let target = TargetSpec::new(dir.path().join("app.conf"), 0o640, None).unwrap();
        let err = engine(ApplyConfig::default())
            .apply(&valid(b"some content here"), &target)
            .unwrap_err();
        assert!(matches!(err, ApplyError::TargetIsDirectory(_)));
    }

    #[test]
    fn relative_path_built_by_hand_is_fatal() {
        let target = TargetSpec {
            path: "relative/app.conf".into(),
            mode: 0o640,
            owner: None,
        };
        let err = engine(ApplyConfig::default())
            .apply(&valid(b"some content here"), &target)
            .unwrap_err();
        assert!(matches!(err, ApplyError::RelativePath(_)));
    }

    #[cfg(unix)]
    #[test]
    fn post_exec_runs_only_after_commit() {
        let dir = tempdir().unwrap();
        let counter = dir.path().join("ran");
        let target = TargetSpec::new(dir.path().join("app.conf"), 0o640, None).unwrap();
        let e = engine(ApplyConfig {
            post_exec: Some(format!("echo x >> '{}'", counter.display())),
            ..ApplyConfig::default()
        });

        let outcome = e.apply(&valid(b"content one\n"), &target).unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Committed {
                hook: Some(HookStatus::Succeeded)
            }
        );
        // Unchanged and rejected applies do not run the command.
        e.apply(&valid(b"content one\n"), &target).unwrap();
        e.apply(&DesiredState::new(&b"x"[..], "", 10), &target).unwrap();

        assert_eq!(fs::read_to_string(&counter).unwrap(), "x\n");
    }

    #[test]
    fn fetch_failure_is_rejected_as_too_short() {
        let dir = tempdir().unwrap();
        let target = TargetSpec::new(dir.path().join("app.conf"), 0o640, None).unwrap();
        let paths = KeyPaths::new("kvexpress", "missing");
        let outcome = engine(ApplyConfig::default())
            .fetch_and_apply(&crate::source::MemoryKv::new(), &paths, &target)
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::RejectedTooShort { length: 0, .. }));
    }
}
