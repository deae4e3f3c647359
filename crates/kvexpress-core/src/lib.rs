//! kvexpress safe-apply engine
//!
//! Applies a desired-state value fetched from a key/value store onto a file on
//! disk:
//!
//! ```text
//!   KV fetch ──► length check ──► checksum check ──► lock check ──► diff
//!                    │                  │                 │           │
//!                    ▼                  ▼                 ▼           ▼
//!              RejectedTooShort   RejectedChecksum   RejectedLocked  NoChange
//!                                                                     │
//!                                         (content differs) ◄─────────┘
//!                                                 │
//!                                                 ▼
//!                      T.kvexpress ──write+chmod+chown──► rename ──► T
//!                                                                     │
//!                                                                     ▼
//!                                                     T.last ◄── snapshot
//! ```
//!
//! ## Filesystem layout per target `T`
//!
//! - `T`            live artifact (authoritative)
//! - `T.kvexpress`  staging file, exists only between write-start and rename
//! - `T.last`       last successfully committed content (advisory)
//! - `T.locked`     operator lock marker; its presence suspends writes
//!
//! Rejections (too short, checksum mismatch, locked, unchanged) are ordinary
//! [`ApplyOutcome`] values. Environment failures are [`ApplyError`]s and are
//! never downgraded to rejections.

pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod hook;
pub mod lock;
pub mod owner;
pub mod paths;
pub mod snapshot;
pub mod source;
pub mod status;
pub mod writer;

pub use config::{ApplyConfig, ChownPolicy, LockRequest, TargetSpec};
pub use engine::{ApplyOutcome, SafeApplyEngine};
pub use error::{ApplyError, FetchError};
pub use hook::{run_post_exec, HookStatus};
pub use lock::LockGuard;
pub use owner::{FixedOwners, OwnerIds, OwnerResolver};
#[cfg(unix)]
pub use owner::SystemOwners;
pub use snapshot::SnapshotStore;
pub use source::{DesiredState, KeyPaths, KvFetch, MemoryKv};
pub use status::{status, TargetStatus};
pub use writer::{AtomicFileWriter, StagedWrite};
