//! # arbor-sync
//!
//! Keeps a project's tree consistent between a live sandbox, the local
//! cache store and a remote repository.
//!
//! [`Coordinator`] is the entry point: Load, Save, Push, Pull, Init, Import,
//! plus project creation and deletion, each serialized per project.

pub mod cache_store;
pub mod coordinator;
pub mod error;
pub mod mirror;
pub mod reconcile;
pub mod remote;
pub mod session;

pub use cache_store::{CacheStore, CachedTree, DiskCacheStore};
pub use coordinator::Coordinator;
pub use error::{NotLinkedReason, SyncError};
pub use mirror::{PushOutcome, RemoteMirror};
pub use reconcile::{reconcile, Reconciled};
pub use remote::{
    connector_from_config, CommitInfo, ObjectId, RemoteConnector, RemoteError, RemoteStore,
};
pub use session::{LocalSandbox, Sandbox, SandboxError, ShellStream, SyncSession};
