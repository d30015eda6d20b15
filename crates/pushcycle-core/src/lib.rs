//! pushcycle core library
//!
//! Triggers an external CI build by publishing a short-lived branch: any
//! stale branch of the same name is removed, the workspace is committed to a
//! fresh branch, the branch is pushed, and after the trigger window it is
//! deleted from the remote again.

pub mod branch;
pub mod config;
pub mod error;
pub mod fakes;
pub mod git;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod remote;
pub mod repository;
pub mod stage;
pub mod telemetry;
pub mod waiter;
pub mod workspace;

pub use branch::{BranchDeletion, BranchName, BranchState};
pub use config::{
    CommitIdentity, CredentialSource, CycleConfig, DEFAULT_POLL_INTERVAL, DEFAULT_REMOTE,
    DEFAULT_TRIGGER_WAIT,
};
pub use error::{CycleError, Result, TriggerError};
pub use git::GitRepository;
pub use orchestrator::{BranchCycleOrchestrator, CycleReport, ReconcileOutcome, WaitOutcome};
pub use remote::{CredentialInjection, Credentials, RemoteDescriptor};
pub use repository::{CommitId, RepositoryHandle};
pub use stage::{CycleStage, CycleStep};
pub use waiter::{HttpStatusProbe, Interrupt, InterruptibleWaiter, TriggerProbe, Waiter};
pub use workspace::purge_gitignore_files;

/// Crate version, for `--version` output and user agents.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
