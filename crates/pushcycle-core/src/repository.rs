//! Repository handle abstraction.
//!
//! The orchestrator performs every git query and mutation through
//! [`RepositoryHandle`]. Two implementations ship with the crate:
//! - [`crate::git::GitRepository`]: drives the `git` executable.
//! - [`crate::fakes::MemoryRepository`]: in-memory, for tests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crate::branch::{BranchDeletion, BranchName};
use crate::config::CommitIdentity;
use crate::error::{Result, TriggerError};
use crate::remote::RemoteDescriptor;

/// Object id of a commit: 40 (SHA-1) or 64 (SHA-256) lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(String);

impl CommitId {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if !matches!(s.len(), 40 | 64) || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TriggerError::RefOperation {
                command: "rev-parse".to_string(),
                stderr: format!("not a commit id: {s:?}"),
            });
        }
        Ok(CommitId(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Git state queries and mutations needed by a branch cycle.
///
/// Contract:
/// - Deletions are idempotent: a missing branch yields
///   [`BranchDeletion::AlreadyAbsent`], never an error.
/// - Remote operations fail with [`TriggerError::Authentication`] or
///   [`TriggerError::Network`] when the remote rejects credentials or cannot
///   be reached; other failures are [`TriggerError::RefOperation`].
/// - Nothing here prompts interactively.
pub trait RepositoryHandle {
    /// Root of the working tree.
    fn workdir(&self) -> &Path;

    fn list_local_branches(&self) -> Result<BTreeSet<BranchName>>;

    fn list_remote_branches(&self, remote: &RemoteDescriptor) -> Result<BTreeSet<BranchName>>;

    /// Branch HEAD points at, or `None` when detached.
    fn current_branch(&self) -> Result<Option<BranchName>>;

    /// Detach HEAD at the current commit so the current branch can be deleted.
    fn detach_head(&self) -> Result<()>;

    fn delete_local_branch(&self, name: &BranchName, force: bool) -> Result<BranchDeletion>;

    /// Delete `refs/heads/<name>` on the remote with an empty-ref push.
    fn delete_remote_branch(
        &self,
        remote: &RemoteDescriptor,
        name: &BranchName,
    ) -> Result<BranchDeletion>;

    /// Create `name` at the current HEAD.
    fn create_branch(&self, name: &BranchName) -> Result<()>;

    fn checkout(&self, name: &BranchName) -> Result<()>;

    /// Stage every change in the working tree, including untracked files
    /// and deletions.
    fn stage_all(&self) -> Result<()>;

    /// Commit the index. Must succeed when nothing changed.
    fn commit(
        &self,
        message: &str,
        author: &CommitIdentity,
        committer: &CommitIdentity,
    ) -> Result<CommitId>;

    /// Publish the local branch under the same name on the remote.
    fn push_branch(&self, remote: &RemoteDescriptor, name: &BranchName) -> Result<()>;

    /// URL configured for `remote_name`.
    fn remote_url(&self, remote_name: &str) -> Result<String>;

    fn set_remote_url(&self, remote_name: &str, url: &str) -> Result<()>;
}
