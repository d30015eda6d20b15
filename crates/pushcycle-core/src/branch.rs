//! Trigger branch names and derived branch state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Result, TriggerError};

/// Name of the ephemeral trigger branch (without `refs/heads/`).
///
/// Caller-supplied; uniqueness across concurrent invocations is the
/// caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Validate and wrap a branch name.
    ///
    /// Surrounding whitespace is trimmed. Empty names and names starting
    /// with `-` are rejected.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TriggerError::InvalidConfig(
                "branch name must not be empty".to_string(),
            ));
        }
        if trimmed.starts_with('-') {
            return Err(TriggerError::InvalidConfig(format!(
                "branch name must not start with '-': {trimmed}"
            )));
        }
        Ok(BranchName(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fully qualified local ref, `refs/heads/<name>`.
    pub fn local_ref(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    /// Refspec that deletes the branch on a remote.
    pub fn delete_refspec(&self) -> String {
        format!(":{}", self.local_ref())
    }

    /// Refspec that publishes the local branch under the same name.
    pub fn push_refspec(&self) -> String {
        let local = self.local_ref();
        format!("{local}:{local}")
    }

    /// Remote-tracking ref for this branch under `remote`.
    pub fn tracking_ref(&self, remote: &str) -> String {
        format!("refs/remotes/{}/{}", remote, self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = TriggerError;

    fn try_from(s: String) -> Result<Self> {
        BranchName::new(s)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl std::str::FromStr for BranchName {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self> {
        BranchName::new(s)
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a branch name currently exists. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchState {
    Absent,
    LocalOnly,
    RemoteOnly,
    LocalAndRemote,
}

impl BranchState {
    pub fn derive(
        name: &BranchName,
        local: &BTreeSet<BranchName>,
        remote: &BTreeSet<BranchName>,
    ) -> Self {
        match (local.contains(name), remote.contains(name)) {
            (false, false) => BranchState::Absent,
            (true, false) => BranchState::LocalOnly,
            (false, true) => BranchState::RemoteOnly,
            (true, true) => BranchState::LocalAndRemote,
        }
    }

    pub fn exists_locally(&self) -> bool {
        matches!(self, BranchState::LocalOnly | BranchState::LocalAndRemote)
    }

    pub fn exists_remotely(&self) -> bool {
        matches!(self, BranchState::RemoteOnly | BranchState::LocalAndRemote)
    }
}

/// Outcome of an idempotent branch deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchDeletion {
    Deleted,
    AlreadyAbsent,
}

impl BranchDeletion {
    pub fn was_deleted(&self) -> bool {
        matches!(self, BranchDeletion::Deleted)
    }
}
