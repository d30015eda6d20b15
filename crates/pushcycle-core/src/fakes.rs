//! In-memory fakes for the cycle's collaborators (testing only)
//!
//! Provides `MemoryRepository`, `RecordingWaiter` and `ScriptedProbe`, which
//! satisfy the trait contracts without touching git, the clock, or the
//! network. Every fake records what it was asked to do.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::branch::{BranchDeletion, BranchName};
use crate::config::CommitIdentity;
use crate::error::{Result, TriggerError};
use crate::remote::RemoteDescriptor;
use crate::repository::{CommitId, RepositoryHandle};
use crate::stage::CycleStep;
use crate::waiter::{TriggerProbe, Waiter};

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

/// Operations a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    ListRemote,
    DeleteRemote,
    Commit,
    Push,
}

/// Kind of error an injected failure produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Authentication,
    Network,
    RefOperation,
}

impl InjectedFailure {
    fn into_error(self, remote: &str) -> TriggerError {
        match self {
            InjectedFailure::Authentication => TriggerError::Authentication {
                remote: remote.to_string(),
                stderr: "fatal: Authentication failed".to_string(),
            },
            InjectedFailure::Network => TriggerError::Network {
                remote: remote.to_string(),
                stderr: "fatal: Could not resolve host".to_string(),
            },
            InjectedFailure::RefOperation => TriggerError::RefOperation {
                command: "injected".to_string(),
                stderr: "injected failure".to_string(),
            },
        }
    }
}

/// A call made against the fake, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCall {
    ListLocal,
    ListRemote { target: String },
    CurrentBranch,
    DetachHead,
    DeleteLocal { branch: BranchName, force: bool },
    DeleteRemote { branch: BranchName, target: String },
    CreateBranch { branch: BranchName },
    Checkout { branch: BranchName },
    StageAll,
    Commit { message: String },
    Push { branch: BranchName, target: String },
    RemoteUrl { remote: String },
    SetRemoteUrl { remote: String, url: String },
}

impl RepoCall {
    pub fn is_remote_delete(&self) -> bool {
        matches!(self, RepoCall::DeleteRemote { .. })
    }
}

/// A commit created through [`RepositoryHandle::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub id: CommitId,
    pub parent: CommitId,
    pub message: String,
    pub author: CommitIdentity,
    pub committer: CommitIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Head {
    Branch(BranchName),
    Detached(CommitId),
}

#[derive(Debug)]
struct RepoState {
    local: BTreeMap<BranchName, CommitId>,
    remote: BTreeMap<BranchName, CommitId>,
    head: Head,
    commits: Vec<RecordedCommit>,
    remote_urls: BTreeMap<String, String>,
    failures: HashMap<FailPoint, InjectedFailure>,
    calls: Vec<RepoCall>,
    next_commit: u64,
}

impl RepoState {
    fn mint_commit(&mut self) -> CommitId {
        self.next_commit += 1;
        // Always 40 hex chars.
        CommitId::parse(&format!("{:040x}", self.next_commit)).expect("40 hex chars")
    }

    fn head_commit(&self) -> Option<CommitId> {
        match &self.head {
            Head::Branch(name) => self.local.get(name).cloned(),
            Head::Detached(id) => Some(id.clone()),
        }
    }

    fn check(&self, point: FailPoint, remote: &str) -> Result<()> {
        match self.failures.get(&point) {
            Some(failure) => Err(failure.into_error(remote)),
            None => Ok(()),
        }
    }
}

fn ref_error(command: &str, stderr: String) -> TriggerError {
    TriggerError::RefOperation {
        command: command.to_string(),
        stderr,
    }
}

/// In-memory repository with a single remote, backed by branch maps.
///
/// Starts with one commit on `main`, checked out, and `origin` pointing at
/// `https://git.example.com/r.git`. Clones share state, so a test can keep a
/// handle while the orchestrator owns another.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    workdir: PathBuf,
    state: Arc<Mutex<RepoState>>,
}

impl MemoryRepository {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let main = BranchName::new("main").expect("valid branch name");
        let mut state = RepoState {
            local: BTreeMap::new(),
            remote: BTreeMap::new(),
            head: Head::Branch(main.clone()),
            commits: Vec::new(),
            remote_urls: BTreeMap::new(),
            failures: HashMap::new(),
            calls: Vec::new(),
            next_commit: 0,
        };
        let root = state.mint_commit();
        state.local.insert(main.clone(), root.clone());
        state.remote.insert(main, root);
        state
            .remote_urls
            .insert("origin".to_string(), "https://git.example.com/r.git".to_string());
        Self {
            workdir: workdir.into(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RepoState> {
        self.state.lock().unwrap()
    }

    pub fn with_remote_url(self, remote: &str, url: &str) -> Self {
        self.lock()
            .remote_urls
            .insert(remote.to_string(), url.to_string());
        self
    }

    /// Create a local branch at the current HEAD commit.
    pub fn seed_local_branch(&self, name: &str) {
        let mut state = self.lock();
        let head = state.head_commit().expect("HEAD has a commit");
        state
            .local
            .insert(BranchName::new(name).expect("valid branch name"), head);
    }

    /// Create a branch on the remote at the current HEAD commit.
    pub fn seed_remote_branch(&self, name: &str) {
        let mut state = self.lock();
        let head = state.head_commit().expect("HEAD has a commit");
        state
            .remote
            .insert(BranchName::new(name).expect("valid branch name"), head);
    }

    /// Check out an existing local branch without recording a call.
    pub fn seed_checkout(&self, name: &str) {
        let name = BranchName::new(name).expect("valid branch name");
        let mut state = self.lock();
        assert!(state.local.contains_key(&name), "seed the branch first");
        state.head = Head::Branch(name);
    }

    pub fn fail_on(&self, point: FailPoint, failure: InjectedFailure) {
        self.lock().failures.insert(point, failure);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn local_branches(&self) -> BTreeSet<BranchName> {
        self.lock().local.keys().cloned().collect()
    }

    pub fn remote_branches(&self) -> BTreeSet<BranchName> {
        self.lock().remote.keys().cloned().collect()
    }

    pub fn local_tip(&self, name: &str) -> Option<CommitId> {
        let name = BranchName::new(name).ok()?;
        self.lock().local.get(&name).cloned()
    }

    pub fn checked_out(&self) -> Option<BranchName> {
        match &self.lock().head {
            Head::Branch(name) => Some(name.clone()),
            Head::Detached(_) => None,
        }
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.lock().commits.clone()
    }

    pub fn calls(&self) -> Vec<RepoCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

impl RepositoryHandle for MemoryRepository {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn list_local_branches(&self) -> Result<BTreeSet<BranchName>> {
        let mut state = self.lock();
        state.calls.push(RepoCall::ListLocal);
        Ok(state.local.keys().cloned().collect())
    }

    fn list_remote_branches(&self, remote: &RemoteDescriptor) -> Result<BTreeSet<BranchName>> {
        let mut state = self.lock();
        state.calls.push(RepoCall::ListRemote {
            target: remote.target().to_string(),
        });
        state.check(FailPoint::ListRemote, &remote.redacted_target())?;
        Ok(state.remote.keys().cloned().collect())
    }

    fn current_branch(&self) -> Result<Option<BranchName>> {
        let mut state = self.lock();
        state.calls.push(RepoCall::CurrentBranch);
        Ok(match &state.head {
            Head::Branch(name) => Some(name.clone()),
            Head::Detached(_) => None,
        })
    }

    fn detach_head(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RepoCall::DetachHead);
        let head = state
            .head_commit()
            .ok_or_else(|| ref_error("checkout --detach", "HEAD has no commit".to_string()))?;
        state.head = Head::Detached(head);
        Ok(())
    }

    fn delete_local_branch(&self, name: &BranchName, force: bool) -> Result<BranchDeletion> {
        let mut state = self.lock();
        state.calls.push(RepoCall::DeleteLocal {
            branch: name.clone(),
            force,
        });
        if state.head == Head::Branch(name.clone()) {
            return Err(ref_error(
                "branch -D",
                format!("error: cannot delete branch '{name}' used by worktree"),
            ));
        }
        Ok(match state.local.remove(name) {
            Some(_) => BranchDeletion::Deleted,
            None => BranchDeletion::AlreadyAbsent,
        })
    }

    fn delete_remote_branch(
        &self,
        remote: &RemoteDescriptor,
        name: &BranchName,
    ) -> Result<BranchDeletion> {
        let mut state = self.lock();
        state.calls.push(RepoCall::DeleteRemote {
            branch: name.clone(),
            target: remote.target().to_string(),
        });
        state.check(FailPoint::DeleteRemote, &remote.redacted_target())?;
        Ok(match state.remote.remove(name) {
            Some(_) => BranchDeletion::Deleted,
            None => BranchDeletion::AlreadyAbsent,
        })
    }

    fn create_branch(&self, name: &BranchName) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RepoCall::CreateBranch {
            branch: name.clone(),
        });
        if state.local.contains_key(name) {
            return Err(ref_error(
                "branch",
                format!("fatal: a branch named '{name}' already exists"),
            ));
        }
        let head = state
            .head_commit()
            .ok_or_else(|| ref_error("branch", "HEAD has no commit".to_string()))?;
        state.local.insert(name.clone(), head);
        Ok(())
    }

    fn checkout(&self, name: &BranchName) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RepoCall::Checkout {
            branch: name.clone(),
        });
        if !state.local.contains_key(name) {
            return Err(ref_error(
                "checkout",
                format!("error: pathspec '{name}' did not match any file(s) known to git"),
            ));
        }
        state.head = Head::Branch(name.clone());
        Ok(())
    }

    fn stage_all(&self) -> Result<()> {
        self.lock().calls.push(RepoCall::StageAll);
        Ok(())
    }

    fn commit(
        &self,
        message: &str,
        author: &CommitIdentity,
        committer: &CommitIdentity,
    ) -> Result<CommitId> {
        let mut state = self.lock();
        state.calls.push(RepoCall::Commit {
            message: message.to_string(),
        });
        state.check(FailPoint::Commit, "local")?;

        let parent = state
            .head_commit()
            .ok_or_else(|| ref_error("commit", "HEAD has no commit".to_string()))?;
        let id = state.mint_commit();
        match state.head.clone() {
            Head::Branch(name) => {
                state.local.insert(name, id.clone());
            }
            Head::Detached(_) => state.head = Head::Detached(id.clone()),
        }
        state.commits.push(RecordedCommit {
            id: id.clone(),
            parent,
            message: message.to_string(),
            author: author.clone(),
            committer: committer.clone(),
        });
        Ok(id)
    }

    fn push_branch(&self, remote: &RemoteDescriptor, name: &BranchName) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RepoCall::Push {
            branch: name.clone(),
            target: remote.target().to_string(),
        });
        state.check(FailPoint::Push, &remote.redacted_target())?;

        let tip = state.local.get(name).cloned().ok_or_else(|| {
            ref_error("push", format!("error: src refspec {name} does not match any"))
        })?;
        if let Some(existing) = state.remote.get(name) {
            if *existing != tip {
                return Err(ref_error(
                    "push",
                    format!(" ! [rejected]        {name} -> {name} (non-fast-forward)"),
                ));
            }
        }
        state.remote.insert(name.clone(), tip);
        Ok(())
    }

    fn remote_url(&self, remote_name: &str) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(RepoCall::RemoteUrl {
            remote: remote_name.to_string(),
        });
        state
            .remote_urls
            .get(remote_name)
            .cloned()
            .ok_or_else(|| TriggerError::RemoteNotConfigured {
                remote: remote_name.to_string(),
            })
    }

    fn set_remote_url(&self, remote_name: &str, url: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(RepoCall::SetRemoteUrl {
            remote: remote_name.to_string(),
            url: url.to_string(),
        });
        if !state.remote_urls.contains_key(remote_name) {
            return Err(TriggerError::RemoteNotConfigured {
                remote: remote_name.to_string(),
            });
        }
        state
            .remote_urls
            .insert(remote_name.to_string(), url.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingWaiter
// ---------------------------------------------------------------------------

/// Waiter that returns immediately and records requested durations.
///
/// `interrupt_at(n)` makes the n-th wait (0-based) fail as interrupted.
#[derive(Debug, Clone, Default)]
pub struct RecordingWaiter {
    waits: Arc<Mutex<Vec<Duration>>>,
    interrupt_at: Option<usize>,
}

impl RecordingWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt_at(mut self, call: usize) -> Self {
        self.interrupt_at = Some(call);
        self
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.waits().iter().sum()
    }
}

impl Waiter for RecordingWaiter {
    fn wait(&self, duration: Duration) -> Result<()> {
        let mut waits = self.waits.lock().unwrap();
        let call = waits.len();
        waits.push(duration);
        if self.interrupt_at == Some(call) {
            return Err(TriggerError::Interrupted {
                step: CycleStep::Wait,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedProbe
// ---------------------------------------------------------------------------

/// Probe that replays a fixed script of answers, then answers `false`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    script: Arc<Mutex<VecDeque<std::result::Result<bool, String>>>>,
    polls: Arc<Mutex<usize>>,
}

impl ScriptedProbe {
    pub fn new(script: Vec<std::result::Result<bool, String>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            polls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn polls(&self) -> usize {
        *self.polls.lock().unwrap()
    }
}

impl TriggerProbe for ScriptedProbe {
    fn confirmed(&self) -> Result<bool> {
        *self.polls.lock().unwrap() += 1;
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(message)) => Err(TriggerError::Probe(message)),
            None => Ok(false),
        }
    }

    fn describe(&self) -> String {
        "scripted probe".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    fn origin() -> RemoteDescriptor {
        RemoteDescriptor::ambient("origin", "https://git.example.com/r.git")
    }

    #[test]
    fn test_memory_repository_starts_on_main() {
        let repo = MemoryRepository::new("/ws");
        assert_eq!(repo.checked_out(), Some(branch("main")));
        assert!(repo.local_branches().contains(&branch("main")));
        assert!(repo.remote_branches().contains(&branch("main")));
        assert_eq!(repo.workdir(), Path::new("/ws"));
    }

    #[test]
    fn test_memory_repository_refuses_to_delete_checked_out_branch() {
        let repo = MemoryRepository::new("/ws");
        let err = repo.delete_local_branch(&branch("main"), true).unwrap_err();
        assert_eq!(err.kind(), "ref_operation");

        repo.detach_head().unwrap();
        assert_eq!(
            repo.delete_local_branch(&branch("main"), true).unwrap(),
            BranchDeletion::Deleted
        );
    }

    #[test]
    fn test_memory_repository_deletes_are_idempotent() {
        let repo = MemoryRepository::new("/ws");
        repo.seed_remote_branch("t");
        assert_eq!(
            repo.delete_remote_branch(&origin(), &branch("t")).unwrap(),
            BranchDeletion::Deleted
        );
        assert_eq!(
            repo.delete_remote_branch(&origin(), &branch("t")).unwrap(),
            BranchDeletion::AlreadyAbsent
        );
        assert_eq!(
            repo.delete_local_branch(&branch("t"), true).unwrap(),
            BranchDeletion::AlreadyAbsent
        );
    }

    #[test]
    fn test_memory_repository_commit_advances_branch() {
        let repo = MemoryRepository::new("/ws");
        let before = repo.local_tip("main").unwrap();
        let identity = CommitIdentity::default();
        let id = repo.commit("msg", &identity, &identity).unwrap();
        assert_eq!(repo.local_tip("main"), Some(id.clone()));
        assert_eq!(repo.commits()[0].parent, before);
    }

    #[test]
    fn test_memory_repository_injected_push_failure() {
        let repo = MemoryRepository::new("/ws");
        repo.fail_on(FailPoint::Push, InjectedFailure::Authentication);
        let err = repo.push_branch(&origin(), &branch("main")).unwrap_err();
        assert_eq!(err.kind(), "authentication");

        repo.clear_failures();
        repo.push_branch(&origin(), &branch("main")).unwrap();
    }

    #[test]
    fn test_memory_repository_remote_url() {
        let repo = MemoryRepository::new("/ws");
        assert_eq!(
            repo.remote_url("origin").unwrap(),
            "https://git.example.com/r.git"
        );
        assert!(repo.remote_url("upstream").is_err());
        repo.set_remote_url("origin", "https://git.example.com/x.git")
            .unwrap();
        assert_eq!(
            repo.remote_url("origin").unwrap(),
            "https://git.example.com/x.git"
        );
    }

    #[test]
    fn test_recording_waiter_interrupts_on_request() {
        let waiter = RecordingWaiter::new().interrupt_at(1);
        waiter.wait(Duration::from_secs(1)).unwrap();
        assert!(waiter.wait(Duration::from_secs(2)).unwrap_err().is_interrupted());
        assert_eq!(waiter.total(), Duration::from_secs(3));
    }

    #[test]
    fn test_scripted_probe_replays_then_defaults_false() {
        let probe = ScriptedProbe::new(vec![Err("boom".to_string()), Ok(true)]);
        assert!(probe.confirmed().is_err());
        assert!(probe.confirmed().unwrap());
        assert!(!probe.confirmed().unwrap());
        assert_eq!(probe.polls(), 3);
    }
}
