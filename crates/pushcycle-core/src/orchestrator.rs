//! The branch cycle: reconcile, commit, push, wait, clean up.
//!
//! [`BranchCycleOrchestrator::run`] drives one invocation strictly in order.
//! Any failure aborts the cycle with the last stage reached; nothing is
//! retried or rolled back. A stale remote branch left by an aborted cycle is
//! removed by the next cycle's reconcile step.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::branch::{BranchDeletion, BranchName, BranchState};
use crate::config::CycleConfig;
use crate::error::{CycleError, Result, TriggerError};
use crate::metrics::METRICS;
use crate::obs::{
    emit_cycle_failed, emit_cycle_finished, emit_cycle_started, emit_stage_reached, CycleSpan,
};
use crate::remote::RemoteDescriptor;
use crate::repository::{CommitId, RepositoryHandle};
use crate::stage::{CycleStage, CycleStep};
use crate::waiter::{Interrupt, TriggerProbe, Waiter};
use crate::workspace::purge_gitignore_files;

/// What the reconcile step found and removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Branch state before anything was deleted.
    pub initial: BranchState,
    /// HEAD was on the trigger branch and had to be detached.
    pub detached_head: bool,
    pub local: BranchDeletion,
    pub remote: BranchDeletion,
}

/// How the post-push wait ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WaitOutcome {
    /// No probe attached; the full window elapsed.
    Elapsed { waited_ms: u64 },
    /// The probe confirmed the trigger.
    Confirmed { after_ms: u64, polls: u32 },
    /// The probe never confirmed within the window.
    Unconfirmed { waited_ms: u64, polls: u32 },
}

impl WaitOutcome {
    /// `None` when no probe was attached.
    pub fn confirmed(&self) -> Option<bool> {
        match self {
            WaitOutcome::Elapsed { .. } => None,
            WaitOutcome::Confirmed { .. } => Some(true),
            WaitOutcome::Unconfirmed { .. } => Some(false),
        }
    }
}

/// Record of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub branch: BranchName,
    pub workspace: PathBuf,
    /// Push target with credentials masked.
    pub remote: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reconcile: ReconcileOutcome,
    /// `.gitignore` files removed before staging, relative to the workspace.
    pub purged_gitignores: Vec<PathBuf>,
    pub commit: CommitId,
    pub wait: WaitOutcome,
    pub cleanup: BranchDeletion,
    pub stages: Vec<CycleStage>,
}

impl CycleReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Stages reached so far in the current cycle.
struct Progress<'a> {
    cycle_id: &'a str,
    stages: Vec<CycleStage>,
}

impl<'a> Progress<'a> {
    fn new(cycle_id: &'a str) -> Self {
        Self {
            cycle_id,
            stages: vec![CycleStage::Start],
        }
    }

    fn advance(&mut self, stage: CycleStage) {
        debug_assert!(self.current() < stage);
        emit_stage_reached(self.cycle_id, stage.as_str());
        self.stages.push(stage);
    }

    fn current(&self) -> CycleStage {
        self.stages.last().copied().unwrap_or(CycleStage::Start)
    }
}

/// Runs branch cycles against a repository.
pub struct BranchCycleOrchestrator<R, W> {
    repo: R,
    waiter: W,
    config: CycleConfig,
    interrupt: Interrupt,
    probe: Option<Box<dyn TriggerProbe>>,
}

impl<R: RepositoryHandle, W: Waiter> BranchCycleOrchestrator<R, W> {
    pub fn new(repo: R, waiter: W, config: CycleConfig) -> Self {
        Self {
            repo,
            waiter,
            config,
            interrupt: Interrupt::new(),
            probe: None,
        }
    }

    /// Share an interruption token with the caller. Pass the same token to
    /// the waiter so a raised interrupt also ends the wait.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Poll `probe` during the wait and stop waiting once it confirms.
    pub fn with_probe(mut self, probe: Box<dyn TriggerProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    fn checkpoint(&self, step: CycleStep) -> Result<()> {
        if self.interrupt.is_raised() {
            return Err(TriggerError::Interrupted { step });
        }
        Ok(())
    }

    /// Report a failure as an interruption when the token was raised while
    /// the operation ran (git children die with the same Ctrl-C).
    fn guard<T>(&self, step: CycleStep, result: Result<T>) -> Result<T> {
        match result {
            Err(e) if !e.is_interrupted() && self.interrupt.is_raised() => {
                debug!(error = %e, "failure after interrupt");
                Err(TriggerError::Interrupted { step })
            }
            other => other,
        }
    }

    /// Look up the configured remote and attach credentials.
    ///
    /// The repository's remote configuration is left untouched.
    pub fn resolve_remote(&self) -> Result<RemoteDescriptor> {
        let name = self.config.remote.clone();
        let url = self.repo.remote_url(&name)?;
        match self.config.credentials.resolve()? {
            Some(credentials) => {
                RemoteDescriptor::authenticated(name, url, credentials, self.config.injection)
            }
            None => Ok(RemoteDescriptor::ambient(name, url)),
        }
    }

    /// Make sure no branch named like the trigger branch exists, locally or
    /// on `remote`. Safe to call any number of times.
    pub fn reconcile(&self, remote: &RemoteDescriptor) -> Result<ReconcileOutcome> {
        let step = CycleStep::Reconcile;
        self.checkpoint(step)?;
        let branch = &self.config.branch;

        let local = self.guard(step, self.repo.list_local_branches())?;
        let remote_branches = self.guard(step, self.repo.list_remote_branches(remote))?;
        let initial = BranchState::derive(branch, &local, &remote_branches);
        debug!(branch = %branch, state = ?initial, "branch state before reconcile");

        let mut detached_head = false;
        let local_deletion = if initial.exists_locally() {
            if self.guard(step, self.repo.current_branch())?.as_ref() == Some(branch) {
                info!(branch = %branch, "Detaching HEAD from stale branch {}", branch);
                self.guard(step, self.repo.detach_head())?;
                detached_head = true;
            }
            info!(branch = %branch, "Deleting local branch {}", branch);
            self.guard(step, self.repo.delete_local_branch(branch, true))?
        } else {
            BranchDeletion::AlreadyAbsent
        };

        let remote_deletion = if initial.exists_remotely() {
            info!(
                branch = %branch,
                remote = %remote.redacted_target(),
                "Deleting stale remote branch {}",
                branch
            );
            let deletion = self.guard(step, self.repo.delete_remote_branch(remote, branch))?;
            if deletion.was_deleted() {
                METRICS.inc_remote_branches_deleted();
            }
            deletion
        } else {
            BranchDeletion::AlreadyAbsent
        };

        Ok(ReconcileOutcome {
            initial,
            detached_head,
            local: local_deletion,
            remote: remote_deletion,
        })
    }

    fn prepare_workspace(&self) -> Result<Vec<PathBuf>> {
        if !self.config.purge_gitignore {
            return Ok(Vec::new());
        }
        self.checkpoint(CycleStep::PrepareWorkspace)?;
        info!(
            workspace = %self.repo.workdir().display(),
            "Removing .gitignore files so ignored files are committed"
        );
        purge_gitignore_files(self.repo.workdir())
    }

    fn commit_snapshot(&self) -> Result<CommitId> {
        let step = CycleStep::Commit;
        self.checkpoint(step)?;
        let branch = &self.config.branch;
        let identity = &self.config.identity;

        self.guard(step, self.repo.create_branch(branch))?;
        self.guard(step, self.repo.checkout(branch))?;
        self.guard(step, self.repo.stage_all())?;
        let commit = self.guard(
            step,
            self.repo
                .commit(&self.config.commit_message(), identity, identity),
        )?;
        info!(branch = %branch, commit = %commit.short(), "Committed workspace to {}", branch);
        Ok(commit)
    }

    fn push(&self, remote: &RemoteDescriptor) -> Result<()> {
        let step = CycleStep::Push;
        self.checkpoint(step)?;
        let target = remote.redacted_target();
        info!(remote = %target, "Pushing to {}", target);
        self.guard(step, self.repo.push_branch(remote, &self.config.branch))
    }

    fn wait_for_trigger(&self) -> Result<WaitOutcome> {
        self.checkpoint(CycleStep::Wait)?;
        let window = self.config.trigger_wait;

        let Some(probe) = &self.probe else {
            info!(wait_secs = window.as_secs(), "Waiting {}s for the build to trigger", window.as_secs());
            self.waiter.wait(window)?;
            return Ok(WaitOutcome::Elapsed {
                waited_ms: millis(window),
            });
        };

        info!(
            wait_secs = window.as_secs(),
            probe = %probe.describe(),
            "Waiting up to {}s for the build to trigger",
            window.as_secs()
        );
        let mut waited = Duration::ZERO;
        let mut polls = 0u32;
        loop {
            polls += 1;
            match probe.confirmed() {
                Ok(true) => {
                    info!(after_ms = millis(waited), polls, "Trigger confirmed");
                    return Ok(WaitOutcome::Confirmed {
                        after_ms: millis(waited),
                        polls,
                    });
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, polls, "trigger probe failed; still waiting"),
            }
            if waited >= window {
                warn!(polls, "Trigger not confirmed within {}s", window.as_secs());
                return Ok(WaitOutcome::Unconfirmed {
                    waited_ms: millis(waited),
                    polls,
                });
            }
            let pause = self.config.poll_interval.min(window - waited);
            self.waiter.wait(pause)?;
            waited += pause;
        }
    }

    fn cleanup(&self, remote: &RemoteDescriptor) -> Result<BranchDeletion> {
        let step = CycleStep::Cleanup;
        self.checkpoint(step)?;
        let branch = &self.config.branch;
        info!(
            branch = %branch,
            remote = %remote.redacted_target(),
            "Deleting remote branch {}",
            branch
        );
        let deletion = self.guard(step, self.repo.delete_remote_branch(remote, branch))?;
        if deletion.was_deleted() {
            METRICS.inc_remote_branches_deleted();
        } else {
            warn!(branch = %branch, "remote branch was already gone at cleanup");
        }
        Ok(deletion)
    }

    fn run_steps(&self, progress: &mut Progress<'_>, started_at: DateTime<Utc>) -> Result<CycleReport> {
        self.config.validate()?;
        let branch = &self.config.branch;
        let workspace = self.repo.workdir().to_path_buf();
        info!(branch = %branch, "Branch name: {}", branch);
        info!(workspace = %workspace.display(), "Workspace: {}", workspace.display());

        self.checkpoint(CycleStep::ResolveRemote)?;
        let remote = self.resolve_remote()?;
        info!(
            remote = %remote.redacted_target(),
            authenticated = remote.is_authenticated(),
            "Remote URL: {}",
            remote.redacted_target()
        );

        let reconcile = self.reconcile(&remote)?;
        progress.advance(CycleStage::Reconciled);

        let purged_gitignores = self.prepare_workspace()?;
        let commit = self.commit_snapshot()?;
        progress.advance(CycleStage::Committed);

        self.push(&remote)?;
        progress.advance(CycleStage::Pushed);

        let wait = self.wait_for_trigger()?;
        progress.advance(CycleStage::Waited);

        let cleanup = self.cleanup(&remote)?;
        progress.advance(CycleStage::Cleaned);
        progress.advance(CycleStage::Done);

        Ok(CycleReport {
            cycle_id: progress.cycle_id.to_string(),
            branch: branch.clone(),
            workspace,
            remote: remote.redacted_target(),
            started_at,
            finished_at: Utc::now(),
            reconcile,
            purged_gitignores,
            commit,
            wait,
            cleanup,
            stages: progress.stages.clone(),
        })
    }

    /// Run one full cycle.
    pub fn run(&self) -> std::result::Result<CycleReport, CycleError> {
        let cycle_id = Uuid::new_v4().to_string();
        let branch = self.config.branch.as_str();
        let _span = CycleSpan::enter(&cycle_id, branch);
        let started_at = Utc::now();
        let clock = Instant::now();

        METRICS.inc_cycles_started();
        emit_cycle_started(&cycle_id, branch, &self.repo.workdir().display().to_string());

        let mut progress = Progress::new(&cycle_id);
        match self.run_steps(&mut progress, started_at) {
            Ok(report) => {
                METRICS.inc_cycles_completed();
                emit_cycle_finished(&cycle_id, millis(clock.elapsed()), report.wait.confirmed());
                Ok(report)
            }
            Err(e) => {
                METRICS.inc_cycles_failed();
                let stage = progress.current();
                emit_cycle_failed(&cycle_id, stage.as_str(), e.kind(), &e);
                Err(CycleError::new(stage, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryRepository, RecordingWaiter, RepoCall, ScriptedProbe};

    fn config(branch: &str) -> CycleConfig {
        CycleConfig::new(BranchName::new(branch).unwrap())
            .with_trigger_wait(Duration::from_secs(60))
            .with_poll_interval(Duration::from_secs(10))
    }

    #[test]
    fn test_run_reaches_every_stage_in_order() {
        let repo = MemoryRepository::new("/ws");
        let orchestrator =
            BranchCycleOrchestrator::new(repo.clone(), RecordingWaiter::new(), config("t"));

        let report = orchestrator.run().unwrap();

        assert_eq!(
            report.stages,
            vec![
                CycleStage::Start,
                CycleStage::Reconciled,
                CycleStage::Committed,
                CycleStage::Pushed,
                CycleStage::Waited,
                CycleStage::Cleaned,
                CycleStage::Done,
            ]
        );
        assert_eq!(report.cleanup, BranchDeletion::Deleted);
        assert_eq!(report.wait, WaitOutcome::Elapsed { waited_ms: 60_000 });
        assert!(report.duration_ms() >= 0);
    }

    #[test]
    fn test_wait_without_probe_uses_full_window() {
        let waiter = RecordingWaiter::new();
        let orchestrator = BranchCycleOrchestrator::new(
            MemoryRepository::new("/ws"),
            waiter.clone(),
            config("t").with_trigger_wait(Duration::from_secs(5)),
        );
        orchestrator.run().unwrap();
        assert_eq!(waiter.waits(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn test_probe_polls_until_confirmed() {
        let waiter = RecordingWaiter::new();
        let probe = ScriptedProbe::new(vec![Ok(false), Err("503".to_string()), Ok(true)]);
        let orchestrator =
            BranchCycleOrchestrator::new(MemoryRepository::new("/ws"), waiter.clone(), config("t"))
                .with_probe(Box::new(probe.clone()));

        let report = orchestrator.run().unwrap();

        assert_eq!(
            report.wait,
            WaitOutcome::Confirmed {
                after_ms: 20_000,
                polls: 3
            }
        );
        assert_eq!(waiter.total(), Duration::from_secs(20));
        assert_eq!(probe.polls(), 3);
    }

    #[test]
    fn test_unconfirmed_window_is_bounded_and_still_cleans_up() {
        let waiter = RecordingWaiter::new();
        let repo = MemoryRepository::new("/ws");
        let orchestrator = BranchCycleOrchestrator::new(
            repo.clone(),
            waiter.clone(),
            config("t")
                .with_trigger_wait(Duration::from_secs(25))
                .with_poll_interval(Duration::from_secs(10)),
        )
        .with_probe(Box::new(ScriptedProbe::new(vec![])));

        let report = orchestrator.run().unwrap();

        assert_eq!(
            waiter.waits(),
            vec![
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(5)
            ]
        );
        assert_eq!(
            report.wait,
            WaitOutcome::Unconfirmed {
                waited_ms: 25_000,
                polls: 4
            }
        );
        assert_eq!(report.wait.confirmed(), Some(false));
        assert_eq!(report.cleanup, BranchDeletion::Deleted);
        assert!(!repo.remote_branches().contains(&BranchName::new("t").unwrap()));
    }

    #[test]
    fn test_raised_interrupt_stops_before_first_step() {
        let repo = MemoryRepository::new("/ws");
        let interrupt = Interrupt::new();
        interrupt.raise();
        let orchestrator =
            BranchCycleOrchestrator::new(repo.clone(), RecordingWaiter::new(), config("t"))
                .with_interrupt(interrupt);

        let err = orchestrator.run().unwrap_err();

        assert!(err.is_interrupted());
        assert_eq!(err.stage, CycleStage::Start);
        assert!(repo.calls().is_empty());
    }

    #[test]
    fn test_invalid_config_fails_without_touching_repository() {
        let repo = MemoryRepository::new("/ws");
        let orchestrator = BranchCycleOrchestrator::new(
            repo.clone(),
            RecordingWaiter::new(),
            config("t").with_remote(""),
        );
        let err = orchestrator.run().unwrap_err();
        assert_eq!(err.source.kind(), "invalid_config");
        assert!(repo.calls().is_empty());
    }

    #[test]
    fn test_missing_remote_is_reported() {
        let orchestrator = BranchCycleOrchestrator::new(
            MemoryRepository::new("/ws"),
            RecordingWaiter::new(),
            config("t").with_remote("upstream"),
        );
        let err = orchestrator.run().unwrap_err();
        assert_eq!(err.stage, CycleStage::Start);
        assert!(matches!(
            err.source,
            TriggerError::RemoteNotConfigured { ref remote } if remote == "upstream"
        ));
    }

    #[test]
    fn test_reconcile_skips_deletes_when_absent() {
        let repo = MemoryRepository::new("/ws");
        let orchestrator =
            BranchCycleOrchestrator::new(repo.clone(), RecordingWaiter::new(), config("t"));
        let remote = orchestrator.resolve_remote().unwrap();
        repo.clear_calls();

        let outcome = orchestrator.reconcile(&remote).unwrap();

        assert_eq!(outcome.initial, BranchState::Absent);
        assert_eq!(outcome.local, BranchDeletion::AlreadyAbsent);
        assert_eq!(outcome.remote, BranchDeletion::AlreadyAbsent);
        assert!(!repo.calls().iter().any(RepoCall::is_remote_delete));
    }
}
