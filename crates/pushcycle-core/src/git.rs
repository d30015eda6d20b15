//! [`RepositoryHandle`] backed by the `git` executable.
//!
//! Every command runs with `GIT_TERMINAL_PROMPT=0` and a closed stdin, so a
//! missing credential fails fast instead of hanging on a prompt. The C locale
//! is forced so stderr matching sees untranslated messages. Remote
//! failures are classified from stderr into authentication, network and
//! ref-operation errors; captured stderr is scrubbed of injected secrets.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::debug;

use crate::branch::{BranchDeletion, BranchName};
use crate::config::CommitIdentity;
use crate::error::{Result, TriggerError};
use crate::remote::{inline_helper_script, RemoteDescriptor, HELPER_TOKEN_ENV, HELPER_USERNAME_ENV};
use crate::repository::{CommitId, RepositoryHandle};

const AUTH_MARKERS: &[&str] = &[
    "authentication failed",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "invalid username or password",
    "invalid credentials",
    "access denied",
    "permission denied",
    "returned error: 401",
    "returned error: 403",
];

const NETWORK_MARKERS: &[&str] = &[
    "could not resolve host",
    "could not resolve hostname",
    "failed to connect",
    "connection refused",
    "connection reset",
    "timed out",
    "network is unreachable",
    "unable to access",
    "could not read from remote repository",
    "does not appear to be a git repository",
    "the remote end hung up unexpectedly",
    "early eof",
];

/// Locale overrides applied to every git invocation.
const C_LOCALE: [(&str, &str); 3] = [("LC_ALL", "C"), ("LANG", "C"), ("LANGUAGE", "")];

const REMOTE_REF_ABSENT: &str = "remote ref does not exist";
const LOCAL_BRANCH_ABSENT: &str = "not found";

/// Classify a failed remote command from its (already scrubbed) stderr.
///
/// Authentication markers win over network markers: an HTTP 403 is reported
/// by git as "unable to access ... returned error: 403".
pub fn classify_remote_failure(command: &str, remote: &str, stderr: &str) -> TriggerError {
    let lowered = stderr.to_ascii_lowercase();
    if AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
        return TriggerError::Authentication {
            remote: remote.to_string(),
            stderr: stderr.to_string(),
        };
    }
    if NETWORK_MARKERS.iter().any(|m| lowered.contains(m)) {
        return TriggerError::Network {
            remote: remote.to_string(),
            stderr: stderr.to_string(),
        };
    }
    TriggerError::RefOperation {
        command: command.to_string(),
        stderr: stderr.to_string(),
    }
}

/// Captured result of a command against a remote.
struct RemoteOutput {
    command: String,
    success: bool,
    stdout: String,
    stderr: String,
}

/// A git working tree driven through the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitRepository {
    workdir: PathBuf,
}

impl GitRepository {
    /// Open the working tree containing `dir`.
    ///
    /// Fails with [`TriggerError::RepositoryAccess`] when `dir` does not
    /// exist, is not inside a git work tree, or git cannot be run.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let access = |details: String| TriggerError::RepositoryAccess {
            path: dir.to_path_buf(),
            details,
        };

        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(C_LOCALE)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| access(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(access(stderr.trim().to_string()));
        }

        let toplevel = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if toplevel.is_empty() {
            return Err(access("not inside a git work tree".to_string()));
        }

        debug!(workdir = %toplevel, "opened repository");
        Ok(Self {
            workdir: PathBuf::from(toplevel),
        })
    }

    /// Commit HEAD currently points at.
    pub fn head_commit(&self) -> Result<CommitId> {
        let sha = self.run_stdout(&["rev-parse", "--verify", "HEAD"])?;
        CommitId::parse(&sha)
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.envs(C_LOCALE);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    fn spawn(&self, mut cmd: Command, display: &str) -> Result<Output> {
        cmd.output().map_err(|e| TriggerError::RepositoryAccess {
            path: self.workdir.clone(),
            details: format!("failed to run {display}: {e}"),
        })
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = self.git();
        cmd.args(args);
        let command = format!("git {}", args.join(" "));
        let output = self.spawn(cmd, &command)?;

        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(TriggerError::RefOperation { command, stderr })
        }
    }

    fn run_stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a command that talks to `remote`, wiring in helper credentials.
    ///
    /// Non-zero exit is not an error here; callers decide which failures are
    /// benign.
    fn exec_remote(&self, remote: &RemoteDescriptor, args: &[&str]) -> Result<RemoteOutput> {
        let mut cmd = self.git();
        if let Some(creds) = remote.helper_credentials() {
            // An empty helper entry resets the list so only ours is consulted.
            cmd.args(["-c", "credential.helper="]);
            cmd.arg("-c")
                .arg(format!("credential.helper={}", inline_helper_script()));
            cmd.env(HELPER_USERNAME_ENV, creds.username());
            cmd.env(HELPER_TOKEN_ENV, creds.token());
        }
        cmd.args(args);

        let command = remote.scrub(&format!("git {}", args.join(" ")));
        let output = self.spawn(cmd, &command)?;
        Ok(RemoteOutput {
            command,
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: remote.scrub(String::from_utf8_lossy(&output.stderr).trim()),
        })
    }

    fn remote_failure(remote: &RemoteDescriptor, out: &RemoteOutput) -> TriggerError {
        classify_remote_failure(&out.command, &remote.redacted_target(), &out.stderr)
    }

    /// Whether `remote` currently advertises `refs/heads/<name>`.
    fn remote_has_branch(&self, remote: &RemoteDescriptor, name: &BranchName) -> Result<bool> {
        let local_ref = name.local_ref();
        let out = self.exec_remote(remote, &["ls-remote", "--heads", remote.target(), &local_ref])?;
        if !out.success {
            return Err(Self::remote_failure(remote, &out));
        }
        Ok(out
            .stdout
            .lines()
            .any(|line| line.split('\t').nth(1).map(str::trim) == Some(local_ref.as_str())))
    }

    /// Drop the remote-tracking ref left behind for a deleted remote branch.
    fn prune_tracking_ref(&self, remote: &RemoteDescriptor, name: &BranchName) {
        let tracking = name.tracking_ref(remote.name());
        if let Err(e) = self.run(&["update-ref", "-d", &tracking]) {
            debug!(tracking_ref = %tracking, error = %e, "could not prune tracking ref");
        }
    }
}

impl RepositoryHandle for GitRepository {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn list_local_branches(&self) -> Result<BTreeSet<BranchName>> {
        let stdout = self.run_stdout(&["for-each-ref", "--format=%(refname)", "refs/heads/"])?;
        Ok(stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix("refs/heads/"))
            .filter_map(|name| BranchName::new(name).ok())
            .collect())
    }

    fn list_remote_branches(&self, remote: &RemoteDescriptor) -> Result<BTreeSet<BranchName>> {
        let out = self.exec_remote(remote, &["ls-remote", "--heads", remote.target()])?;
        if !out.success {
            return Err(Self::remote_failure(remote, &out));
        }
        // Format: "<sha>\trefs/heads/<name>"
        Ok(out
            .stdout
            .lines()
            .filter_map(|line| line.split('\t').nth(1))
            .filter_map(|r| r.trim().strip_prefix("refs/heads/"))
            .filter_map(|name| BranchName::new(name).ok())
            .collect())
    }

    fn current_branch(&self) -> Result<Option<BranchName>> {
        let mut cmd = self.git();
        cmd.args(["symbolic-ref", "--quiet", "HEAD"]);
        let output = self.spawn(cmd, "git symbolic-ref --quiet HEAD")?;
        if !output.status.success() {
            // Exit status 1 with no output: detached HEAD.
            return Ok(None);
        }
        let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(head
            .strip_prefix("refs/heads/")
            .and_then(|name| BranchName::new(name).ok()))
    }

    fn detach_head(&self) -> Result<()> {
        self.run(&["checkout", "--quiet", "--detach"])?;
        Ok(())
    }

    fn delete_local_branch(&self, name: &BranchName, force: bool) -> Result<BranchDeletion> {
        let flag = if force { "-D" } else { "-d" };
        match self.run(&["branch", flag, name.as_str()]) {
            Ok(_) => Ok(BranchDeletion::Deleted),
            Err(TriggerError::RefOperation { stderr, .. })
                if stderr.contains(LOCAL_BRANCH_ABSENT) =>
            {
                Ok(BranchDeletion::AlreadyAbsent)
            }
            Err(e) => Err(e),
        }
    }

    fn delete_remote_branch(
        &self,
        remote: &RemoteDescriptor,
        name: &BranchName,
    ) -> Result<BranchDeletion> {
        // Some transports report success for deleting a ref that never existed.
        if !self.remote_has_branch(remote, name)? {
            self.prune_tracking_ref(remote, name);
            return Ok(BranchDeletion::AlreadyAbsent);
        }

        let refspec = name.delete_refspec();
        let out = self.exec_remote(remote, &["push", remote.target(), &refspec])?;

        // Covers a concurrent delete between the listing and the push.
        let deletion = if out.success {
            BranchDeletion::Deleted
        } else if out.stderr.contains(REMOTE_REF_ABSENT) {
            BranchDeletion::AlreadyAbsent
        } else {
            return Err(Self::remote_failure(remote, &out));
        };

        self.prune_tracking_ref(remote, name);
        Ok(deletion)
    }

    fn create_branch(&self, name: &BranchName) -> Result<()> {
        self.run(&["branch", name.as_str()])?;
        Ok(())
    }

    fn checkout(&self, name: &BranchName) -> Result<()> {
        self.run(&["checkout", "--quiet", name.as_str(), "--"])?;
        Ok(())
    }

    fn stage_all(&self) -> Result<()> {
        self.run(&["add", "--all"])?;
        Ok(())
    }

    fn commit(
        &self,
        message: &str,
        author: &CommitIdentity,
        committer: &CommitIdentity,
    ) -> Result<CommitId> {
        let args = [
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "--allow-empty",
            "-m",
            message,
        ];
        let mut cmd = self.git();
        cmd.args(args)
            .env("GIT_AUTHOR_NAME", &author.name)
            .env("GIT_AUTHOR_EMAIL", &author.email)
            .env("GIT_COMMITTER_NAME", &committer.name)
            .env("GIT_COMMITTER_EMAIL", &committer.email);

        let command = "git commit --allow-empty".to_string();
        let output = self.spawn(cmd, &command)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TriggerError::RefOperation { command, stderr });
        }

        self.head_commit()
    }

    fn push_branch(&self, remote: &RemoteDescriptor, name: &BranchName) -> Result<()> {
        let refspec = name.push_refspec();
        let out = self.exec_remote(remote, &["push", remote.target(), &refspec])?;
        if !out.success {
            return Err(Self::remote_failure(remote, &out));
        }
        Ok(())
    }

    fn remote_url(&self, remote_name: &str) -> Result<String> {
        self.run_stdout(&["remote", "get-url", remote_name])
            .map_err(|_| TriggerError::RemoteNotConfigured {
                remote: remote_name.to_string(),
            })
    }

    fn set_remote_url(&self, remote_name: &str, url: &str) -> Result<()> {
        self.run(&["remote", "set-url", remote_name, url])?;
        Ok(())
    }
}
