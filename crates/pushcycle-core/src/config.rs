//! Cycle configuration.
//!
//! One [`CycleConfig`] describes a whole invocation: which branch to cycle,
//! where to push it, how to authenticate, and how long the external service
//! gets to notice the push.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::branch::BranchName;
use crate::error::{Result, TriggerError};
use crate::remote::{CredentialInjection, Credentials};

/// Remote used when none is configured.
pub const DEFAULT_REMOTE: &str = "origin";

/// Trigger window granted to the external CI service after the push.
pub const DEFAULT_TRIGGER_WAIT: Duration = Duration::from_secs(60);

/// Probe polling interval when a trigger probe is attached.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Environment variables read by [`CredentialSource::Environment`].
pub const USERNAME_ENV: &str = "GIT_USERNAME";
pub const PASSWORD_ENV: &str = "GIT_PASSWORD";

/// Author and committer of the synthetic trigger commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl CommitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl Default for CommitIdentity {
    /// `"Jenkins" <null>`, the identity trigger commits have always carried.
    fn default() -> Self {
        Self::new("Jenkins", "null")
    }
}

/// Where push credentials come from.
#[derive(Debug, Clone, Default)]
pub enum CredentialSource {
    /// Use whatever git is already configured with (credential helpers,
    /// SSH agent, URL already carrying userinfo).
    #[default]
    Ambient,
    /// Credentials supplied by the caller.
    Explicit(Credentials),
    /// Read `GIT_USERNAME` / `GIT_PASSWORD` from the process environment.
    Environment,
}

impl CredentialSource {
    /// Resolve to concrete credentials, or `None` for ambient auth.
    pub fn resolve(&self) -> Result<Option<Credentials>> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Like [`resolve`](Self::resolve) with an injectable variable lookup.
    ///
    /// For `Environment`: both variables unset (or empty) falls back to
    /// ambient auth; exactly one set is a configuration error.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<Option<Credentials>>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            CredentialSource::Ambient => Ok(None),
            CredentialSource::Explicit(creds) => Ok(Some(creds.clone())),
            CredentialSource::Environment => {
                let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
                match (non_empty(USERNAME_ENV), non_empty(PASSWORD_ENV)) {
                    (Some(user), Some(token)) => Credentials::new(user, token).map(Some),
                    (None, None) => {
                        warn!(
                            "{} and {} are not set; falling back to ambient git credentials",
                            USERNAME_ENV, PASSWORD_ENV
                        );
                        Ok(None)
                    }
                    (Some(_), None) => Err(TriggerError::InvalidConfig(format!(
                        "{USERNAME_ENV} is set but {PASSWORD_ENV} is not"
                    ))),
                    (None, Some(_)) => Err(TriggerError::InvalidConfig(format!(
                        "{PASSWORD_ENV} is set but {USERNAME_ENV} is not"
                    ))),
                }
            }
        }
    }
}

/// Configuration for one branch cycle.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Trigger branch to create, push and remove.
    pub branch: BranchName,
    /// Remote name as configured in the repository.
    pub remote: String,
    pub credentials: CredentialSource,
    pub injection: CredentialInjection,
    /// Remove every `.gitignore` before staging so ignored files are committed.
    pub purge_gitignore: bool,
    pub identity: CommitIdentity,
    /// Upper bound on the post-push wait.
    pub trigger_wait: Duration,
    /// Probe polling interval; unused without a probe.
    pub poll_interval: Duration,
}

impl CycleConfig {
    pub fn new(branch: BranchName) -> Self {
        Self {
            branch,
            remote: DEFAULT_REMOTE.to_string(),
            credentials: CredentialSource::default(),
            injection: CredentialInjection::default(),
            purge_gitignore: false,
            identity: CommitIdentity::default(),
            trigger_wait: DEFAULT_TRIGGER_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn with_credentials(mut self, source: CredentialSource) -> Self {
        self.credentials = source;
        self
    }

    pub fn with_injection(mut self, injection: CredentialInjection) -> Self {
        self.injection = injection;
        self
    }

    pub fn with_purge_gitignore(mut self, purge: bool) -> Self {
        self.purge_gitignore = purge;
        self
    }

    pub fn with_identity(mut self, identity: CommitIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_trigger_wait(mut self, wait: Duration) -> Self {
        self.trigger_wait = wait;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Commit message of the synthetic trigger commit.
    pub fn commit_message(&self) -> String {
        format!("Created new branch {}", self.branch)
    }

    /// Reject settings that cannot produce a working cycle.
    pub fn validate(&self) -> Result<()> {
        if self.remote.trim().is_empty() {
            return Err(TriggerError::InvalidConfig(
                "remote name must not be empty".to_string(),
            ));
        }
        if self.identity.name.trim().is_empty() {
            return Err(TriggerError::InvalidConfig(
                "commit identity name must not be empty".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(TriggerError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
