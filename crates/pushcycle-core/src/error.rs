//! Error taxonomy for branch cycles.

use std::path::PathBuf;

use crate::stage::{CycleStage, CycleStep};

/// Errors produced by repository operations and cycle steps.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot access repository at {path}: {details}")]
    RepositoryAccess { path: PathBuf, details: String },

    #[error("remote not configured: {remote}")]
    RemoteNotConfigured { remote: String },

    #[error("invalid remote URL {url}: {details}")]
    InvalidRemoteUrl { url: String, details: String },

    #[error("ref operation failed: {command}\nstderr: {stderr}")]
    RefOperation { command: String, stderr: String },

    #[error("authentication rejected by {remote}: {stderr}")]
    Authentication { remote: String, stderr: String },

    #[error("network failure reaching {remote}: {stderr}")]
    Network { remote: String, stderr: String },

    #[error("interrupted during {step}")]
    Interrupted { step: CycleStep },

    #[error("workspace error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("trigger probe error: {0}")]
    Probe(String),
}

impl TriggerError {
    /// Short machine-readable category, used in log fields and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerError::InvalidConfig(_) => "invalid_config",
            TriggerError::RepositoryAccess { .. } => "repository_access",
            TriggerError::RemoteNotConfigured { .. } => "remote_not_configured",
            TriggerError::InvalidRemoteUrl { .. } => "invalid_remote_url",
            TriggerError::RefOperation { .. } => "ref_operation",
            TriggerError::Authentication { .. } => "authentication",
            TriggerError::Network { .. } => "network",
            TriggerError::Interrupted { .. } => "interrupted",
            TriggerError::Workspace { .. } => "workspace",
            TriggerError::Probe(_) => "probe",
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, TriggerError::Interrupted { .. })
    }
}

/// Result type for repository operations and cycle steps.
pub type Result<T> = std::result::Result<T, TriggerError>;

/// A failed cycle: the last stage reached plus the cause.
///
/// Side effects up to `stage` are left in place; a later reconcile absorbs
/// any stale remote branch.
#[derive(Debug, thiserror::Error)]
#[error("branch cycle aborted after stage {stage}: {source}")]
pub struct CycleError {
    pub stage: CycleStage,
    #[source]
    pub source: TriggerError,
}

impl CycleError {
    pub fn new(stage: CycleStage, source: TriggerError) -> Self {
        Self { stage, source }
    }

    pub fn is_interrupted(&self) -> bool {
        self.source.is_interrupted()
    }
}
