//! Cycle states and the steps that move between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of a single branch cycle.
///
/// Stages only ever advance in declaration order. A failed run reports the
/// last stage it reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Start,
    Reconciled,
    Committed,
    Pushed,
    Waited,
    Cleaned,
    Done,
}

impl CycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStage::Start => "start",
            CycleStage::Reconciled => "reconciled",
            CycleStage::Committed => "committed",
            CycleStage::Pushed => "pushed",
            CycleStage::Waited => "waited",
            CycleStage::Cleaned => "cleaned",
            CycleStage::Done => "done",
        }
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStep {
    ResolveRemote,
    Reconcile,
    PrepareWorkspace,
    Commit,
    Push,
    Wait,
    Cleanup,
}

impl CycleStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStep::ResolveRemote => "resolve_remote",
            CycleStep::Reconcile => "reconcile",
            CycleStep::PrepareWorkspace => "prepare_workspace",
            CycleStep::Commit => "commit",
            CycleStep::Push => "push",
            CycleStep::Wait => "wait",
            CycleStep::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for CycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
