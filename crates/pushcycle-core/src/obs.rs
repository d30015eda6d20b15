//! Cycle-scoped spans and lifecycle events.
//!
//! Every event emitted while a [`CycleSpan`] is alive carries the cycle id
//! and branch name. Lifecycle events use a stable `event` field so they can be
//! filtered out of JSON logs.

use tracing::{info, warn};

/// RAII guard that keeps a cycle span entered.
pub struct CycleSpan {
    _span: tracing::span::EnteredSpan,
}

impl CycleSpan {
    pub fn enter(cycle_id: &str, branch: &str) -> Self {
        let span = tracing::info_span!("pushcycle.cycle", cycle_id = %cycle_id, branch = %branch);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_cycle_started(cycle_id: &str, branch: &str, workspace: &str) {
    info!(
        event = "cycle.started",
        cycle_id = %cycle_id,
        branch = %branch,
        workspace = %workspace,
    );
}

/// Emit event: a step finished and the cycle advanced to `stage`.
pub fn emit_stage_reached(cycle_id: &str, stage: &str) {
    info!(event = "cycle.stage", cycle_id = %cycle_id, stage = %stage);
}

pub fn emit_cycle_finished(cycle_id: &str, duration_ms: u64, confirmed: Option<bool>) {
    info!(
        event = "cycle.finished",
        cycle_id = %cycle_id,
        duration_ms = duration_ms,
        confirmed = ?confirmed,
    );
}

/// Emit event: the cycle aborted. Warning level.
pub fn emit_cycle_failed(cycle_id: &str, stage: &str, kind: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "cycle.failed",
        cycle_id = %cycle_id,
        stage = %stage,
        kind = %kind,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_span_enter() {
        let _span = CycleSpan::enter("cycle-1", "xc-trigger-42");
        emit_stage_reached("cycle-1", "reconciled");
    }
}
