//! Engine-side metrics hooks.
//!
//! The engine reports counters through this trait; the serving layer maps
//! them onto its Prometheus registry. Tests use the no-op or a recording
//! double.

/// Operator-visible incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incident {
    /// Turn aborted at the hard answer timeout
    HardTimeout,
    /// Save conflicts exhausted the reload-reapply budget
    SaveConflictExhausted,
    /// Speech transport permanently unreachable
    MediaUnreachable,
}

/// Counter sink the engine reports into.
pub trait EngineMetrics: Send + Sync {
    fn on_turn_completed(&self) {}
    fn on_barge_in(&self) {}
    fn on_sentence_filtered(&self) {}
    fn on_tool_call(&self, _name: &str) {}
    fn on_incident(&self, _incident: Incident) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl EngineMetrics for NoopMetrics {}
