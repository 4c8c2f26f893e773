//! Tracing types for inference observability.
//!
//! These capture step-by-step traces of unification for debugging tools.
//! Tracing is opt-in via [`crate::Unifier::enable_tracing`] — zero
//! overhead when disabled.

use serde::Serialize;

/// A single step in a unification trace.
#[derive(Debug, Clone, Serialize)]
pub struct UnifyStep {
    pub step: usize,
    pub action: UnifyAction,
    pub left: String,
    pub right: String,
}

/// What action was taken during a unification step.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifyAction {
    /// Sides are already identical — no-op.
    Identity,
    /// A type variable was bound and substituted through the work set.
    Bind,
    /// Structural recursion: child constraints were pushed.
    Decompose,
    /// No rule applied; the constraint was left pending.
    Pending,
}
