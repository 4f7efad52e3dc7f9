//! Error types for the pure core.

use thiserror::Error;

use crate::recovery::RecoveryPhase;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unknown rotation strategy: {0}")]
    UnknownStrategy(String),
}

/// A recovery phase change that would move a pane backwards within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal recovery transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RecoveryPhase,
    pub to: RecoveryPhase,
}
