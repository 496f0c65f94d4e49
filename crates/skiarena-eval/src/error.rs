//! Error taxonomy for the evaluation runtime.

use skiarena::{ArenaError, LayoutError};
use thiserror::Error;

/// Errors surfaced by the runtime.
///
/// Two of these are recoverable at the per-expression boundary (the driver
/// finalizes the owning expression as diverged and keeps going); the rest
/// are fatal to the whole driver and reject every outstanding request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// Arena capacity or ring allocation exhausted. Fatal.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(ArenaError),

    /// A single request exceeded its maximum resubmit count.
    #[error("request {req_id} exceeded the resubmission limit ({max})")]
    ResubmissionLimitExceeded { req_id: u32, max: u32 },

    /// A single expression ran out of reduction budget.
    #[error("request {req_id} exhausted its step budget ({budget})")]
    StepBudgetExhausted { req_id: u32, budget: u32 },

    /// Raised by any suspending operation after `terminate()`.
    #[error("evaluator terminated")]
    Terminated,

    /// A worker published an `ERROR` completion. Fatal.
    #[error("worker invariant violation (fault code {code})")]
    WorkerInvariantViolation { code: u32 },

    /// Host-side arena access failed (dangling or corrupt node).
    #[error("arena access failed: {0}")]
    Arena(ArenaError),

    /// Region sizing or attach failure.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Configuration rejected before any region was allocated.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EvalError {
    /// Recoverable errors finalize one expression and leave the driver up.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ResubmissionLimitExceeded { .. } | Self::StepBudgetExhausted { .. }
        )
    }

    /// Terminal errors abort every pending request.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhaustion(_)
                | Self::Terminated
                | Self::WorkerInvariantViolation { .. }
                | Self::Arena(_)
                | Self::Layout(_)
        )
    }
}

impl From<ArenaError> for EvalError {
    fn from(err: ArenaError) -> Self {
        match err {
            ArenaError::Exhausted { .. } => Self::ResourceExhaustion(err),
            ArenaError::Dangling { .. } | ArenaError::Corrupt { .. } => Self::Arena(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_and_terminal_are_disjoint() {
        let errors = [
            EvalError::ResourceExhaustion(ArenaError::Exhausted { capacity: 16 }),
            EvalError::ResubmissionLimitExceeded { req_id: 1, max: 10 },
            EvalError::StepBudgetExhausted { req_id: 1, budget: 100 },
            EvalError::Terminated,
            EvalError::WorkerInvariantViolation { code: 2 },
        ];
        for e in errors {
            assert!(!(e.is_recoverable() && e.is_terminal()), "{e}");
        }
    }
}
