//! Errors surfaced by the solver bridge

use thiserror::Error;

/// Solver bridge error
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// The backend rejected a constraint or query
    #[error("solver backend error: {0}")]
    Backend(String),

    /// The backend holds fewer frames than the caller believes are in
    /// scope. This is a usage bug, not a recoverable condition.
    #[error("solver frame underflow: backend at depth {depth}, caller expects {expected}")]
    FrameUnderflow { depth: usize, expected: usize },

    /// A constraint uses a construct the backend cannot express
    #[error("constraint not expressible: {0}")]
    Inexpressible(String),
}

pub type SolverResult<T> = Result<T, SolverError>;
