//! Runtime failure taxonomy
//!
//! Four user-visible failure classes drive outcome classification:
//! `Error` (assertion-style violations), `Unreachable` (assumption-style,
//! pruned or reported as invalid), `Nonexecutable` (the program outran the
//! interpreter), and internal signals that must never escape the crate
//! (`NotLinear` during interval inference, `UnderConstruction` during
//! definition-cycle detection).

use crate::intervals::Interval;
use crate::memory::Memory;
use boogie_core::ast::{Expr, Id, SpecKind};
use boogie_core::{Span, Spanned};
use thiserror::Error;

/// How a failure classifies the branch that raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A checked clause or operation failed: the test case fails
    Error,
    /// An assumption was violated: the branch is infeasible
    Unreachable,
    /// The program cannot be executed by this interpreter
    Nonexecutable,
}

/// Internal signals, caught inside the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InternalError {
    /// Interval inference met a non-linear term
    #[error("term is not linear")]
    NotLinear,
    /// Lazy evaluation re-entered a definition under construction
    #[error("definition cycle (construction frame {0})")]
    UnderConstruction(u64),
}

/// What went wrong
#[derive(Debug, Clone, Error)]
pub enum FailureSource {
    /// A specification clause evaluated to false
    #[error("{} \"{expr}\" violated", clause_name(.kind, .free))]
    SpecViolation {
        kind: SpecKind,
        free: bool,
        expr: Spanned<Expr>,
        /// The sub-expression that short-circuit evaluation last touched
        last_term: Option<Spanned<Expr>>,
    },

    /// `div` or `mod` with a zero divisor
    #[error("division by zero")]
    DivisionByZero,

    /// Lambdas, orders, maps as indices, quantification over maps or
    /// unknown type variables, …
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),

    /// A quantified variable's domain could not be made finite
    #[error("cannot enumerate the domain of {var}: {interval}")]
    InfiniteDomain { var: Id, interval: Interval },

    /// A bug signal that escaped; reported, never silently dropped
    #[error("internal: {0}")]
    Internal(InternalError),
}

/// Capitalized clause name for failure messages
fn clause_name(kind: &SpecKind, free: &bool) -> &'static str {
    match (*kind, *free) {
        (SpecKind::Inline, false) => "Assertion",
        (SpecKind::Inline, true) => "Assumption",
        (SpecKind::Precondition, _) => "Precondition",
        (SpecKind::Postcondition, _) => "Postcondition",
        (SpecKind::LoopInvariant, _) => "Loop invariant",
        (SpecKind::Where, _) => "Where clause",
        (SpecKind::Axiom, _) => "Axiom",
    }
}

/// One frame of the call stack at failure time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Position of the call statement
    pub call_pos: Span,
    /// Name of the called procedure
    pub callee: Id,
}

/// A failed execution branch
#[derive(Debug, Clone, Error)]
#[error("{source} at {pos}")]
pub struct RuntimeFailure {
    pub source: FailureSource,
    /// Position of the construct that failed
    pub pos: Span,
    /// Call frames, innermost first, accumulated during unwinding
    pub trace: Vec<StackFrame>,
    /// Memory at the point of failure
    pub memory: Box<Memory>,
}

impl RuntimeFailure {
    pub fn new(source: FailureSource, pos: Span, memory: Memory) -> Self {
        RuntimeFailure {
            source,
            pos,
            trace: Vec::new(),
            memory: Box::new(memory),
        }
    }

    /// Classification per the failure taxonomy. Spec violations follow
    /// their free flag: free clauses are assumptions. Internal signals
    /// are bugs when they reach classification; they read as
    /// non-executable rather than as spurious verdicts.
    pub fn kind(&self) -> FailureKind {
        match &self.source {
            FailureSource::SpecViolation { free, .. } => {
                if *free {
                    FailureKind::Unreachable
                } else {
                    FailureKind::Error
                }
            }
            FailureSource::DivisionByZero => FailureKind::Error,
            FailureSource::UnsupportedConstruct(_)
            | FailureSource::InfiniteDomain { .. }
            | FailureSource::Internal(_) => FailureKind::Nonexecutable,
        }
    }

    /// Is this an internal cycle signal?
    pub fn under_construction(&self) -> Option<u64> {
        match &self.source {
            FailureSource::Internal(InternalError::UnderConstruction(code)) => Some(*code),
            _ => None,
        }
    }

    /// Add a call frame while unwinding
    pub fn push_frame(mut self, call_pos: Span, callee: impl Into<Id>) -> Self {
        self.trace.push(StackFrame {
            call_pos,
            callee: callee.into(),
        });
        self
    }
}

pub type ExecResult<T> = Result<T, Box<RuntimeFailure>>;

#[cfg(test)]
mod tests {
    use super::*;
    use boogie_core::ast::BinOp;
    use boogie_core::Spanned;

    fn one_eq_two() -> Spanned<Expr> {
        Spanned::dummy(Expr::BinaryExpr(
            BinOp::Eq,
            Box::new(Expr::int_lit(1)),
            Box::new(Expr::int_lit(2)),
        ))
    }

    #[test]
    fn assertion_message() {
        let src = FailureSource::SpecViolation {
            kind: SpecKind::Inline,
            free: false,
            expr: one_eq_two(),
            last_term: None,
        };
        assert_eq!(src.to_string(), "Assertion \"1 == 2\" violated");
    }

    #[test]
    fn free_clauses_are_unreachable() {
        let mem = Memory::new();
        let assume = RuntimeFailure::new(
            FailureSource::SpecViolation {
                kind: SpecKind::Inline,
                free: true,
                expr: one_eq_two(),
                last_term: None,
            },
            Span::dummy(),
            mem.clone(),
        );
        assert_eq!(assume.kind(), FailureKind::Unreachable);

        let axiom = RuntimeFailure::new(
            FailureSource::SpecViolation {
                kind: SpecKind::Axiom,
                free: true,
                expr: one_eq_two(),
                last_term: None,
            },
            Span::dummy(),
            mem,
        );
        assert_eq!(axiom.kind(), FailureKind::Unreachable);
    }

    #[test]
    fn kinds_by_source() {
        let mem = Memory::new();
        let div =
            RuntimeFailure::new(FailureSource::DivisionByZero, Span::dummy(), mem.clone());
        assert_eq!(div.kind(), FailureKind::Error);

        let unsupported = RuntimeFailure::new(
            FailureSource::UnsupportedConstruct("lambda".to_string()),
            Span::dummy(),
            mem.clone(),
        );
        assert_eq!(unsupported.kind(), FailureKind::Nonexecutable);

        let cycle = RuntimeFailure::new(
            FailureSource::Internal(InternalError::UnderConstruction(3)),
            Span::dummy(),
            mem,
        );
        assert_eq!(cycle.under_construction(), Some(3));
    }

    #[test]
    fn frames_accumulate_innermost_first() {
        let f = RuntimeFailure::new(FailureSource::DivisionByZero, Span::dummy(), Memory::new())
            .push_frame(Span::dummy(), "inner")
            .push_frame(Span::dummy(), "outer");
        assert_eq!(f.trace[0].callee, "inner");
        assert_eq!(f.trace[1].callee, "outer");
    }
}
