//! Push/pop bridge to an external satisfiability solver
//!
//! The concrete solver is an opaque collaborator behind the [`SatBackend`]
//! trait: it decides satisfiability of constraint sets and produces models.
//! The bridge owns the backtracking discipline: before any new constraints
//! are pushed, the backend stack is popped down to the caller's frame
//! count, and a backend that holds *fewer* frames than the caller expects
//! is reported as a fatal usage error. Solution enumeration is implemented
//! here by asserting blocking constraints between models.

use boogie_core::ast::{BinOp, Expr};
use boogie_core::Spanned;
use num_bigint::BigInt;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{SolverError, SolverResult};

/// Value assigned to a variable by a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolvedValue {
    Bool(bool),
    Int(BigInt),
}

impl std::fmt::Display for SolvedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolvedValue::Bool(b) => write!(f, "{}", b),
            SolvedValue::Int(i) => write!(f, "{}", i),
        }
    }
}

/// A model for a satisfiable constraint set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solution {
    /// Variable assignments
    pub assignments: HashMap<String, SolvedValue>,
}

impl Solution {
    /// Get the value of a variable
    pub fn get(&self, name: &str) -> Option<&SolvedValue> {
        self.assignments.get(name)
    }

    /// Check if the model is empty
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Get the number of assignments
    pub fn len(&self) -> usize {
        self.assignments.len()
    }
}

impl std::fmt::Display for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Solution:")?;
        let mut names: Vec<_> = self.assignments.keys().collect();
        names.sort();
        for name in names {
            writeln!(f, "  {} = {}", name, self.assignments[name])?;
        }
        Ok(())
    }
}

/// Result of a satisfiability check
#[derive(Debug, Clone)]
pub enum Satisfiability {
    /// Constraints are satisfiable, with a model
    Sat(Solution),
    /// Constraints are unsatisfiable
    Unsat,
    /// The solver could not decide (timeout, incompleteness)
    Unknown(String),
}

impl Satisfiability {
    pub fn is_sat(&self) -> bool {
        matches!(self, Satisfiability::Sat(_))
    }

    pub fn is_unsat(&self) -> bool {
        matches!(self, Satisfiability::Unsat)
    }

    pub fn solution(&self) -> Option<&Solution> {
        match self {
            Satisfiability::Sat(s) => Some(s),
            _ => None,
        }
    }
}

/// The opaque solver behind the bridge.
///
/// A backend maintains a stack of assertion frames. `assert` adds a
/// constraint to the top frame; `check` decides the conjunction of all
/// frames and, when satisfiable, produces a model for the constrained
/// variables.
pub trait SatBackend {
    /// Number of frames currently on the backend stack
    fn depth(&self) -> usize;

    /// Open a new assertion frame
    fn push(&mut self);

    /// Discard the top assertion frame
    fn pop(&mut self);

    /// Add a constraint to the top frame
    fn assert(&mut self, constraint: &Spanned<Expr>) -> SolverResult<()>;

    /// Decide satisfiability of all asserted constraints
    fn check(&mut self) -> SolverResult<Satisfiability>;

    /// Shrink a model toward smaller witnesses. The default keeps the
    /// model as produced.
    fn minimize(&mut self, solution: Solution) -> SolverResult<Solution> {
        Ok(solution)
    }
}

impl<B: SatBackend + ?Sized> SatBackend for Box<B> {
    fn depth(&self) -> usize {
        (**self).depth()
    }

    fn push(&mut self) {
        (**self).push()
    }

    fn pop(&mut self) {
        (**self).pop()
    }

    fn assert(&mut self, constraint: &Spanned<Expr>) -> SolverResult<()> {
        (**self).assert(constraint)
    }

    fn check(&mut self) -> SolverResult<Satisfiability> {
        (**self).check()
    }

    fn minimize(&mut self, solution: Solution) -> SolverResult<Solution> {
        (**self).minimize(solution)
    }
}

/// The push/pop discipline wrapper around a [`SatBackend`]
pub struct SolverBridge<B> {
    backend: B,
    /// Minimize the first model of every enumeration
    minimize_first: bool,
}

impl<B: SatBackend> SolverBridge<B> {
    pub fn new(backend: B) -> Self {
        SolverBridge {
            backend,
            minimize_first: false,
        }
    }

    /// Enable minimization of the first enumerated solution
    pub fn with_minimization(mut self) -> Self {
        self.minimize_first = true;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Pop the backend down to `frames`. A backend below the caller's
    /// level indicates the caller and bridge disagree about scoping.
    fn align(&mut self, frames: usize) -> SolverResult<()> {
        let depth = self.backend.depth();
        if depth < frames {
            return Err(SolverError::FrameUnderflow {
                depth,
                expected: frames,
            });
        }
        for _ in frames..depth {
            self.backend.pop();
        }
        Ok(())
    }

    /// Check satisfiability of `constraints` on top of the caller's
    /// `frames` committed levels. The scratch frame is popped before
    /// returning, so the backend ends at exactly `frames`.
    pub fn check(
        &mut self,
        constraints: &[Spanned<Expr>],
        frames: usize,
    ) -> SolverResult<Satisfiability> {
        self.align(frames)?;
        self.backend.push();
        let result = self.assert_and_check(constraints);
        self.backend.pop();
        result
    }

    /// Commit `constraints` as a new level on top of `frames` existing
    /// ones and return the new level count.
    pub fn push_level(
        &mut self,
        constraints: &[Spanned<Expr>],
        frames: usize,
    ) -> SolverResult<usize> {
        self.align(frames)?;
        self.backend.push();
        for c in constraints {
            self.backend.assert(c)?;
        }
        Ok(frames + 1)
    }

    fn assert_and_check(
        &mut self,
        constraints: &[Spanned<Expr>],
    ) -> SolverResult<Satisfiability> {
        for c in constraints {
            self.backend.assert(c)?;
        }
        self.backend.check()
    }

    /// Enumerate models of `constraints`, at most `max` when given.
    /// Enumeration stops early when a model constrains no variables
    /// (there is nothing to block) or the backend reports unknown.
    pub fn solve(
        &mut self,
        constraints: &[Spanned<Expr>],
        frames: usize,
        max: Option<usize>,
    ) -> SolverResult<Vec<Solution>> {
        self.align(frames)?;
        self.backend.push();
        let result = self.solve_inner(constraints, max);
        self.backend.pop();
        result
    }

    fn solve_inner(
        &mut self,
        constraints: &[Spanned<Expr>],
        max: Option<usize>,
    ) -> SolverResult<Vec<Solution>> {
        for c in constraints {
            self.backend.assert(c)?;
        }
        let mut solutions = Vec::new();
        loop {
            if let Some(max) = max {
                if solutions.len() >= max {
                    break;
                }
            }
            match self.backend.check()? {
                Satisfiability::Sat(model) => {
                    let model = if solutions.is_empty() && self.minimize_first {
                        self.backend.minimize(model)?
                    } else {
                        model
                    };
                    let Some(blocking) = blocking_constraint(&model) else {
                        // Nothing to block: the model space is a point
                        solutions.push(model);
                        break;
                    };
                    debug!(n = solutions.len(), "blocking enumerated model");
                    self.backend.assert(&blocking)?;
                    solutions.push(model);
                }
                Satisfiability::Unsat => break,
                Satisfiability::Unknown(reason) => {
                    debug!(%reason, "solver gave up during enumeration");
                    break;
                }
            }
        }
        Ok(solutions)
    }
}

/// `x1 != v1 || … || xn != vn` for the assignments of `model`, or `None`
/// when the model is empty
fn blocking_constraint(model: &Solution) -> Option<Spanned<Expr>> {
    let mut names: Vec<_> = model.assignments.keys().collect();
    names.sort();
    let mut clause: Option<Spanned<Expr>> = None;
    for name in names {
        let value = match &model.assignments[name] {
            SolvedValue::Bool(b) => Expr::Bool(*b),
            SolvedValue::Int(i) => Expr::Int(i.clone()),
        };
        let diff = Spanned::dummy(Expr::BinaryExpr(
            BinOp::Neq,
            Box::new(Expr::var(name.clone())),
            Box::new(Spanned::dummy(value)),
        ));
        clause = Some(match clause {
            None => diff,
            Some(acc) => Spanned::dummy(Expr::BinaryExpr(
                BinOp::Or,
                Box::new(acc),
                Box::new(diff),
            )),
        });
    }
    clause
}
