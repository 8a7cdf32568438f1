//! boogie-smt - satisfiability bridge for the Boogie interpreter
//!
//! This crate provides:
//! - **`SatBackend`**: the opaque trait a concrete solver binding
//!   implements (frames, assert, check, optional model minimization)
//! - **`SolverBridge`**: the push/pop discipline around a backend and
//!   bounded model enumeration via blocking constraints
//!
//! The interpreter core only ever talks to the bridge; which solver sits
//! behind it is a deployment decision.

pub mod error;
pub mod solver;

pub use error::{SolverError, SolverResult};
pub use solver::{SatBackend, Satisfiability, SolvedValue, Solution, SolverBridge};
