//! boogie-run - interpreter and run-time assertion checker for Boogie 2
//!
//! This crate provides:
//! - **Runtime values**: integers, booleans, user-type tags, and map
//!   references into a reference-counted heap
//! - **Lazy symbolic execution**: variables and map entries get values on
//!   first read, from axiom-derived definitions or from a pluggable
//!   generator, constrained by where clauses and axioms
//! - **Exploration**: deterministic single runs, or a lazy depth-first
//!   stream of all branches, one test case per terminal state
//! - **Quantifier evaluation**: interval-based domain inference and
//!   bounded enumeration
//!
//! # Quick Start
//!
//! ```rust
//! use boogie_core::ast::{Decl, Expr, LabeledStatement, Program, SpecClause, Statement};
//! use boogie_core::{Spanned, TypeContext};
//! use boogie_run::{execute_program_det, Outcome};
//!
//! // procedure P() { assert true; }
//! let body = vec![LabeledStatement::bare(Spanned::dummy(
//!     Statement::Predicate(SpecClause::assert(Expr::bool_lit(true))),
//! ))];
//! let program = Program::new(vec![Spanned::dummy(Decl::ProcedureDecl {
//!     name: "P".to_string(),
//!     type_args: vec![],
//!     formals: vec![],
//!     rets: vec![],
//!     specs: vec![],
//!     body: Some((vec![], body)),
//! })]);
//!
//! let tc = TypeContext::for_program(&program);
//! let case = execute_program_det(&program, tc, 64, "P");
//! assert_eq!(case.outcome(), Outcome::Passed);
//! ```

pub mod constraints;
pub mod error;
pub mod eval;
pub mod exec;
pub mod explore;
pub mod generator;
pub mod heap;
pub mod intervals;
pub mod memory;
pub mod outcome;
pub mod preprocess;
pub mod quantifier;
pub mod value;

// Re-exports
pub use error::{
    ExecResult, FailureKind, FailureSource, InternalError, RuntimeFailure, StackFrame,
};
pub use eval::{euclidean_div_mod, Interpreter};
pub use exec::EntryRecord;
pub use explore::{
    execute_program, execute_program_det, execute_program_generic, ExhaustiveGenerator,
    Exploration,
};
pub use generator::{DeterministicGenerator, Generator};
pub use heap::Heap;
pub use intervals::{Bound, Interval};
pub use memory::{Memory, StoreKind};
pub use outcome::{summarize, Outcome, SessionSummary, TestCase};
pub use preprocess::{preprocess, ProcedureImpl, ProcedureInfo, ProgramEnv};
pub use value::{CustomValue, MapCache, MapRepr, Ref, Value};
