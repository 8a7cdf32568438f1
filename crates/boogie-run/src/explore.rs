//! Execution drivers
//!
//! Three ways in, mirroring how much of the choice tree the caller wants:
//!
//! - [`execute_program_det`] runs once with default values for every draw
//! - [`execute_program`] explores the whole tree lazily, yielding one
//!   test case per branch in depth-first order
//! - [`execute_program_generic`] runs once with a caller-supplied
//!   generator
//!
//! Exploration replays: each run records its draws, and the driver
//! re-executes with the deepest unexhausted choice advanced. Every run
//! starts from a fresh environment, so branches share no state.

use crate::eval::Interpreter;
use crate::generator::{next_path, DeterministicGenerator, Generator, ReplayGenerator};
use crate::outcome::TestCase;
use crate::preprocess::{preprocess, ProgramEnv};
use boogie_core::ast::Program;
use boogie_core::TypeContext;
use tracing::debug;

/// Configuration of the exhaustive (stream) generator
#[derive(Debug, Clone, Copy)]
pub struct ExhaustiveGenerator {
    /// How many candidates an unbounded-integer draw enumerates, in the
    /// order 0, 1, -1, 2, -2, …
    pub int_candidates: usize,
}

impl Default for ExhaustiveGenerator {
    fn default() -> Self {
        // small by default: every integer draw multiplies the tree
        ExhaustiveGenerator { int_candidates: 5 }
    }
}

/// Run the entry procedure deterministically: `false`, `0`, and first
/// alternatives everywhere, with goto retry on assumption violations
pub fn execute_program_det(
    program: &Program,
    tc: TypeContext,
    q_bound: u64,
    entry: &str,
) -> TestCase {
    execute_program_generic(program, tc, DeterministicGenerator, q_bound, entry)
}

/// Run the entry procedure once with the given generator
pub fn execute_program_generic<G: Generator>(
    program: &Program,
    tc: TypeContext,
    generator: G,
    q_bound: u64,
    entry: &str,
) -> TestCase {
    let env = preprocess(program, tc);
    let mut interp = Interpreter::new(env, generator, q_bound, true);
    run_and_record(&mut interp, entry)
}

/// Explore all branches of the entry procedure, lazily
pub fn execute_program(
    program: &Program,
    tc: TypeContext,
    generator: ExhaustiveGenerator,
    q_bound: u64,
    entry: &str,
) -> Exploration {
    let env = preprocess(program, tc);
    Exploration {
        env,
        entry: entry.to_string(),
        q_bound,
        int_candidates: generator.int_candidates,
        next_path: Some(Vec::new()),
        branches: 0,
    }
}

/// Lazy depth-first stream of test cases
pub struct Exploration {
    env: ProgramEnv,
    entry: String,
    q_bound: u64,
    int_candidates: usize,
    /// Choice path of the next branch; `None` when the tree is exhausted
    next_path: Option<Vec<usize>>,
    branches: usize,
}

impl Iterator for Exploration {
    type Item = TestCase;

    fn next(&mut self) -> Option<TestCase> {
        let path = self.next_path.take()?;
        let generator = ReplayGenerator::new(path, self.int_candidates);
        let mut interp =
            Interpreter::new(self.env.clone(), generator, self.q_bound, false);
        let case = run_and_record(&mut interp, &self.entry);
        self.branches += 1;
        self.next_path = next_path(interp.gen.trail());
        debug!(
            branch = self.branches,
            outcome = %case.outcome(),
            exhausted = self.next_path.is_none(),
            "explored branch"
        );
        Some(case)
    }
}

fn run_and_record<G: Generator>(interp: &mut Interpreter<G>, entry: &str) -> TestCase {
    let record = interp.run_entry(entry);
    let global_inputs = interp
        .memory
        .old_globals
        .iter()
        .map(|(name, v)| (name.clone(), v.clone()))
        .collect();
    TestCase {
        procedure: entry.to_string(),
        ins: record.ins,
        global_inputs,
        outs: record.outs,
        memory: interp.memory.clone(),
        failure: record.failure,
    }
}
