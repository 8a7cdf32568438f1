//! Test-case outcomes and session summaries
//!
//! Every terminal state of a run is a test case: `passed`, `invalid`
//! (an assumption was violated), `non-executable` (the program outran the
//! interpreter), or `failed` (a checked clause or operation failed).
//! A session summary totals the classes and counts unique failures — a
//! failure is unique up to procedure and failure position.

use crate::error::{FailureKind, FailureSource, RuntimeFailure};
use crate::memory::Memory;
use crate::value::Value;
use boogie_core::{Id, Span};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Dump the heap of failing test cases (set BOOGIE2_DEBUG_HEAP=1)
fn debug_heap() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    *FLAG.get_or_init(|| std::env::var("BOOGIE2_DEBUG_HEAP").is_ok())
}

/// Classification of one terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Passed,
    Invalid,
    NonExecutable,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            Outcome::Passed => "passed",
            Outcome::Invalid => "invalid",
            Outcome::NonExecutable => "non-executable",
            Outcome::Failed => "failed",
        };
        write!(f, "{}", word)
    }
}

/// One terminal state of the entry procedure
#[derive(Debug, Clone)]
pub struct TestCase {
    pub procedure: Id,
    /// Input parameters; `None` when the run never materialized one
    pub ins: Vec<(Id, Option<Value>)>,
    /// Globals the run read before modifying them, with their entry values
    pub global_inputs: Vec<(Id, Value)>,
    pub outs: Vec<(Id, Option<Value>)>,
    /// Memory at the end of the run
    pub memory: Memory,
    pub failure: Option<Box<RuntimeFailure>>,
}

impl TestCase {
    pub fn outcome(&self) -> Outcome {
        match &self.failure {
            None => Outcome::Passed,
            Some(f) => match f.kind() {
                FailureKind::Error => Outcome::Failed,
                FailureKind::Unreachable => Outcome::Invalid,
                FailureKind::Nonexecutable => Outcome::NonExecutable,
            },
        }
    }

    /// `(procedure, failure position)`, the unit of failure uniqueness
    pub fn failure_site(&self) -> Option<(&str, Span)> {
        self.failure
            .as_ref()
            .map(|f| (self.procedure.as_str(), f.pos))
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.procedure)?;
        for (i, (_, v)) in self.ins.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match v {
                Some(v) => write!(f, "{}", self.memory.show_value(v))?,
                None => write!(f, "_")?,
            }
        }
        write!(f, ")")?;
        if !self.global_inputs.is_empty() {
            write!(f, " (")?;
            for (i, (name, v)) in self.global_inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} = {}", name, self.memory.show_value(v))?;
            }
            write!(f, ")")?;
        }
        write!(f, ": {}", self.outcome())?;

        if let Some(failure) = &self.failure {
            writeln!(f)?;
            write!(f, "  {} at {}", failure.source, failure.pos)?;
            if let FailureSource::SpecViolation {
                last_term: Some(term),
                expr,
                ..
            } = &failure.source
            {
                if term != expr {
                    writeln!(f)?;
                    write!(f, "  last evaluated: \"{}\"", term.node)?;
                }
            }
            for frame in &failure.trace {
                writeln!(f)?;
                write!(f, "  in call to {} at {}", frame.callee, frame.call_pos)?;
            }
            if debug_heap() {
                writeln!(f)?;
                write!(f, "  heap:")?;
                for line in failure.memory.heap.to_string().lines() {
                    writeln!(f)?;
                    write!(f, "    {}", line)?;
                }
            }
        }
        Ok(())
    }
}

/// Totals over a finished session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub passed: usize,
    pub invalid: usize,
    pub non_executable: usize,
    pub failed: usize,
    /// Failing cases up to (procedure, failure position)
    pub unique_failures: usize,
}

impl SessionSummary {
    pub fn total(&self) -> usize {
        self.passed + self.invalid + self.non_executable + self.failed
    }
}

/// Classify and total a set of test cases
pub fn summarize<'a>(cases: impl IntoIterator<Item = &'a TestCase>) -> SessionSummary {
    let mut summary = SessionSummary::default();
    let mut sites: FxHashSet<(String, Span)> = FxHashSet::default();
    for case in cases {
        match case.outcome() {
            Outcome::Passed => summary.passed += 1,
            Outcome::Invalid => summary.invalid += 1,
            Outcome::NonExecutable => summary.non_executable += 1,
            Outcome::Failed => {
                summary.failed += 1;
            }
        }
        if case.outcome() == Outcome::Failed {
            if let Some((proc_name, pos)) = case.failure_site() {
                sites.insert((proc_name.to_string(), pos));
            }
        }
    }
    summary.unique_failures = sites.len();
    summary
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} executions: {} passed, {} invalid, {} non-executable, {} failed ({} unique)",
            self.total(),
            self.passed,
            self.invalid,
            self.non_executable,
            self.failed,
            self.unique_failures
        )
    }
}
