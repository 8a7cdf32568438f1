//! Non-deterministic value generation
//!
//! Every unspecified choice the interpreter makes — the value of an
//! uninitialized variable, a missing map entry, which goto target to take,
//! whether two maps are forced equal — is a draw from a [`Generator`].
//! The deterministic generator answers `false`, `0`, and `0`; the replay
//! generator follows a prescribed choice path and records every draw so
//! the exploration driver can backtrack depth-first over alternatives.

use num_bigint::BigInt;

/// Source of unspecified values
pub trait Generator {
    /// Draw a boolean
    fn gen_bool(&mut self) -> bool;

    /// Draw an unbounded integer
    fn gen_int(&mut self) -> BigInt;

    /// Draw an index in `[0, n)`; `n` is at least 1
    fn gen_index(&mut self, n: usize) -> usize;
}

/// Default values for every draw: `false`, `0`, `0`
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicGenerator;

impl Generator for DeterministicGenerator {
    fn gen_bool(&mut self) -> bool {
        false
    }

    fn gen_int(&mut self) -> BigInt {
        BigInt::from(0)
    }

    fn gen_index(&mut self, _n: usize) -> usize {
        0
    }
}

/// The `k`-th integer in the order 0, 1, -1, 2, -2, …
pub(crate) fn zigzag(k: usize) -> BigInt {
    let k = k as i64;
    if k % 2 == 0 {
        BigInt::from(-(k / 2))
    } else {
        BigInt::from(k / 2 + 1)
    }
}

/// One recorded draw: the alternative taken and how many exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub taken: usize,
    pub alternatives: usize,
}

/// A generator that follows a prescribed prefix of choices and answers
/// first alternatives beyond it, recording everything it draws
#[derive(Debug, Clone)]
pub struct ReplayGenerator {
    path: Vec<usize>,
    cursor: usize,
    trail: Vec<Choice>,
    /// How many candidates an unbounded integer draw enumerates
    int_candidates: usize,
}

impl ReplayGenerator {
    pub fn new(path: Vec<usize>, int_candidates: usize) -> Self {
        ReplayGenerator {
            path,
            cursor: 0,
            trail: Vec::new(),
            int_candidates: int_candidates.max(1),
        }
    }

    /// The draws this run made, in order
    pub fn trail(&self) -> &[Choice] {
        &self.trail
    }

    fn next(&mut self, alternatives: usize) -> usize {
        let taken = if self.cursor < self.path.len() {
            self.path[self.cursor].min(alternatives.saturating_sub(1))
        } else {
            0
        };
        self.cursor += 1;
        self.trail.push(Choice {
            taken,
            alternatives,
        });
        taken
    }
}

impl Generator for ReplayGenerator {
    fn gen_bool(&mut self) -> bool {
        // false first, then true
        self.next(2) == 1
    }

    fn gen_int(&mut self) -> BigInt {
        let k = self.next(self.int_candidates);
        zigzag(k)
    }

    fn gen_index(&mut self, n: usize) -> usize {
        self.next(n.max(1))
    }
}

/// Given the trail of a finished run, the choice path of the next run in
/// depth-first order, or `None` when the tree is exhausted
pub(crate) fn next_path(trail: &[Choice]) -> Option<Vec<usize>> {
    for depth in (0..trail.len()).rev() {
        let c = trail[depth];
        if c.taken + 1 < c.alternatives {
            let mut path: Vec<usize> = trail[..depth].iter().map(|c| c.taken).collect();
            path.push(c.taken + 1);
            return Some(path);
        }
    }
    None
}
