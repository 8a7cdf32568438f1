//! Integer intervals with infinite endpoints
//!
//! The quantifier engine infers finite domains for bound variables by
//! abstract interpretation over this lattice: `top` is the unbounded
//! interval, `bottom` the empty one, `meet`/`join` follow conjunction and
//! disjunction. Arithmetic is Moore-style hull arithmetic; division is
//! only ever used with a divisor interval of known sign (callers fall back
//! to `top` otherwise).

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use std::cmp::Ordering;
use std::fmt;

/// An integer endpoint extended with infinities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    NegInf,
    Fin(BigInt),
    PosInf,
}

impl Bound {
    pub fn fin(i: impl Into<BigInt>) -> Bound {
        Bound::Fin(i.into())
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, Bound::Fin(_))
    }

    fn neg(&self) -> Bound {
        match self {
            Bound::NegInf => Bound::PosInf,
            Bound::PosInf => Bound::NegInf,
            Bound::Fin(i) => Bound::Fin(-i),
        }
    }

    fn add(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Fin(a), Bound::Fin(b)) => Bound::Fin(a + b),
            (Bound::NegInf, Bound::PosInf) | (Bound::PosInf, Bound::NegInf) => {
                // only reachable through already-degenerate intervals
                Bound::Fin(BigInt::zero())
            }
            (Bound::NegInf, _) | (_, Bound::NegInf) => Bound::NegInf,
            (Bound::PosInf, _) | (_, Bound::PosInf) => Bound::PosInf,
        }
    }

    fn mul(&self, other: &Bound) -> Bound {
        let sign = |b: &Bound| match b {
            Bound::NegInf => -1,
            Bound::PosInf => 1,
            Bound::Fin(i) => {
                if i.is_positive() {
                    1
                } else if i.is_negative() {
                    -1
                } else {
                    0
                }
            }
        };
        match (self, other) {
            (Bound::Fin(a), Bound::Fin(b)) => Bound::Fin(a * b),
            _ => match sign(self) * sign(other) {
                // 0 × ∞ = 0 in hull arithmetic
                0 => Bound::Fin(BigInt::zero()),
                1 => Bound::PosInf,
                _ => Bound::NegInf,
            },
        }
    }
}

impl PartialOrd for Bound {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bound {
    fn cmp(&self, other: &Self) -> Ordering {
        use Bound::*;
        match (self, other) {
            (NegInf, NegInf) | (PosInf, PosInf) => Ordering::Equal,
            (NegInf, _) => Ordering::Less,
            (_, NegInf) => Ordering::Greater,
            (PosInf, _) => Ordering::Greater,
            (_, PosInf) => Ordering::Less,
            (Fin(a), Fin(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::NegInf => write!(f, "-inf"),
            Bound::PosInf => write!(f, "inf"),
            Bound::Fin(i) => write!(f, "{}", i),
        }
    }
}

/// An integer interval; empty (bottom) when `lower > upper`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub lower: Bound,
    pub upper: Bound,
}

impl Interval {
    pub fn new(lower: Bound, upper: Bound) -> Interval {
        Interval { lower, upper }
    }

    /// The unbounded interval
    pub fn top() -> Interval {
        Interval::new(Bound::NegInf, Bound::PosInf)
    }

    /// The empty interval
    pub fn bottom() -> Interval {
        Interval::new(Bound::PosInf, Bound::NegInf)
    }

    pub fn singleton(i: impl Into<BigInt>) -> Interval {
        let i = i.into();
        Interval::new(Bound::Fin(i.clone()), Bound::Fin(i))
    }

    pub fn range(lo: impl Into<BigInt>, hi: impl Into<BigInt>) -> Interval {
        Interval::new(Bound::fin(lo), Bound::fin(hi))
    }

    /// Everything at most `hi`
    pub fn at_most(hi: Bound) -> Interval {
        Interval::new(Bound::NegInf, hi)
    }

    /// Everything at least `lo`
    pub fn at_least(lo: Bound) -> Interval {
        Interval::new(lo, Bound::PosInf)
    }

    pub fn is_bottom(&self) -> bool {
        self.lower > self.upper
    }

    pub fn is_finite(&self) -> bool {
        self.is_bottom() || (self.lower.is_finite() && self.upper.is_finite())
    }

    pub fn contains(&self, i: &BigInt) -> bool {
        self.lower <= Bound::Fin(i.clone()) && Bound::Fin(i.clone()) <= self.upper
    }

    /// Number of elements, `None` when infinite
    pub fn size(&self) -> Option<BigInt> {
        if self.is_bottom() {
            return Some(BigInt::zero());
        }
        match (&self.lower, &self.upper) {
            (Bound::Fin(lo), Bound::Fin(hi)) => Some(hi - lo + BigInt::one()),
            _ => None,
        }
    }

    /// Greatest lower bound (conjunction)
    pub fn meet(&self, other: &Interval) -> Interval {
        Interval::new(
            self.lower.clone().max(other.lower.clone()),
            self.upper.clone().min(other.upper.clone()),
        )
    }

    /// Least upper bound (disjunction)
    pub fn join(&self, other: &Interval) -> Interval {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        Interval::new(
            self.lower.clone().min(other.lower.clone()),
            self.upper.clone().max(other.upper.clone()),
        )
    }

    pub fn negated(&self) -> Interval {
        if self.is_bottom() {
            return Interval::bottom();
        }
        Interval::new(self.upper.neg(), self.lower.neg())
    }

    pub fn add(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Interval::bottom();
        }
        Interval::new(self.lower.add(&other.lower), self.upper.add(&other.upper))
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        self.add(&other.negated())
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Interval::bottom();
        }
        let corners = [
            self.lower.mul(&other.lower),
            self.lower.mul(&other.upper),
            self.upper.mul(&other.lower),
            self.upper.mul(&other.upper),
        ];
        Interval::new(
            corners.iter().min().unwrap().clone(),
            corners.iter().max().unwrap().clone(),
        )
    }

    /// Is every element strictly positive?
    pub fn strictly_positive(&self) -> bool {
        !self.is_bottom() && self.lower > Bound::Fin(BigInt::zero())
    }

    /// Is every element strictly negative?
    pub fn strictly_negative(&self) -> bool {
        !self.is_bottom() && self.upper < Bound::Fin(BigInt::zero())
    }

    /// Enumerate a finite interval in ascending order
    pub fn enumerate(&self) -> Vec<BigInt> {
        let (Bound::Fin(lo), Bound::Fin(hi)) = (&self.lower, &self.upper) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut i = lo.clone();
        while &i <= hi {
            out.push(i.clone());
            i += 1;
        }
        out
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bottom() {
            write!(f, "[]")
        } else {
            write!(f, "[{}, {}]", self.lower, self.upper)
        }
    }
}

/// `floor(n / d)` extended to infinite numerators; `d` is positive
/// (finite positive or +inf)
fn floor_div(n: &Bound, d: &Bound) -> Bound {
    match (n, d) {
        (Bound::PosInf, _) => Bound::PosInf,
        (Bound::NegInf, _) => Bound::NegInf,
        (Bound::Fin(n), Bound::PosInf) => {
            // limit of n/d as d grows: 0 from above or below
            if n.is_negative() {
                Bound::Fin(-BigInt::one())
            } else {
                Bound::Fin(BigInt::zero())
            }
        }
        (Bound::Fin(n), Bound::Fin(d)) => Bound::Fin(n.div_floor(d)),
        (_, Bound::NegInf) => unreachable!("divisor must be positive"),
    }
}

/// `ceil(n / d)` extended to infinite numerators; `d` is positive
fn ceil_div(n: &Bound, d: &Bound) -> Bound {
    match (n, d) {
        (Bound::PosInf, _) => Bound::PosInf,
        (Bound::NegInf, _) => Bound::NegInf,
        (Bound::Fin(n), Bound::PosInf) => {
            if n.is_positive() {
                Bound::Fin(BigInt::one())
            } else {
                Bound::Fin(BigInt::zero())
            }
        }
        (Bound::Fin(n), Bound::Fin(d)) => Bound::Fin(n.div_ceil(d)),
        (_, Bound::NegInf) => unreachable!("divisor must be positive"),
    }
}

/// The interval of integers `x` for which `a·x + b ≤ 0` can hold for some
/// `a ∈ coeff` and `b ∈ offset`. When the coefficient's sign is not known
/// the result is `top` — the expression does not constrain `x`.
pub fn solve_leq_zero(coeff: &Interval, offset: &Interval) -> Interval {
    if coeff.is_bottom() || offset.is_bottom() {
        return Interval::bottom();
    }
    // a·x ≤ -b
    let neg_b = offset.negated();
    if coeff.strictly_positive() {
        // x ≤ max (-b)/a over the corner box
        let corners = [
            floor_div(&neg_b.lower, &coeff.lower),
            floor_div(&neg_b.lower, &coeff.upper),
            floor_div(&neg_b.upper, &coeff.lower),
            floor_div(&neg_b.upper, &coeff.upper),
        ];
        Interval::at_most(corners.iter().max().unwrap().clone())
    } else if coeff.strictly_negative() {
        // dividing by a negative coefficient flips the comparison:
        // x ≥ min (-b)/a, computed on the mirrored positive box
        let pos_a = coeff.negated();
        let b = offset.clone();
        let corners = [
            ceil_div(&b.lower, &pos_a.lower),
            ceil_div(&b.lower, &pos_a.upper),
            ceil_div(&b.upper, &pos_a.lower),
            ceil_div(&b.upper, &pos_a.upper),
        ];
        Interval::at_least(corners.iter().min().unwrap().clone())
    } else {
        Interval::top()
    }
}
