//! Property-based tests for the interpreter core
//!
//! Algebraic properties of Euclidean arithmetic, the interval lattice,
//! and quantifier symmetry, verified over randomized inputs.

use boogie_core::ast::{BinOp, Expr, QOp, Type};
use boogie_core::Spanned;
use boogie_run::intervals::solve_leq_zero;
use boogie_run::{euclidean_div_mod, Interval};
use num_bigint::BigInt;
use num_traits::Signed;
use proptest::prelude::*;

fn interval(lo: i64, hi: i64) -> Interval {
    Interval::range(lo, hi)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 1000,
        max_global_rejects: 65536,
        ..ProptestConfig::default()
    })]

    // --- Euclidean division (q·b + r = a, 0 <= r < |b|) ---

    #[test]
    fn prop_euclidean_division(a in -10_000i64..10_000, b in -500i64..500) {
        prop_assume!(b != 0);
        let (a, b) = (BigInt::from(a), BigInt::from(b));
        let (q, r) = euclidean_div_mod(&a, &b);
        prop_assert_eq!(&q * &b + &r, a);
        prop_assert!(!r.is_negative());
        prop_assert!(r < b.abs());
    }

    // --- Interval lattice laws ---

    #[test]
    fn prop_meet_is_lower_bound(
        (a1, a2) in (-50i64..50, -50i64..50),
        (b1, b2) in (-50i64..50, -50i64..50),
    ) {
        let a = interval(a1.min(a2), a1.max(a2));
        let b = interval(b1.min(b2), b1.max(b2));
        let m = a.meet(&b);
        // the meet never enlarges either side (refinement is monotone)
        for x in m.enumerate() {
            prop_assert!(a.contains(&x));
            prop_assert!(b.contains(&x));
        }
    }

    #[test]
    fn prop_join_is_upper_bound(
        (a1, a2) in (-50i64..50, -50i64..50),
        (b1, b2) in (-50i64..50, -50i64..50),
    ) {
        let a = interval(a1.min(a2), a1.max(a2));
        let b = interval(b1.min(b2), b1.max(b2));
        let j = a.join(&b);
        for x in a.enumerate().into_iter().chain(b.enumerate()) {
            prop_assert!(j.contains(&x));
        }
    }

    #[test]
    fn prop_meet_join_commute(
        (a1, a2) in (-50i64..50, -50i64..50),
        (b1, b2) in (-50i64..50, -50i64..50),
    ) {
        let a = interval(a1.min(a2), a1.max(a2));
        let b = interval(b1.min(b2), b1.max(b2));
        prop_assert_eq!(a.meet(&b), b.meet(&a));
        prop_assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn prop_interval_arithmetic_sound(
        (a1, a2) in (-20i64..20, -20i64..20),
        (b1, b2) in (-20i64..20, -20i64..20),
        x in -20i64..20,
        y in -20i64..20,
    ) {
        let a = interval(a1.min(a2), a1.max(a2));
        let b = interval(b1.min(b2), b1.max(b2));
        prop_assume!(a.contains(&BigInt::from(x)));
        prop_assume!(b.contains(&BigInt::from(y)));
        prop_assert!(a.add(&b).contains(&BigInt::from(x + y)));
        prop_assert!(a.sub(&b).contains(&BigInt::from(x - y)));
        prop_assert!(a.mul(&b).contains(&BigInt::from(x * y)));
    }

    // --- Interval division used by domain inference ---

    #[test]
    fn prop_solve_leq_zero_sound(a in 1i64..20, b in -100i64..100, x in -100i64..100) {
        // whenever a·x + b <= 0 actually holds, x is inside the solution
        prop_assume!(a * x + b <= 0);
        let solution = solve_leq_zero(
            &Interval::singleton(a),
            &Interval::singleton(b),
        );
        prop_assert!(solution.contains(&BigInt::from(x)));
    }

    #[test]
    fn prop_solve_negative_coefficient_sound(
        a in -20i64..-1,
        b in -100i64..100,
        x in -100i64..100,
    ) {
        prop_assume!(a * x + b <= 0);
        let solution = solve_leq_zero(
            &Interval::singleton(a),
            &Interval::singleton(b),
        );
        prop_assert!(solution.contains(&BigInt::from(x)));
    }

    // --- Quantifier symmetry: forall == !exists-not over finite ranges ---

    #[test]
    fn prop_forall_is_negated_exists(lo in -5i64..5, width in 0i64..6, c in -10i64..10) {
        use boogie_run::{execute_program_det, Outcome};
        use boogie_core::ast::{Decl, LabeledStatement, Program, SpecClause, Statement};
        use boogie_core::TypeContext;

        let hi = lo + width;
        let in_range = |v: Spanned<Expr>| {
            Spanned::dummy(Expr::BinaryExpr(
                BinOp::And,
                Box::new(Spanned::dummy(Expr::BinaryExpr(
                    BinOp::Leq,
                    Box::new(Expr::int_lit(lo)),
                    Box::new(v.clone()),
                ))),
                Box::new(Spanned::dummy(Expr::BinaryExpr(
                    BinOp::Leq,
                    Box::new(v),
                    Box::new(Expr::int_lit(hi)),
                ))),
            ))
        };
        // body: in_range(i) ==> i <= c
        let body = Spanned::dummy(Expr::BinaryExpr(
            BinOp::Implies,
            Box::new(in_range(Expr::var("i"))),
            Box::new(Spanned::dummy(Expr::BinaryExpr(
                BinOp::Leq,
                Box::new(Expr::var("i")),
                Box::new(Expr::int_lit(c)),
            ))),
        ));
        let forall = Spanned::dummy(Expr::Quantified(
            QOp::Forall,
            vec![],
            vec![("i".to_string(), Type::Int)],
            Box::new(body.clone()),
        ));
        // !(exists i :: !(body))
        let neg_exists = Spanned::dummy(Expr::UnaryExpr(
            boogie_core::ast::UnOp::Not,
            Box::new(Spanned::dummy(Expr::Quantified(
                QOp::Exists,
                vec![],
                vec![("i".to_string(), Type::Int)],
                Box::new(Spanned::dummy(Expr::UnaryExpr(
                    boogie_core::ast::UnOp::Not,
                    Box::new(body),
                ))),
            ))),
        ));

        let program_with = |e: Spanned<Expr>| {
            Program::new(vec![Spanned::dummy(Decl::ProcedureDecl {
                name: "P".to_string(),
                type_args: vec![],
                formals: vec![],
                rets: vec![],
                specs: vec![],
                body: Some((
                    vec![],
                    vec![LabeledStatement::bare(Spanned::dummy(
                        Statement::Predicate(SpecClause::assert(e)),
                    ))],
                )),
            })])
        };

        let p1 = program_with(forall);
        let p2 = program_with(neg_exists);
        let o1 = execute_program_det(&p1, TypeContext::for_program(&p1), 64, "P").outcome();
        let o2 = execute_program_det(&p2, TypeContext::for_program(&p2), 64, "P").outcome();
        prop_assert_eq!(o1, o2);
        prop_assert!(o1 == Outcome::Passed || o1 == Outcome::Failed);
    }

    // --- Generator determinism (same path, same draws) ---

    #[test]
    fn prop_exploration_order_is_stable(ints in 2usize..6) {
        use boogie_run::generator::{Generator, ReplayGenerator};
        let mut a = ReplayGenerator::new(vec![1, 0, 2], ints);
        let mut b = ReplayGenerator::new(vec![1, 0, 2], ints);
        for _ in 0..5 {
            prop_assert_eq!(a.gen_int(), b.gen_int());
            prop_assert_eq!(a.gen_bool(), b.gen_bool());
            prop_assert_eq!(a.gen_index(3), b.gen_index(3));
        }
        prop_assert_eq!(a.trail(), b.trail());
    }
}
