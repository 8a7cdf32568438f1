//! Property-based tests for the basic-block flattener
//!
//! Random structured bodies are lowered and the block-shape guarantees
//! checked: every block non-empty and terminated exactly once, no
//! structured statement inside a block, entry label present, and every
//! goto target resolvable.

use boogie_core::ast::{
    AssignTarget, BinOp, Block, Expr, LabeledStatement, SpecClause, Statement,
    WildcardExpr,
};
use boogie_core::flatten::{flatten, is_basic, is_terminator, BasicBlocks, ENTRY_LABEL};
use boogie_core::Spanned;
use proptest::prelude::*;

fn sp<T>(node: T) -> Spanned<T> {
    Spanned::dummy(node)
}

fn bare(s: Statement) -> LabeledStatement {
    LabeledStatement::bare(sp(s))
}

fn guard(n: i64) -> WildcardExpr {
    WildcardExpr::Expr(sp(Expr::BinaryExpr(
        BinOp::Lt,
        Box::new(Expr::var("x")),
        Box::new(Expr::int_lit(n)),
    )))
}

/// Leaf statements, with `break` only available inside loops
fn arb_leaf(in_loop: bool) -> BoxedStrategy<LabeledStatement> {
    let assign = (0i64..100).prop_map(|k| {
        bare(Statement::Assign(
            vec![AssignTarget {
                name: sp("x".to_string()),
                indexes: vec![],
            }],
            vec![Expr::int_lit(k)],
        ))
    });
    let base = prop_oneof![
        assign,
        Just(bare(Statement::Predicate(SpecClause::assert(
            Expr::bool_lit(true)
        )))),
        Just(bare(Statement::Predicate(SpecClause::assume(
            Expr::bool_lit(true)
        )))),
        Just(bare(Statement::Havoc(vec![sp("x".to_string())]))),
        Just(bare(Statement::Skip)),
        Just(bare(Statement::Return)),
    ];
    if in_loop {
        prop_oneof![base, Just(bare(Statement::Break(None)))].boxed()
    } else {
        base.boxed()
    }
}

fn arb_stmt(depth: u32, in_loop: bool) -> BoxedStrategy<LabeledStatement> {
    if depth == 0 {
        return arb_leaf(in_loop);
    }
    let nested = prop_oneof![
        // if with both guard flavors
        (
            prop::bool::ANY,
            (-5i64..5),
            arb_block(depth - 1, in_loop),
            proptest::option::of(arb_block(depth - 1, in_loop)),
        )
            .prop_map(|(wildcard, k, then_b, else_b)| {
                let g = if wildcard {
                    WildcardExpr::Wildcard
                } else {
                    guard(k)
                };
                bare(Statement::If(g, then_b, else_b))
            }),
        // while, occasionally with an invariant
        (
            prop::bool::ANY,
            prop::bool::ANY,
            arb_block(depth - 1, true),
        )
            .prop_map(|(wildcard, with_inv, body)| {
                let g = if wildcard {
                    WildcardExpr::Wildcard
                } else {
                    guard(3)
                };
                let invs = if with_inv {
                    vec![SpecClause {
                        kind: boogie_core::ast::SpecKind::LoopInvariant,
                        free: false,
                        expr: Expr::bool_lit(true),
                    }]
                } else {
                    vec![]
                };
                bare(Statement::While(g, invs, body))
            }),
    ];
    prop_oneof![arb_leaf(in_loop), nested].boxed()
}

fn arb_block(depth: u32, in_loop: bool) -> BoxedStrategy<Block> {
    prop::collection::vec(arb_stmt(depth, in_loop), 0..4).boxed()
}

fn assert_well_formed(blocks: &BasicBlocks) {
    assert!(!blocks.is_empty());
    let mut first = true;
    for (label, stmts) in blocks.iter() {
        if first {
            assert_eq!(label, ENTRY_LABEL);
            first = false;
        }
        assert!(!stmts.is_empty(), "block {} is empty", label);
        let (last, init) = stmts.split_last().unwrap();
        assert!(
            is_terminator(&last.node),
            "block {} does not end in goto/return",
            label
        );
        for s in init {
            assert!(
                is_basic(&s.node),
                "non-basic statement inside block {}",
                label
            );
        }
        if let Statement::Goto(targets) = &last.node {
            assert!(!targets.is_empty(), "empty goto in {}", label);
            for t in targets {
                assert!(blocks.get(t).is_some(), "dangling goto target {}", t);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn flattening_produces_well_formed_blocks(body in arb_block(3, false)) {
        let blocks = flatten(&body);
        assert_well_formed(&blocks);
    }

    #[test]
    fn flattening_is_deterministic(body in arb_block(3, false)) {
        let a = flatten(&body);
        let b = flatten(&body);
        let left: Vec<_> = a.iter().map(|(l, s)| (l.clone(), s.to_vec())).collect();
        let right: Vec<_> = b.iter().map(|(l, s)| (l.clone(), s.to_vec())).collect();
        prop_assert_eq!(left, right);
    }

    #[test]
    fn basic_statements_survive_flattening(count in 1usize..8) {
        // a straight-line body keeps its statements in order, plus the
        // implicit return
        let body: Block = (0..count)
            .map(|k| {
                bare(Statement::Assign(
                    vec![AssignTarget {
                        name: sp("x".to_string()),
                        indexes: vec![],
                    }],
                    vec![Expr::int_lit(k as i64)],
                ))
            })
            .collect();
        let blocks = flatten(&body);
        let start = blocks.get(ENTRY_LABEL).unwrap();
        prop_assert_eq!(start.len(), count + 1);
    }
}
