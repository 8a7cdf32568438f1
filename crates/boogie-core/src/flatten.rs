//! Lowering of structured bodies to labeled basic blocks
//!
//! Structured control flow (`if`/`while`/`break`/labels) is compiled away
//! before execution: a procedure body becomes an ordered list of labeled
//! blocks, each a run of basic statements terminated by exactly one `goto`
//! or `return`. The statement evaluator only ever dispatches on blocks.
//!
//! Shape guarantees (relied on by the evaluator and checked by the tests):
//! - every block is non-empty,
//! - the final statement of a block is `goto` or `return`, and no other
//!   statement of the block is a jump or structured statement,
//! - the first block is labeled `start`,
//! - every label targeted by a `goto` exists in the block map.

use crate::ast::{
    Block, Expr, Id, LabeledStatement, SpecClause, Statement, UnOp, WildcardExpr,
};
use crate::span::{Span, Spanned};
use rustc_hash::FxHashMap;

/// Label of the block every flattened body starts with
pub const ENTRY_LABEL: &str = "start";

/// Key under which the nearest enclosing loop exit is recorded, targeted by
/// anonymous `break`
const INNERMOST: &str = "*innermost*";

/// A flattened body: ordered labeled blocks with a lookup index
#[derive(Debug, Clone, Default)]
pub struct BasicBlocks {
    blocks: Vec<(Id, Vec<Spanned<Statement>>)>,
    index: FxHashMap<Id, usize>,
}

impl BasicBlocks {
    /// The statements of the block labeled `label`
    pub fn get(&self, label: &str) -> Option<&[Spanned<Statement>]> {
        self.index.get(label).map(|&i| self.blocks[i].1.as_slice())
    }

    /// Blocks in emission order
    pub fn iter(&self) -> impl Iterator<Item = (&Id, &[Spanned<Statement>])> {
        self.blocks.iter().map(|(l, stmts)| (l, stmts.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Flatten a structured procedure body. An implicit `return` terminates the
/// body, so the result is never empty.
pub fn flatten(body: &Block) -> BasicBlocks {
    let mut fl = Flattener {
        counter: 0,
        done: Vec::new(),
        label: ENTRY_LABEL.to_string(),
        current: Vec::new(),
    };
    let exits = FxHashMap::default();
    fl.walk(body, &exits);
    fl.terminate(Spanned::dummy(Statement::Return));

    let mut index = FxHashMap::default();
    for (i, (label, _)) in fl.done.iter().enumerate() {
        index.insert(label.clone(), i);
    }
    BasicBlocks {
        blocks: fl.done,
        index,
    }
}

struct Flattener {
    counter: usize,
    done: Vec<(Id, Vec<Spanned<Statement>>)>,
    /// Label of the block being built
    label: Id,
    current: Vec<Spanned<Statement>>,
}

impl Flattener {
    fn fresh(&mut self) -> Id {
        let label = format!("${}", self.counter);
        self.counter += 1;
        label
    }

    fn emit(&mut self, stmt: Spanned<Statement>) {
        self.current.push(stmt);
    }

    /// Close the current block with `terminator` and leave the builder
    /// without an open block
    fn terminate(&mut self, terminator: Spanned<Statement>) {
        self.current.push(terminator);
        let label = std::mem::replace(&mut self.label, String::new());
        let stmts = std::mem::take(&mut self.current);
        self.done.push((label, stmts));
    }

    /// Close the current block with a `goto` and open `next`
    fn jump_to(&mut self, targets: Vec<Id>, span: Span, next: Id) {
        self.terminate(Spanned::new(Statement::Goto(targets), span));
        self.label = next;
    }

    fn assume(guard: Spanned<Expr>) -> Spanned<Statement> {
        let span = guard.span;
        Spanned::new(Statement::Predicate(SpecClause::assume(guard)), span)
    }

    fn negate(guard: &Spanned<Expr>) -> Spanned<Expr> {
        Spanned::new(
            Expr::UnaryExpr(UnOp::Not, Box::new(guard.clone())),
            guard.span,
        )
    }

    fn walk(&mut self, block: &Block, exits: &FxHashMap<Id, Id>) {
        for ls in block {
            self.statement(ls, exits);
        }
    }

    fn statement(&mut self, ls: &LabeledStatement, exits: &FxHashMap<Id, Id>) {
        let span = ls.statement.span;

        if !ls.labels.is_empty() {
            // `L: s` jumps into a block named L so that `goto L` and
            // `break L` work; all labels of the statement share one exit
            let done_label = self.fresh();
            let mut exits = exits.clone();
            for l in &ls.labels {
                self.jump_to(vec![l.clone()], span, l.clone());
                exits.insert(l.clone(), done_label.clone());
            }
            let bare = LabeledStatement::bare(ls.statement.clone());
            self.statement(&bare, &exits);
            self.jump_to(vec![done_label.clone()], span, done_label);
            return;
        }

        match &ls.statement.node {
            Statement::Goto(labels) => {
                let next = self.fresh();
                self.jump_to(labels.clone(), span, next);
            }
            Statement::Break(target) => {
                let key = target.as_deref().unwrap_or(INNERMOST);
                // The checker guarantees breaks are enclosed; a missing
                // entry means the body was not checked
                let exit = exits
                    .get(key)
                    .unwrap_or_else(|| panic!("break outside of labeled context: {}", key))
                    .clone();
                let next = self.fresh();
                self.jump_to(vec![exit], span, next);
            }
            Statement::Return => {
                self.terminate(Spanned::new(Statement::Return, span));
                self.label = self.fresh();
            }
            Statement::If(guard, then_block, else_block) => {
                let l_then = self.fresh();
                let l_else = self.fresh();
                let l_done = self.fresh();
                self.jump_to(vec![l_then.clone(), l_else.clone()], span, l_then);

                if let WildcardExpr::Expr(g) = guard {
                    self.emit(Self::assume(g.clone()));
                }
                self.walk(then_block, exits);
                self.jump_to(vec![l_done.clone()], span, l_else);

                if let WildcardExpr::Expr(g) = guard {
                    self.emit(Self::assume(Self::negate(g)));
                }
                if let Some(eb) = else_block {
                    self.walk(eb, exits);
                }
                self.jump_to(vec![l_done.clone()], span, l_done);
            }
            Statement::While(guard, invariants, body) => {
                let l_head = self.fresh();
                let l_body = self.fresh();
                let l_done = self.fresh();
                self.jump_to(vec![l_head.clone()], span, l_head.clone());

                for inv in invariants {
                    let inv_span = inv.expr.span;
                    self.emit(Spanned::new(
                        Statement::Predicate(inv.clone()),
                        inv_span,
                    ));
                }
                let guarded_done = match guard {
                    WildcardExpr::Wildcard => l_done.clone(),
                    WildcardExpr::Expr(_) => self.fresh(),
                };
                self.jump_to(vec![l_body.clone(), guarded_done.clone()], span, l_body);

                if let WildcardExpr::Expr(g) = guard {
                    self.emit(Self::assume(g.clone()));
                }
                let mut inner = exits.clone();
                inner.insert(INNERMOST.to_string(), l_done.clone());
                self.walk(body, &inner);
                self.jump_to(vec![l_head], span, guarded_done.clone());

                if let WildcardExpr::Expr(g) = guard {
                    // guarded_done is a fresh label here
                    self.emit(Self::assume(Self::negate(g)));
                    self.jump_to(vec![l_done.clone()], span, l_done);
                } else {
                    // guarded_done == l_done, already open
                }
            }
            Statement::Skip => {}
            // Basic statements pass through unchanged
            Statement::Predicate(_)
            | Statement::Havoc(_)
            | Statement::Assign(..)
            | Statement::Call(..) => {
                self.emit(ls.statement.clone());
            }
        }
    }
}

/// True when a statement may appear in the middle of a basic block
pub fn is_basic(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::Predicate(_)
            | Statement::Havoc(_)
            | Statement::Assign(..)
            | Statement::Call(..)
    )
}

/// True for block terminators
pub fn is_terminator(stmt: &Statement) -> bool {
    matches!(stmt, Statement::Goto(_) | Statement::Return)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOp;

    fn stmt(s: Statement) -> LabeledStatement {
        LabeledStatement::bare(Spanned::dummy(s))
    }

    fn assign_x(v: i32) -> LabeledStatement {
        stmt(Statement::Assign(
            vec![crate::ast::AssignTarget {
                name: Spanned::dummy("x".to_string()),
                indexes: vec![],
            }],
            vec![Expr::int_lit(v)],
        ))
    }

    fn guard_lt(n: i32) -> WildcardExpr {
        WildcardExpr::Expr(Spanned::dummy(Expr::BinaryExpr(
            BinOp::Lt,
            Box::new(Expr::var("x")),
            Box::new(Expr::int_lit(n)),
        )))
    }

    /// The block-shape check shared by the tests below
    fn assert_well_formed(blocks: &BasicBlocks) {
        assert!(!blocks.is_empty());
        assert_eq!(blocks.iter().next().unwrap().0, ENTRY_LABEL);
        for (label, stmts) in blocks.iter() {
            assert!(!stmts.is_empty(), "block {} is empty", label);
            let (last, init) = stmts.split_last().unwrap();
            assert!(is_terminator(&last.node), "block {} unterminated", label);
            for s in init {
                assert!(is_basic(&s.node), "control statement inside {}", label);
            }
            if let Statement::Goto(targets) = &last.node {
                for t in targets {
                    assert!(blocks.get(t).is_some(), "dangling goto {}", t);
                }
            }
        }
    }

    #[test]
    fn straight_line_body() {
        let blocks = flatten(&vec![assign_x(1), assign_x(2)]);
        assert_well_formed(&blocks);
        let start = blocks.get(ENTRY_LABEL).unwrap();
        assert_eq!(start.len(), 3);
        assert!(matches!(start[2].node, Statement::Return));
    }

    #[test]
    fn empty_body_gets_return() {
        let blocks = flatten(&vec![]);
        assert_well_formed(&blocks);
        assert_eq!(blocks.len(), 1);
        assert!(matches!(
            blocks.get(ENTRY_LABEL).unwrap()[0].node,
            Statement::Return
        ));
    }

    #[test]
    fn if_produces_guarded_branches() {
        let body = vec![stmt(Statement::If(
            guard_lt(10),
            vec![assign_x(1)],
            Some(vec![assign_x(2)]),
        ))];
        let blocks = flatten(&body);
        assert_well_formed(&blocks);

        // start jumps to two fresh labels; both begin with an assume
        let start = blocks.get(ENTRY_LABEL).unwrap();
        let Statement::Goto(targets) = &start.last().unwrap().node else {
            panic!("expected goto");
        };
        assert_eq!(targets.len(), 2);
        for t in targets {
            let first = &blocks.get(t).unwrap()[0].node;
            assert!(
                matches!(first, Statement::Predicate(c) if c.free),
                "branch {} must start with an assume",
                t
            );
        }
    }

    #[test]
    fn wildcard_if_has_no_assumes() {
        let body = vec![stmt(Statement::If(
            WildcardExpr::Wildcard,
            vec![assign_x(1)],
            None,
        ))];
        let blocks = flatten(&body);
        assert_well_formed(&blocks);
        for (_, stmts) in blocks.iter() {
            for s in stmts {
                assert!(!matches!(&s.node, Statement::Predicate(_)));
            }
        }
    }

    #[test]
    fn while_emits_invariants_at_head() {
        let inv = SpecClause {
            kind: crate::ast::SpecKind::LoopInvariant,
            free: false,
            expr: Expr::bool_lit(true),
        };
        let body = vec![stmt(Statement::While(
            guard_lt(3),
            vec![inv],
            vec![assign_x(7)],
        ))];
        let blocks = flatten(&body);
        assert_well_formed(&blocks);

        // find the head: the block starting with the invariant predicate
        let head = blocks
            .iter()
            .find(|(_, stmts)| {
                matches!(&stmts[0].node,
                    Statement::Predicate(c) if c.kind == crate::ast::SpecKind::LoopInvariant)
            })
            .expect("loop head with invariant");
        let Statement::Goto(targets) = &head.1.last().unwrap().node else {
            panic!("head must end in goto");
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn break_targets_loop_exit() {
        let body = vec![stmt(Statement::While(
            WildcardExpr::Wildcard,
            vec![],
            vec![stmt(Statement::Break(None))],
        ))];
        let blocks = flatten(&body);
        assert_well_formed(&blocks);
    }

    #[test]
    fn named_break_through_label() {
        let while_stmt = Spanned::dummy(Statement::While(
            WildcardExpr::Wildcard,
            vec![],
            vec![stmt(Statement::Break(Some("outer".to_string())))],
        ));
        let body = vec![LabeledStatement {
            labels: vec!["outer".to_string()],
            statement: while_stmt,
        }];
        let blocks = flatten(&body);
        assert_well_formed(&blocks);
    }

    #[test]
    fn goto_keeps_following_statements_well_formed() {
        let body = vec![
            stmt(Statement::Goto(vec![ENTRY_LABEL.to_string()])),
            assign_x(1),
        ];
        let blocks = flatten(&body);
        assert_well_formed(&blocks);
        // the trailing assignment lands in an unreachable fresh block
        assert!(blocks.len() >= 2);
    }
}
