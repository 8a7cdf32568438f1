//! Negation-prenex normal form
//!
//! The quantifier engine requires its input in a shape where negations
//! sit on atoms and top-level quantifiers are pulled to the front:
//! implications and equivalences are expanded, `!` is pushed through the
//! connectives, and bound variables are renamed apart so that hoisting
//! binders cannot capture. Comparisons and nested quantified expressions
//! count as atoms — a negation stops on them, and the evaluator handles
//! the negated form directly. Interval inference treats such negated
//! atoms as unconstraining, which is what keeps guarded quantifier
//! bodies (`guard ==> body`) enumerable over the guard's region.

use crate::ast::{BinOp, Expr, Id, QOp, Type, UnOp};
use crate::span::{Span, Spanned};
use rustc_hash::FxHashMap;

fn sp(node: Expr, span: Span) -> Spanned<Expr> {
    Spanned::new(node, span)
}

fn binary(op: BinOp, l: Spanned<Expr>, r: Spanned<Expr>) -> Spanned<Expr> {
    let span = l.span.merge(r.span);
    sp(Expr::BinaryExpr(op, Box::new(l), Box::new(r)), span)
}

/// Rewrite to negation normal form: negations on atoms only, no `==>`,
/// `<==`, or `<==>` in the logical skeleton
pub fn negation_nf(e: &Spanned<Expr>) -> Spanned<Expr> {
    let span = e.span;
    match &e.node {
        Expr::UnaryExpr(UnOp::Not, inner) => negated(inner),
        Expr::BinaryExpr(BinOp::And, l, r) => {
            binary(BinOp::And, negation_nf(l), negation_nf(r))
        }
        Expr::BinaryExpr(BinOp::Or, l, r) => {
            binary(BinOp::Or, negation_nf(l), negation_nf(r))
        }
        Expr::BinaryExpr(BinOp::Implies, l, r) => {
            binary(BinOp::Or, negated(l), negation_nf(r))
        }
        Expr::BinaryExpr(BinOp::Explies, l, r) => {
            binary(BinOp::Or, negation_nf(l), negated(r))
        }
        Expr::BinaryExpr(BinOp::Equiv, l, r) => {
            // (l ==> r) && (r ==> l), each half expanded
            let fwd = binary(BinOp::Or, negated(l), negation_nf(r));
            let bwd = binary(BinOp::Or, negation_nf(l), negated(r));
            binary(BinOp::And, fwd, bwd)
        }
        Expr::Quantified(op, tv, vars, body) => sp(
            Expr::Quantified(*op, tv.clone(), vars.clone(), Box::new(negation_nf(body))),
            span,
        ),
        // Atoms (comparisons included) stay as they are
        _ => e.clone(),
    }
}

/// Negation normal form of `!e`
fn negated(e: &Spanned<Expr>) -> Spanned<Expr> {
    let span = e.span;
    match &e.node {
        Expr::Bool(b) => sp(Expr::Bool(!b), span),
        Expr::UnaryExpr(UnOp::Not, inner) => negation_nf(inner),
        Expr::BinaryExpr(BinOp::And, l, r) => binary(BinOp::Or, negated(l), negated(r)),
        Expr::BinaryExpr(BinOp::Or, l, r) => binary(BinOp::And, negated(l), negated(r)),
        Expr::BinaryExpr(BinOp::Implies, l, r) => {
            binary(BinOp::And, negation_nf(l), negated(r))
        }
        Expr::BinaryExpr(BinOp::Explies, l, r) => {
            binary(BinOp::And, negated(l), negation_nf(r))
        }
        Expr::BinaryExpr(BinOp::Equiv, l, r) => {
            // l xor r
            let left = binary(BinOp::And, negation_nf(l), negated(r));
            let right = binary(BinOp::And, negated(l), negation_nf(r));
            binary(BinOp::Or, left, right)
        }
        // Comparisons and quantified expressions are atoms: the negation
        // stays on them
        _ => sp(Expr::UnaryExpr(UnOp::Not, Box::new(e.clone())), span),
    }
}

/// One hoisted binder group
type Binder = (QOp, Vec<Id>, Vec<(Id, Type)>);

/// Rewrite a negation-normal-form expression to prenex form: all
/// quantifiers in front, bound variables renamed apart
pub fn prenex_nf(e: &Spanned<Expr>) -> Spanned<Expr> {
    let mut counter = 0usize;
    let (binders, matrix) = hoist(e, &mut counter);
    rebuild(binders, matrix)
}

/// Negation normal form followed by prenex hoisting
pub fn normalize(e: &Spanned<Expr>) -> Spanned<Expr> {
    prenex_nf(&negation_nf(e))
}

fn hoist(e: &Spanned<Expr>, counter: &mut usize) -> (Vec<Binder>, Spanned<Expr>) {
    let span = e.span;
    match &e.node {
        Expr::Quantified(op @ (QOp::Forall | QOp::Exists), tv, vars, body) => {
            // Rename this binder group apart before hoisting it
            let mut renaming = FxHashMap::default();
            let mut fresh_vars = Vec::with_capacity(vars.len());
            for (name, ty) in vars {
                let fresh = format!("{}#{}", name, *counter);
                *counter += 1;
                renaming.insert(name.clone(), fresh.clone());
                fresh_vars.push((fresh, ty.clone()));
            }
            let renamed = rename_vars(body, &renaming);
            let (mut inner, matrix) = hoist(&renamed, counter);
            let mut binders = vec![(*op, tv.clone(), fresh_vars)];
            binders.append(&mut inner);
            (binders, matrix)
        }
        Expr::BinaryExpr(op @ (BinOp::And | BinOp::Or), l, r) => {
            let (mut bl, ml) = hoist(l, counter);
            let (mut br, mr) = hoist(r, counter);
            bl.append(&mut br);
            (
                bl,
                sp(Expr::BinaryExpr(*op, Box::new(ml), Box::new(mr)), span),
            )
        }
        _ => (Vec::new(), e.clone()),
    }
}

fn rebuild(binders: Vec<Binder>, matrix: Spanned<Expr>) -> Spanned<Expr> {
    let mut merged: Vec<Binder> = Vec::new();
    for b in binders {
        match merged.last_mut() {
            Some((op, tv, vars)) if *op == b.0 => {
                tv.extend(b.1);
                vars.extend(b.2);
            }
            _ => merged.push(b),
        }
    }
    let mut result = matrix;
    for (op, tv, vars) in merged.into_iter().rev() {
        let span = result.span;
        result = sp(Expr::Quantified(op, tv, vars, Box::new(result)), span);
    }
    result
}

/// Substitute variable names; `renaming` targets are fresh, so capture is
/// impossible and shadowed names are simply dropped from the map
pub fn rename_vars(e: &Spanned<Expr>, renaming: &FxHashMap<Id, Id>) -> Spanned<Expr> {
    if renaming.is_empty() {
        return e.clone();
    }
    let span = e.span;
    let node = match &e.node {
        Expr::Bool(_) | Expr::Int(_) => e.node.clone(),
        Expr::Var(name) => match renaming.get(name) {
            Some(fresh) => Expr::Var(fresh.clone()),
            None => e.node.clone(),
        },
        Expr::Apply(f, args) => Expr::Apply(
            f.clone(),
            args.iter().map(|a| rename_vars(a, renaming)).collect(),
        ),
        Expr::MapSelect(m, args) => Expr::MapSelect(
            Box::new(rename_vars(m, renaming)),
            args.iter().map(|a| rename_vars(a, renaming)).collect(),
        ),
        Expr::MapUpdate(m, args, v) => Expr::MapUpdate(
            Box::new(rename_vars(m, renaming)),
            args.iter().map(|a| rename_vars(a, renaming)).collect(),
            Box::new(rename_vars(v, renaming)),
        ),
        Expr::Old(inner) => Expr::Old(Box::new(rename_vars(inner, renaming))),
        Expr::IfExpr(c, t, f) => Expr::IfExpr(
            Box::new(rename_vars(c, renaming)),
            Box::new(rename_vars(t, renaming)),
            Box::new(rename_vars(f, renaming)),
        ),
        Expr::Coercion(inner, ty) => {
            Expr::Coercion(Box::new(rename_vars(inner, renaming)), ty.clone())
        }
        Expr::UnaryExpr(op, inner) => {
            Expr::UnaryExpr(*op, Box::new(rename_vars(inner, renaming)))
        }
        Expr::BinaryExpr(op, l, r) => Expr::BinaryExpr(
            *op,
            Box::new(rename_vars(l, renaming)),
            Box::new(rename_vars(r, renaming)),
        ),
        Expr::Quantified(op, tv, vars, body) => {
            let mut inner = renaming.clone();
            for (name, _) in vars {
                inner.remove(name);
            }
            Expr::Quantified(
                *op,
                tv.clone(),
                vars.clone(),
                Box::new(rename_vars(body, &inner)),
            )
        }
    };
    sp(node, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(n: &str) -> Spanned<Expr> {
        Expr::var(n)
    }

    fn not(e: Spanned<Expr>) -> Spanned<Expr> {
        Spanned::dummy(Expr::UnaryExpr(UnOp::Not, Box::new(e)))
    }

    fn forall(name: &str, body: Spanned<Expr>) -> Spanned<Expr> {
        Spanned::dummy(Expr::Quantified(
            QOp::Forall,
            vec![],
            vec![(name.to_string(), Type::Int)],
            Box::new(body),
        ))
    }

    fn lt(l: Spanned<Expr>, r: Spanned<Expr>) -> Spanned<Expr> {
        binary(BinOp::Lt, l, r)
    }

    /// No negation above a connective, no implication operators anywhere
    /// in the logical skeleton; negations on atoms are fine
    fn assert_nnf(e: &Expr) {
        match e {
            Expr::UnaryExpr(UnOp::Not, inner) => match &inner.node {
                Expr::BinaryExpr(
                    BinOp::And
                    | BinOp::Or
                    | BinOp::Implies
                    | BinOp::Explies
                    | BinOp::Equiv,
                    ..,
                )
                | Expr::UnaryExpr(UnOp::Not, _) => {
                    panic!("negation above structure: {}", e)
                }
                _ => {}
            },
            Expr::BinaryExpr(BinOp::Implies | BinOp::Explies | BinOp::Equiv, ..) => {
                panic!("implication left in skeleton: {}", e)
            }
            Expr::BinaryExpr(BinOp::And | BinOp::Or, l, r) => {
                assert_nnf(&l.node);
                assert_nnf(&r.node);
            }
            Expr::Quantified(_, _, _, body) => assert_nnf(&body.node),
            _ => {}
        }
    }

    #[test]
    fn de_morgan_stops_on_atoms() {
        let e = not(binary(
            BinOp::And,
            var("a"),
            forall("i", lt(var("i"), Expr::int_lit(5))),
        ));
        let nnf = negation_nf(&e);
        assert_nnf(&nnf.node);
        // the quantifier is an atom; the negation stays on it
        assert_eq!(
            nnf.node.to_string(),
            "!a || !(forall i: int :: i < 5)"
        );
    }

    #[test]
    fn implication_expansion() {
        let e = binary(BinOp::Implies, var("a"), var("b"));
        assert_eq!(negation_nf(&e).node.to_string(), "!a || b");
    }

    #[test]
    fn negated_comparison_is_an_atom() {
        let e = not(lt(var("x"), Expr::int_lit(0)));
        assert_eq!(negation_nf(&e).node.to_string(), "!(x < 0)");
    }

    #[test]
    fn double_negation_cancels() {
        let e = not(not(var("a")));
        assert_eq!(negation_nf(&e).node, Expr::Var("a".to_string()));
    }

    #[test]
    fn prenex_hoists_through_conjunction() {
        // (exists x. x<a) && (exists x. x<b) — both binders rise, renamed apart
        let ex1 = Spanned::dummy(Expr::Quantified(
            QOp::Exists,
            vec![],
            vec![("x".to_string(), Type::Int)],
            Box::new(lt(var("x"), var("a"))),
        ));
        let ex2 = Spanned::dummy(Expr::Quantified(
            QOp::Exists,
            vec![],
            vec![("x".to_string(), Type::Int)],
            Box::new(lt(var("x"), var("b"))),
        ));
        let e = binary(BinOp::And, ex1, ex2);
        let p = normalize(&e);
        let Expr::Quantified(QOp::Exists, _, vars, body) = &p.node else {
            panic!("expected a prenex quantifier: {}", p.node);
        };
        assert_eq!(vars.len(), 2);
        assert_ne!(vars[0].0, vars[1].0);
        assert!(!format!("{}", body.node).contains("exists"));
    }

    #[test]
    fn negated_quantifier_stays_put() {
        // the evaluator resolves !(forall …) recursively; prenexing
        // leaves the negated atom alone
        let e = not(forall("i", lt(var("i"), var("n"))));
        let p = normalize(&e);
        let Expr::UnaryExpr(UnOp::Not, inner) = &p.node else {
            panic!("expected a negated atom: {}", p.node);
        };
        assert!(matches!(inner.node, Expr::Quantified(QOp::Forall, ..)));
    }

    #[test]
    fn renaming_respects_shadowing() {
        let mut renaming = FxHashMap::default();
        renaming.insert("x".to_string(), "y".to_string());
        // x + (forall x :: x < 0): only the free x is renamed
        let inner = forall("x", lt(var("x"), Expr::int_lit(0)));
        let e = binary(BinOp::Plus, var("x"), inner);
        let renamed = rename_vars(&e, &renaming);
        assert_eq!(
            renamed.node.to_string(),
            "y + (forall x: int :: x < 0)"
        );
    }
}
