//! Quantifier evaluation
//!
//! A quantified expression is rewritten to negation-prenex normal form,
//! each bound variable gets a finite domain — booleans directly, user
//! types from the quantification bound, integers by interval inference
//! over the matrix — and the Cartesian product is enumerated with
//! short-circuiting. `forall` evaluates as `¬∃¬`.
//!
//! # Interval inference
//!
//! Starting from `top` for every integer variable, a fix-point pass
//! refines each variable's interval from the matrix: conjunction meets,
//! disjunction joins, `false` is bottom, and a comparison is linearized
//! into coefficient and offset intervals from which interval division
//! bounds the variable. Non-linear shapes leave the variable unconstrained
//! by that subexpression. An interval that stays infinite, or larger than
//! the quantification bound, cannot be enumerated.

use crate::error::{ExecResult, FailureSource, InternalError};
use crate::generator::Generator;
use crate::intervals::{solve_leq_zero, Interval};
use crate::memory::StoreKind;
use crate::value::Value;
use boogie_core::ast::{BinOp, Expr, Id, QOp, Type, UnOp};
use boogie_core::normal_form::normalize;
use boogie_core::{Span, Spanned};
use num_bigint::BigInt;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::eval::Interpreter;

/// Refinement passes before the fix-point is cut off
const MAX_REFINE_PASSES: usize = 64;

type IntervalEnv = FxHashMap<Id, Interval>;

/// Coefficient and offset intervals of `a·x + b`
struct LinearForm {
    coeff: Interval,
    offset: Interval,
}

impl<G: Generator> Interpreter<G> {
    pub(crate) fn eval_quantifier(
        &mut self,
        op: QOp,
        tv: &[Id],
        vars: &[(Id, Type)],
        body: &Spanned<Expr>,
        pos: Span,
    ) -> ExecResult<Value> {
        match op {
            QOp::Lambda => Err(self.fail(
                FailureSource::UnsupportedConstruct("lambda expression".to_string()),
                pos,
            )),
            QOp::Exists => {
                let v = self.eval_exists(tv, vars, body.clone(), pos)?;
                Ok(Value::Bool(v))
            }
            QOp::Forall => {
                let negated = Spanned::new(
                    Expr::UnaryExpr(UnOp::Not, Box::new(body.clone())),
                    body.span,
                );
                let v = self.eval_exists(tv, vars, negated, pos)?;
                Ok(Value::Bool(!v))
            }
        }
    }

    fn eval_exists(
        &mut self,
        tv: &[Id],
        vars: &[(Id, Type)],
        body: Spanned<Expr>,
        pos: Span,
    ) -> ExecResult<bool> {
        if !tv.is_empty() {
            return Err(self.fail(
                FailureSource::UnsupportedConstruct(
                    "quantification over type variables".to_string(),
                ),
                pos,
            ));
        }
        let whole = Spanned::new(
            Expr::Quantified(QOp::Exists, vec![], vars.to_vec(), Box::new(body)),
            pos,
        );
        let prenex = normalize(&whole);
        self.eval_prenex(&prenex, pos)
    }

    /// Evaluate a prenex-normal-form formula group by group
    fn eval_prenex(&mut self, e: &Spanned<Expr>, pos: Span) -> ExecResult<bool> {
        match &e.node {
            Expr::Quantified(op @ (QOp::Forall | QOp::Exists), tv, vars, inner) => {
                if !tv.is_empty() {
                    return Err(self.fail(
                        FailureSource::UnsupportedConstruct(
                            "quantification over type variables".to_string(),
                        ),
                        pos,
                    ));
                }
                self.enumerate_group(*op == QOp::Exists, vars, inner, pos)
            }
            _ => self.eval_bool(e),
        }
    }

    fn enumerate_group(
        &mut self,
        exists: bool,
        vars: &[(Id, Type)],
        inner: &Spanned<Expr>,
        pos: Span,
    ) -> ExecResult<bool> {
        let domains = self.infer_domains(vars, inner, pos)?;
        self.env.tc.push_scope(vars.iter().cloned());
        let result = self.enumerate_from(exists, &domains, 0, inner, pos);
        self.env.tc.pop_scope();
        result
    }

    fn enumerate_from(
        &mut self,
        exists: bool,
        domains: &[(Id, Vec<Value>)],
        depth: usize,
        inner: &Spanned<Expr>,
        pos: Span,
    ) -> ExecResult<bool> {
        let Some((name, values)) = domains.get(depth) else {
            return self.eval_prenex(inner, pos);
        };
        for v in values {
            let shadowed = self.memory.bind_local(name, v.clone());
            let result = self.enumerate_from(exists, domains, depth + 1, inner, pos);
            self.memory.unbind_local(name, shadowed);
            match result {
                Ok(found) if found == exists => return Ok(exists),
                Ok(_) => {}
                Err(f) => return Err(f),
            }
        }
        // empty or exhausted: an existential found nothing, a universal
        // saw nothing fail
        Ok(!exists)
    }

    /// Finite value domains for a binder group
    fn infer_domains(
        &mut self,
        vars: &[(Id, Type)],
        body: &Spanned<Expr>,
        pos: Span,
    ) -> ExecResult<Vec<(Id, Vec<Value>)>> {
        let mut int_vars: Vec<Id> = Vec::new();
        for (name, ty) in vars {
            match self.env.tc.resolve(ty) {
                Type::Int => int_vars.push(name.clone()),
                Type::Bool => {}
                Type::Map(..) => {
                    return Err(self.fail(
                        FailureSource::UnsupportedConstruct(
                            "quantification over maps".to_string(),
                        ),
                        pos,
                    ));
                }
                Type::Ident(tname, _) => {
                    if !self.env.tc.is_type_constructor(&tname) {
                        return Err(self.fail(
                            FailureSource::UnsupportedConstruct(format!(
                                "quantification over unknown type {}",
                                tname
                            )),
                            pos,
                        ));
                    }
                }
            }
        }

        let intervals = self.fix_point(&int_vars, body);

        let mut domains = Vec::with_capacity(vars.len());
        for (name, ty) in vars {
            let values = match self.env.tc.resolve(ty) {
                Type::Bool => vec![Value::Bool(false), Value::Bool(true)],
                Type::Int => {
                    let interval = intervals
                        .get(name)
                        .cloned()
                        .unwrap_or_else(Interval::top);
                    let enumerable = interval
                        .size()
                        .is_some_and(|s| s <= BigInt::from(self.q_bound));
                    if !enumerable {
                        return Err(self.fail(
                            FailureSource::InfiniteDomain {
                                var: name.clone(),
                                interval,
                            },
                            pos,
                        ));
                    }
                    trace!(var = %name, domain = %interval, "inferred quantifier domain");
                    interval.enumerate().into_iter().map(Value::Int).collect()
                }
                Type::Ident(tname, _) => (0..self.q_bound)
                    .map(|tag| Value::custom(tname.clone(), tag))
                    .collect(),
                Type::Map(..) => unreachable!("rejected above"),
            };
            domains.push((name.clone(), values));
        }
        Ok(domains)
    }

    /// Monotone refinement of every integer variable's interval
    fn fix_point(&self, int_vars: &[Id], body: &Spanned<Expr>) -> IntervalEnv {
        let mut env: IntervalEnv = int_vars
            .iter()
            .map(|v| (v.clone(), Interval::top()))
            .collect();
        for _ in 0..MAX_REFINE_PASSES {
            let mut changed = false;
            for var in int_vars {
                let refined = self.refine(body, var, &env);
                let current = env.get(var).expect("seeded above");
                let next = current.meet(&refined);
                if &next != current {
                    env.insert(var.clone(), next);
                    changed = true;
                }
            }
            if env.values().any(Interval::is_bottom) {
                // one empty domain empties them all
                for v in env.values_mut() {
                    *v = Interval::bottom();
                }
                return env;
            }
            if !changed {
                break;
            }
        }
        env
    }

    /// Interval of `var` consistent with `e` possibly holding
    fn refine(&self, e: &Spanned<Expr>, var: &str, env: &IntervalEnv) -> Interval {
        match &e.node {
            Expr::Bool(true) => Interval::top(),
            Expr::Bool(false) => Interval::bottom(),
            Expr::BinaryExpr(BinOp::And, l, r) => {
                self.refine(l, var, env).meet(&self.refine(r, var, env))
            }
            Expr::BinaryExpr(BinOp::Or, l, r) => {
                self.refine(l, var, env).join(&self.refine(r, var, env))
            }
            Expr::BinaryExpr(BinOp::Leq, l, r) => self.refine_leq(l, r, 0, var, env),
            Expr::BinaryExpr(BinOp::Lt, l, r) => self.refine_leq(l, r, 1, var, env),
            Expr::BinaryExpr(BinOp::Geq, l, r) => self.refine_leq(r, l, 0, var, env),
            Expr::BinaryExpr(BinOp::Gt, l, r) => self.refine_leq(r, l, 1, var, env),
            Expr::BinaryExpr(BinOp::Eq, l, r) => self
                .refine_leq(l, r, 0, var, env)
                .meet(&self.refine_leq(r, l, 0, var, env)),
            // an inequation excludes one point: no interval constraint
            Expr::BinaryExpr(BinOp::Neq, ..) => Interval::top(),
            Expr::Quantified(_, _, vars, body) => {
                if vars.iter().any(|(n, _)| n == var) {
                    Interval::top()
                } else {
                    self.refine(body, var, env)
                }
            }
            _ => Interval::top(),
        }
    }

    /// `l + slack ≤ r`, solved for `var`
    fn refine_leq(
        &self,
        l: &Spanned<Expr>,
        r: &Spanned<Expr>,
        slack: i64,
        var: &str,
        env: &IntervalEnv,
    ) -> Interval {
        let linear = (|| -> Result<LinearForm, InternalError> {
            let lf = self.linearize(l, var, env)?;
            let rf = self.linearize(r, var, env)?;
            Ok(LinearForm {
                coeff: lf.coeff.sub(&rf.coeff),
                offset: lf
                    .offset
                    .sub(&rf.offset)
                    .add(&Interval::singleton(slack)),
            })
        })();
        match linear {
            Ok(form) => solve_leq_zero(&form.coeff, &form.offset),
            Err(InternalError::NotLinear) => Interval::top(),
            Err(_) => Interval::top(),
        }
    }

    /// `e` as `a·var + b` with interval-valued `a` and `b`
    fn linearize(
        &self,
        e: &Spanned<Expr>,
        var: &str,
        env: &IntervalEnv,
    ) -> Result<LinearForm, InternalError> {
        match &e.node {
            Expr::Int(n) => Ok(LinearForm {
                coeff: Interval::singleton(0),
                offset: Interval::singleton(n.clone()),
            }),
            Expr::Var(name) if name == var => Ok(LinearForm {
                coeff: Interval::singleton(1),
                offset: Interval::singleton(0),
            }),
            Expr::Var(name) => {
                // sibling binders contribute their current interval;
                // already-materialized program variables their value
                let offset = if let Some(i) = env.get(name) {
                    i.clone()
                } else if let Some(Value::Int(i)) = self.known_int(name) {
                    Interval::singleton(i)
                } else {
                    Interval::top()
                };
                Ok(LinearForm {
                    coeff: Interval::singleton(0),
                    offset,
                })
            }
            Expr::UnaryExpr(UnOp::Neg, inner) => {
                let f = self.linearize(inner, var, env)?;
                Ok(LinearForm {
                    coeff: f.coeff.negated(),
                    offset: f.offset.negated(),
                })
            }
            Expr::BinaryExpr(BinOp::Plus, l, r) => {
                let a = self.linearize(l, var, env)?;
                let b = self.linearize(r, var, env)?;
                Ok(LinearForm {
                    coeff: a.coeff.add(&b.coeff),
                    offset: a.offset.add(&b.offset),
                })
            }
            Expr::BinaryExpr(BinOp::Minus, l, r) => {
                let a = self.linearize(l, var, env)?;
                let b = self.linearize(r, var, env)?;
                Ok(LinearForm {
                    coeff: a.coeff.sub(&b.coeff),
                    offset: a.offset.sub(&b.offset),
                })
            }
            Expr::BinaryExpr(BinOp::Times, l, r) => {
                let a = self.linearize(l, var, env)?;
                let b = self.linearize(r, var, env)?;
                let zero = Interval::singleton(0);
                if a.coeff == zero {
                    Ok(LinearForm {
                        coeff: a.offset.mul(&b.coeff),
                        offset: a.offset.mul(&b.offset),
                    })
                } else if b.coeff == zero {
                    Ok(LinearForm {
                        coeff: a.coeff.mul(&b.offset),
                        offset: a.offset.mul(&b.offset),
                    })
                } else {
                    Err(InternalError::NotLinear)
                }
            }
            Expr::Coercion(inner, _) => self.linearize(inner, var, env),
            _ => Err(InternalError::NotLinear),
        }
    }

    /// The already-materialized integer value of a name, if any; never
    /// triggers lazy initialization
    fn known_int(&self, name: &str) -> Option<Value> {
        self.memory
            .get(StoreKind::Local, name)
            .or_else(|| self.memory.get(StoreKind::Global, name))
            .or_else(|| self.memory.get(StoreKind::Constant, name))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::DeterministicGenerator;
    use crate::preprocess::{preprocess, ProgramEnv};
    use boogie_core::ast::Program;
    use boogie_core::TypeContext;

    fn interp(q_bound: u64) -> Interpreter<DeterministicGenerator> {
        let program = Program::default();
        let env: ProgramEnv = preprocess(&program, TypeContext::new());
        Interpreter::new(env, DeterministicGenerator, q_bound, true)
    }

    fn bin(op: BinOp, l: Spanned<Expr>, r: Spanned<Expr>) -> Spanned<Expr> {
        Spanned::dummy(Expr::BinaryExpr(op, Box::new(l), Box::new(r)))
    }

    fn forall_i(body: Spanned<Expr>) -> Spanned<Expr> {
        Spanned::dummy(Expr::Quantified(
            QOp::Forall,
            vec![],
            vec![("i".to_string(), Type::Int)],
            Box::new(body),
        ))
    }

    fn exists_i(body: Spanned<Expr>) -> Spanned<Expr> {
        Spanned::dummy(Expr::Quantified(
            QOp::Exists,
            vec![],
            vec![("i".to_string(), Type::Int)],
            Box::new(body),
        ))
    }

    /// 0 <= i && i < 3 ==> i + 1 > 0
    fn bounded_body() -> Spanned<Expr> {
        let bounds = bin(
            BinOp::And,
            bin(BinOp::Leq, Expr::int_lit(0), Expr::var("i")),
            bin(BinOp::Lt, Expr::var("i"), Expr::int_lit(3)),
        );
        let concl = bin(
            BinOp::Gt,
            bin(BinOp::Plus, Expr::var("i"), Expr::int_lit(1)),
            Expr::int_lit(0),
        );
        bin(BinOp::Implies, bounds, concl)
    }

    #[test]
    fn bounded_forall_holds() {
        let mut it = interp(16);
        let e = forall_i(bounded_body());
        assert_eq!(it.eval(&e).unwrap(), Value::Bool(true));
    }

    #[test]
    fn zero_bound_is_infinite_domain() {
        let mut it = interp(0);
        let e = forall_i(bounded_body());
        let f = it.eval(&e).unwrap_err();
        assert!(matches!(
            f.source,
            FailureSource::InfiniteDomain { .. }
        ));
    }

    #[test]
    fn unconstrained_variable_is_infinite() {
        let mut it = interp(1000);
        // forall i :: i > 0 — the domain [1, inf) cannot be enumerated
        let e = forall_i(bin(BinOp::Gt, Expr::var("i"), Expr::int_lit(0)));
        let f = it.eval(&e).unwrap_err();
        assert!(matches!(f.source, FailureSource::InfiniteDomain { .. }));
    }

    #[test]
    fn exists_finds_witness() {
        let mut it = interp(64);
        // exists i :: 0 <= i && i < 10 && i * i == 49
        let body = bin(
            BinOp::And,
            bin(
                BinOp::And,
                bin(BinOp::Leq, Expr::int_lit(0), Expr::var("i")),
                bin(BinOp::Lt, Expr::var("i"), Expr::int_lit(10)),
            ),
            bin(
                BinOp::Eq,
                bin(BinOp::Times, Expr::var("i"), Expr::var("i")),
                Expr::int_lit(49),
            ),
        );
        assert_eq!(it.eval(&exists_i(body)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn exists_without_witness() {
        let mut it = interp(64);
        // exists i :: 0 <= i && i < 3 && i == 5
        let body = bin(
            BinOp::And,
            bin(
                BinOp::And,
                bin(BinOp::Leq, Expr::int_lit(0), Expr::var("i")),
                bin(BinOp::Lt, Expr::var("i"), Expr::int_lit(3)),
            ),
            bin(BinOp::Eq, Expr::var("i"), Expr::int_lit(5)),
        );
        assert_eq!(it.eval(&exists_i(body)).unwrap(), Value::Bool(false));
    }

    #[test]
    fn forall_matches_negated_exists() {
        let mut it = interp(32);
        let body = bin(
            BinOp::Implies,
            bin(
                BinOp::And,
                bin(BinOp::Leq, Expr::int_lit(0), Expr::var("i")),
                bin(BinOp::Leq, Expr::var("i"), Expr::int_lit(5)),
            ),
            bin(
                BinOp::Geq,
                bin(BinOp::Times, Expr::int_lit(2), Expr::var("i")),
                Expr::var("i"),
            ),
        );
        let via_forall = it.eval(&forall_i(body.clone())).unwrap();

        let negated = Spanned::dummy(Expr::UnaryExpr(
            UnOp::Not,
            Box::new(exists_i(Spanned::dummy(Expr::UnaryExpr(
                UnOp::Not,
                Box::new(body),
            )))),
        ));
        let via_exists = it.eval(&negated).unwrap();
        assert_eq!(via_forall, via_exists);
    }

    #[test]
    fn quantifying_over_maps_is_unsupported() {
        let mut it = interp(8);
        let e = Spanned::dummy(Expr::Quantified(
            QOp::Exists,
            vec![],
            vec![(
                "m".to_string(),
                Type::Map(vec![], vec![Type::Int], Box::new(Type::Int)),
            )],
            Box::new(Expr::bool_lit(true)),
        ));
        let f = it.eval(&e).unwrap_err();
        assert!(matches!(
            f.source,
            FailureSource::UnsupportedConstruct(_)
        ));
    }

    #[test]
    fn lambda_is_unsupported() {
        let mut it = interp(8);
        let e = Spanned::dummy(Expr::Quantified(
            QOp::Lambda,
            vec![],
            vec![("x".to_string(), Type::Int)],
            Box::new(Expr::var("x")),
        ));
        assert!(it.eval(&e).is_err());
    }

    #[test]
    fn nested_alternation() {
        let mut it = interp(16);
        // forall i :: (0 <= i && i < 3) ==> (exists j :: 0 <= j && j < 3 && i + j == 2)
        let inner = bin(
            BinOp::And,
            bin(
                BinOp::And,
                bin(BinOp::Leq, Expr::int_lit(0), Expr::var("j")),
                bin(BinOp::Lt, Expr::var("j"), Expr::int_lit(3)),
            ),
            bin(
                BinOp::Eq,
                bin(BinOp::Plus, Expr::var("i"), Expr::var("j")),
                Expr::int_lit(2),
            ),
        );
        let exists_j = Spanned::dummy(Expr::Quantified(
            QOp::Exists,
            vec![],
            vec![("j".to_string(), Type::Int)],
            Box::new(inner),
        ));
        let body = bin(
            BinOp::Implies,
            bin(
                BinOp::And,
                bin(BinOp::Leq, Expr::int_lit(0), Expr::var("i")),
                bin(BinOp::Lt, Expr::var("i"), Expr::int_lit(3)),
            ),
            exists_j,
        );
        assert_eq!(it.eval(&forall_i(body)).unwrap(), Value::Bool(true));
    }
}
