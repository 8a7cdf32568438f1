//! Program preprocessing
//!
//! One walk over the checked program produces everything execution needs:
//! the procedure table (contracts plus flattened implementation bodies),
//! map constants backing every function declaration, and the abstract
//! constraint store filled from axioms, function bodies, and where
//! clauses.
//!
//! # Axiom extraction
//!
//! An axiom contributes *definitions* where it has the shape of a guarded
//! equality on a variable, map selection, or function application with
//! simple arguments (each argument is a bound variable or mentions none),
//! and *constraints* everywhere else:
//!
//! - `e1 && e2` extracts from both conjuncts under the same guards
//! - `e1 || e2` extracts from each disjunct under the negation of the
//!   other added to the guards (implications are disjunctions)
//! - `forall` extends the quantifier context; `exists` is ignored
//! - any remaining boolean expression becomes a guarded constraint on
//!   every free variable in it and, when bound variables occur, on every
//!   map selection and function application appearing in it

use crate::constraints::{ConstraintStore, DefArg, Definition, EntityConstraint};
use boogie_core::ast::{
    Contract, Decl, Expr, Id, IdTypeWhere, Program, QOp, SpecKind, Type,
};
use boogie_core::normal_form::negation_nf;
use boogie_core::{flatten, BasicBlocks, Span, Spanned, TypeContext, UnOp};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// One executable body of a procedure
#[derive(Debug, Clone)]
pub struct ProcedureImpl {
    /// Input parameter names, in signature order
    pub ins: Vec<Id>,
    /// Output parameter names
    pub outs: Vec<Id>,
    /// Whether this implementation renames the declared parameters
    pub params_renamed: bool,
    /// Local variable declarations, with where clauses
    pub locals: Vec<IdTypeWhere>,
    /// The flattened body
    pub blocks: BasicBlocks,
    pub pos: Span,
}

/// A procedure: contracts plus its implementations
#[derive(Debug, Clone)]
pub struct ProcedureInfo {
    pub name: Id,
    pub type_args: Vec<Id>,
    /// Declared input parameters, with where clauses
    pub formals: Vec<IdTypeWhere>,
    /// Declared output parameters, with where clauses
    pub rets: Vec<IdTypeWhere>,
    pub requires: Vec<(bool, Spanned<Expr>)>,
    pub ensures: Vec<(bool, Spanned<Expr>)>,
    pub modifies: Vec<Id>,
    pub impls: Vec<ProcedureImpl>,
    pub pos: Span,
}

/// Everything the interpreter derives from a program before execution
#[derive(Debug, Clone)]
pub struct ProgramEnv {
    pub tc: TypeContext,
    pub procedures: FxHashMap<Id, ProcedureInfo>,
    pub store: ConstraintStore,
}

/// Walk `program` and build the execution environment
pub fn preprocess(program: &Program, tc: TypeContext) -> ProgramEnv {
    let mut env = ProgramEnv {
        tc,
        procedures: FxHashMap::default(),
        store: ConstraintStore::new(),
    };

    for decl in &program.decls {
        match &decl.node {
            Decl::TypeDecl { .. } | Decl::ConstDecl(..) => {}
            Decl::FunctionDecl {
                name,
                type_args,
                args,
                ret,
                body,
            } => {
                // Every function is backed by a map constant; a bodyless
                // declaration contributes only that binding
                let arg_types: Vec<Type> = args.iter().map(|(_, t)| t.clone()).collect();
                env.tc.insert_constant(
                    name.clone(),
                    Type::Map(type_args.clone(), arg_types, Box::new(ret.clone())),
                );
                if let Some(body) = body {
                    let mut bound = Vec::new();
                    let mut pattern = Vec::new();
                    for (i, (arg_name, ty)) in args.iter().enumerate() {
                        let formal = arg_name
                            .clone()
                            .unwrap_or_else(|| format!("{}${}", name, i));
                        bound.push((formal.clone(), ty.clone()));
                        pattern.push(DefArg::Bound(formal));
                    }
                    env.store.add_definition(
                        name.clone(),
                        Definition {
                            type_vars: type_args.clone(),
                            bound,
                            args: pattern,
                            guard: None,
                            body: body.clone(),
                            pos: decl.span,
                        },
                    );
                }
            }
            Decl::AxiomDecl(expr) => {
                let mut ex = Extractor {
                    tc: &env.tc,
                    store: &mut env.store,
                    pos: decl.span,
                };
                ex.extract(expr, &[], &[], &[]);
            }
            Decl::VarDecl(vars) => {
                for v in vars {
                    if let Some(w) = &v.where_clause {
                        env.store.add_constraint(
                            v.name.clone(),
                            EntityConstraint {
                                type_vars: vec![],
                                bound: vec![],
                                args: vec![],
                                guard: None,
                                body: w.clone(),
                                kind: SpecKind::Where,
                                pos: w.span,
                            },
                        );
                    }
                }
            }
            Decl::ProcedureDecl {
                name,
                type_args,
                formals,
                rets,
                specs,
                body,
            } => {
                let info = env.procedures.entry(name.clone()).or_insert_with(|| {
                    ProcedureInfo {
                        name: name.clone(),
                        type_args: type_args.clone(),
                        formals: formals.clone(),
                        rets: rets.clone(),
                        requires: vec![],
                        ensures: vec![],
                        modifies: vec![],
                        impls: vec![],
                        pos: decl.span,
                    }
                });
                for spec in specs {
                    match spec {
                        Contract::Requires(free, e) => info.requires.push((*free, e.clone())),
                        Contract::Ensures(free, e) => info.ensures.push((*free, e.clone())),
                        Contract::Modifies(ids) => info.modifies.extend(ids.iter().cloned()),
                    }
                }
                if let Some((locals, block)) = body {
                    info.impls.push(ProcedureImpl {
                        ins: formals.iter().map(|v| v.name.clone()).collect(),
                        outs: rets.iter().map(|v| v.name.clone()).collect(),
                        params_renamed: false,
                        locals: locals.clone(),
                        blocks: flatten(block),
                        pos: decl.span,
                    });
                }
            }
            Decl::ImplementationDecl {
                name,
                formals,
                rets,
                bodies,
                ..
            } => {
                let Some(info) = env.procedures.get_mut(name) else {
                    debug!(%name, "implementation without procedure declaration");
                    continue;
                };
                let decl_ins: Vec<&Id> = info.formals.iter().map(|v| &v.name).collect();
                let decl_outs: Vec<&Id> = info.rets.iter().map(|v| &v.name).collect();
                let ins: Vec<Id> = formals.iter().map(|(n, _)| n.clone()).collect();
                let outs: Vec<Id> = rets.iter().map(|(n, _)| n.clone()).collect();
                let renamed = ins.iter().collect::<Vec<_>>() != decl_ins
                    || outs.iter().collect::<Vec<_>>() != decl_outs;
                for (locals, block) in bodies {
                    info.impls.push(ProcedureImpl {
                        ins: ins.clone(),
                        outs: outs.clone(),
                        params_renamed: renamed,
                        locals: locals.clone(),
                        blocks: flatten(block),
                        pos: decl.span,
                    });
                }
            }
        }
    }

    env
}

struct Extractor<'a> {
    tc: &'a TypeContext,
    store: &'a mut ConstraintStore,
    pos: Span,
}

impl Extractor<'_> {
    fn extract(
        &mut self,
        e: &Spanned<Expr>,
        guards: &[Spanned<Expr>],
        tvars: &[Id],
        bound: &[(Id, Type)],
    ) {
        use boogie_core::ast::BinOp;
        match &e.node {
            Expr::BinaryExpr(BinOp::And, l, r) => {
                self.extract(l, guards, tvars, bound);
                self.extract(r, guards, tvars, bound);
            }
            Expr::BinaryExpr(BinOp::Or, l, r) => {
                self.extract(r, &with_guard(guards, negate(l)), tvars, bound);
                self.extract(l, &with_guard(guards, negate(r)), tvars, bound);
            }
            Expr::BinaryExpr(BinOp::Implies, l, r) => {
                self.extract(r, &with_guard(guards, (**l).clone()), tvars, bound);
                self.extract(&negate(l), &with_guard(guards, negate(r)), tvars, bound);
            }
            Expr::BinaryExpr(BinOp::Explies, l, r) => {
                self.extract(l, &with_guard(guards, (**r).clone()), tvars, bound);
                self.extract(&negate(r), &with_guard(guards, negate(l)), tvars, bound);
            }
            Expr::Quantified(QOp::Forall, tv, vars, body) => {
                let mut tvars = tvars.to_vec();
                tvars.extend(tv.iter().cloned());
                let mut bound = bound.to_vec();
                bound.extend(vars.iter().cloned());
                self.extract(body, guards, &tvars, &bound);
            }
            Expr::Quantified(..) => {}
            Expr::BinaryExpr(BinOp::Eq, lhs, rhs) => {
                if !self.try_definition(lhs, rhs, guards, tvars, bound) {
                    self.constrain(e, guards, tvars, bound);
                }
            }
            _ => self.constrain(e, guards, tvars, bound),
        }
    }

    /// Attempt to read `lhs == rhs` as a definition of the entity named
    /// by `lhs`. Returns false when the shape does not qualify.
    fn try_definition(
        &mut self,
        lhs: &Spanned<Expr>,
        rhs: &Spanned<Expr>,
        guards: &[Spanned<Expr>],
        tvars: &[Id],
        bound: &[(Id, Type)],
    ) -> bool {
        let bound_names: FxHashSet<&Id> = bound.iter().map(|(n, _)| n).collect();

        let (target, raw_args) = match &lhs.node {
            Expr::Var(x) if !bound_names.contains(x) => (x.clone(), Vec::new()),
            Expr::MapSelect(base, args) => match &base.node {
                Expr::Var(m) if !bound_names.contains(m) => (m.clone(), args.clone()),
                _ => return false,
            },
            Expr::Apply(f, args) => (f.clone(), args.clone()),
            _ => return false,
        };

        // Each argument must be simple: a bound variable, or an
        // expression mentioning no bound variables
        let mut pattern = Vec::with_capacity(raw_args.len());
        let mut used: Vec<(Id, Type)> = Vec::new();
        for arg in &raw_args {
            match &arg.node {
                Expr::Var(x) if bound_names.contains(x) => {
                    if used.iter().any(|(n, _)| n == x) {
                        // repeated binder positions are not formalizable
                        return false;
                    }
                    let ty = bound
                        .iter()
                        .find(|(n, _)| n == x)
                        .map(|(_, t)| t.clone())
                        .expect("binder has a declared type");
                    used.push((x.clone(), ty));
                    pattern.push(DefArg::Bound(x.clone()));
                }
                _ => {
                    if mentions_any(arg, &bound_names) {
                        return false;
                    }
                    pattern.push(DefArg::Fixed(arg.clone()));
                }
            }
        }

        // The right-hand side and the guards may only use binders the
        // arguments capture
        let captured: FxHashSet<&Id> = used.iter().map(|(n, _)| n).collect();
        let stray: FxHashSet<&Id> = bound_names.difference(&captured).copied().collect();
        if mentions_any(rhs, &stray) {
            return false;
        }
        for g in guards {
            if mentions_any(g, &stray) {
                return false;
            }
        }

        debug!(entity = %target, args = pattern.len(), "axiom definition");
        self.store.add_definition(
            target,
            Definition {
                type_vars: tvars.to_vec(),
                bound: used,
                args: pattern,
                guard: conjoin(guards),
                body: rhs.clone(),
                pos: self.pos,
            },
        );
        true
    }

    /// Record `e` as a constraint on every entity it mentions
    fn constrain(
        &mut self,
        e: &Spanned<Expr>,
        guards: &[Spanned<Expr>],
        tvars: &[Id],
        bound: &[(Id, Type)],
    ) {
        let bound_names: FxHashSet<&Id> = bound.iter().map(|(n, _)| n).collect();

        // Free top-level names (constants and globals)
        let mut names = Vec::new();
        free_entity_names(e, &bound_names, self.tc, &mut names);
        for name in &names {
            self.store.add_constraint(
                name.clone(),
                EntityConstraint {
                    type_vars: tvars.to_vec(),
                    bound: bound.to_vec(),
                    args: vec![],
                    guard: conjoin(guards),
                    body: e.clone(),
                    kind: SpecKind::Axiom,
                    pos: self.pos,
                },
            );
        }

        if bound.is_empty() {
            return;
        }

        // With quantified variables present, also constrain every map
        // selection and function application so lazy indexing sees it
        let mut apps = Vec::new();
        selections_and_applications(e, &bound_names, &mut apps);
        for (name, raw_args) in apps {
            let mut pattern = Vec::with_capacity(raw_args.len());
            for arg in &raw_args {
                match &arg.node {
                    Expr::Var(x) if bound_names.contains(x) => {
                        pattern.push(DefArg::Bound(x.clone()))
                    }
                    _ => pattern.push(DefArg::Fixed(arg.clone())),
                }
            }
            self.store.add_constraint(
                name,
                EntityConstraint {
                    type_vars: tvars.to_vec(),
                    bound: bound.to_vec(),
                    args: pattern,
                    guard: conjoin(guards),
                    body: e.clone(),
                    kind: SpecKind::Axiom,
                    pos: self.pos,
                },
            );
        }
    }
}

fn negate(e: &Spanned<Expr>) -> Spanned<Expr> {
    let not = Spanned::new(
        Expr::UnaryExpr(UnOp::Not, Box::new(e.clone())),
        e.span,
    );
    negation_nf(&not)
}

fn with_guard(guards: &[Spanned<Expr>], g: Spanned<Expr>) -> Vec<Spanned<Expr>> {
    let mut out = guards.to_vec();
    out.push(g);
    out
}

/// Conjunction of the guards, `None` when empty
fn conjoin(guards: &[Spanned<Expr>]) -> Option<Spanned<Expr>> {
    let mut iter = guards.iter().cloned();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, g| {
        let span = acc.span;
        Spanned::new(
            Expr::BinaryExpr(boogie_core::ast::BinOp::And, Box::new(acc), Box::new(g)),
            span,
        )
    }))
}

/// Does `e` mention any of `names` as a variable?
fn mentions_any(e: &Spanned<Expr>, names: &FxHashSet<&Id>) -> bool {
    if names.is_empty() {
        return false;
    }
    match &e.node {
        Expr::Bool(_) | Expr::Int(_) => false,
        Expr::Var(x) => names.contains(x),
        Expr::Apply(_, args) | Expr::MapSelect(_, args) => {
            args.iter().any(|a| mentions_any(a, names))
                || matches!(&e.node, Expr::MapSelect(base, _) if mentions_any(base, names))
        }
        Expr::MapUpdate(m, args, v) => {
            mentions_any(m, names)
                || args.iter().any(|a| mentions_any(a, names))
                || mentions_any(v, names)
        }
        Expr::Old(inner) | Expr::Coercion(inner, _) | Expr::UnaryExpr(_, inner) => {
            mentions_any(inner, names)
        }
        Expr::IfExpr(c, t, f) => {
            mentions_any(c, names) || mentions_any(t, names) || mentions_any(f, names)
        }
        Expr::BinaryExpr(_, l, r) => mentions_any(l, names) || mentions_any(r, names),
        Expr::Quantified(_, _, vars, body) => {
            let mut inner: FxHashSet<&Id> = names.clone();
            for (n, _) in vars {
                inner.remove(n);
            }
            mentions_any(body, &inner)
        }
    }
}

/// Collect free constant/global names of `e`
fn free_entity_names(
    e: &Spanned<Expr>,
    bound: &FxHashSet<&Id>,
    tc: &TypeContext,
    out: &mut Vec<Id>,
) {
    match &e.node {
        Expr::Bool(_) | Expr::Int(_) => {}
        Expr::Var(x) => {
            if !bound.contains(x)
                && (tc.is_constant(x) || tc.is_global(x))
                && !out.contains(x)
            {
                out.push(x.clone());
            }
        }
        Expr::Apply(_, args) => {
            for a in args {
                free_entity_names(a, bound, tc, out);
            }
        }
        Expr::MapSelect(base, args) => {
            free_entity_names(base, bound, tc, out);
            for a in args {
                free_entity_names(a, bound, tc, out);
            }
        }
        Expr::MapUpdate(m, args, v) => {
            free_entity_names(m, bound, tc, out);
            for a in args {
                free_entity_names(a, bound, tc, out);
            }
            free_entity_names(v, bound, tc, out);
        }
        Expr::Old(inner) | Expr::Coercion(inner, _) | Expr::UnaryExpr(_, inner) => {
            free_entity_names(inner, bound, tc, out)
        }
        Expr::IfExpr(c, t, f) => {
            free_entity_names(c, bound, tc, out);
            free_entity_names(t, bound, tc, out);
            free_entity_names(f, bound, tc, out);
        }
        Expr::BinaryExpr(_, l, r) => {
            free_entity_names(l, bound, tc, out);
            free_entity_names(r, bound, tc, out);
        }
        Expr::Quantified(_, _, vars, body) => {
            let mut inner = bound.clone();
            for (n, _) in vars {
                inner.insert(n);
            }
            free_entity_names(body, &inner, tc, out);
        }
    }
}

/// Collect `(entity, args)` of map selections on named maps and function
/// applications occurring in `e`
fn selections_and_applications(
    e: &Spanned<Expr>,
    bound: &FxHashSet<&Id>,
    out: &mut Vec<(Id, Vec<Spanned<Expr>>)>,
) {
    match &e.node {
        Expr::Bool(_) | Expr::Int(_) | Expr::Var(_) => {}
        Expr::Apply(f, args) => {
            if !out.iter().any(|(n, _)| n == f) {
                out.push((f.clone(), args.clone()));
            }
            for a in args {
                selections_and_applications(a, bound, out);
            }
        }
        Expr::MapSelect(base, args) => {
            if let Expr::Var(m) = &base.node {
                if !bound.contains(m) && !out.iter().any(|(n, _)| n == m) {
                    out.push((m.clone(), args.clone()));
                }
            }
            selections_and_applications(base, bound, out);
            for a in args {
                selections_and_applications(a, bound, out);
            }
        }
        Expr::MapUpdate(m, args, v) => {
            selections_and_applications(m, bound, out);
            for a in args {
                selections_and_applications(a, bound, out);
            }
            selections_and_applications(v, bound, out);
        }
        Expr::Old(inner) | Expr::Coercion(inner, _) | Expr::UnaryExpr(_, inner) => {
            selections_and_applications(inner, bound, out)
        }
        Expr::IfExpr(c, t, f) => {
            selections_and_applications(c, bound, out);
            selections_and_applications(t, bound, out);
            selections_and_applications(f, bound, out);
        }
        Expr::BinaryExpr(_, l, r) => {
            selections_and_applications(l, bound, out);
            selections_and_applications(r, bound, out);
        }
        Expr::Quantified(_, _, vars, body) => {
            let mut inner = bound.clone();
            for (n, _) in vars {
                inner.insert(n);
            }
            selections_and_applications(body, &inner, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boogie_core::ast::BinOp;

    fn bin(op: BinOp, l: Spanned<Expr>, r: Spanned<Expr>) -> Spanned<Expr> {
        Spanned::dummy(Expr::BinaryExpr(op, Box::new(l), Box::new(r)))
    }

    fn program(decls: Vec<Decl>) -> Program {
        Program::new(decls.into_iter().map(Spanned::dummy).collect())
    }

    #[test]
    fn constant_axiom_becomes_definition() {
        // const K: int; axiom K == 42;
        let p = program(vec![
            Decl::ConstDecl(vec!["K".to_string()], Type::Int),
            Decl::AxiomDecl(bin(BinOp::Eq, Expr::var("K"), Expr::int_lit(42))),
        ]);
        let tc = TypeContext::for_program(&p);
        let env = preprocess(&p, tc);
        let set = env.store.name_set("K").unwrap();
        assert_eq!(set.definitions.len(), 1);
        assert!(set.definitions[0].args.is_empty());
        assert!(set.definitions[0].guard.is_none());
    }

    #[test]
    fn guarded_function_axiom() {
        // function f(x: int): int; axiom forall x :: x > 0 ==> f(x) == x + 1
        let guard = bin(BinOp::Gt, Expr::var("x"), Expr::int_lit(0));
        let eq = bin(
            BinOp::Eq,
            Spanned::dummy(Expr::Apply("f".to_string(), vec![Expr::var("x")])),
            bin(BinOp::Plus, Expr::var("x"), Expr::int_lit(1)),
        );
        let axiom = Spanned::dummy(Expr::Quantified(
            QOp::Forall,
            vec![],
            vec![("x".to_string(), Type::Int)],
            Box::new(bin(BinOp::Implies, guard, eq)),
        ));
        let p = program(vec![
            Decl::FunctionDecl {
                name: "f".to_string(),
                type_args: vec![],
                args: vec![(Some("x".to_string()), Type::Int)],
                ret: Type::Int,
                body: None,
            },
            Decl::AxiomDecl(axiom),
        ]);
        let tc = TypeContext::for_program(&p);
        let env = preprocess(&p, tc);

        let set = env.store.name_set("f").unwrap();
        assert_eq!(set.definitions.len(), 1);
        let def = &set.definitions[0];
        assert_eq!(def.args, vec![DefArg::Bound("x".to_string())]);
        assert!(def.guard.is_some());
        // the negated-guard disjunct also lands somewhere as a constraint,
        // but no second definition is fabricated
    }

    #[test]
    fn non_equality_axiom_becomes_constraint() {
        // const K: int; axiom K > 10;
        let p = program(vec![
            Decl::ConstDecl(vec!["K".to_string()], Type::Int),
            Decl::AxiomDecl(bin(BinOp::Gt, Expr::var("K"), Expr::int_lit(10))),
        ]);
        let tc = TypeContext::for_program(&p);
        let env = preprocess(&p, tc);
        let set = env.store.name_set("K").unwrap();
        assert!(set.definitions.is_empty());
        assert_eq!(set.constraints.len(), 1);
        assert_eq!(set.constraints[0].kind, SpecKind::Axiom);
    }

    #[test]
    fn quantified_map_axiom_constrains_the_map() {
        // var g: [int]int; axiom forall i :: g[i] >= 0
        let sel = Spanned::dummy(Expr::MapSelect(
            Box::new(Expr::var("g")),
            vec![Expr::var("i")],
        ));
        let body = bin(BinOp::Geq, sel, Expr::int_lit(0));
        let axiom = Spanned::dummy(Expr::Quantified(
            QOp::Forall,
            vec![],
            vec![("i".to_string(), Type::Int)],
            Box::new(body),
        ));
        let p = program(vec![
            Decl::VarDecl(vec![IdTypeWhere::plain(
                "g",
                Type::Map(vec![], vec![Type::Int], Box::new(Type::Int)),
            )]),
            Decl::AxiomDecl(axiom),
        ]);
        let tc = TypeContext::for_program(&p);
        let env = preprocess(&p, tc);

        let set = env.store.name_set("g").unwrap();
        // once as a free variable of the axiom, once as a selection target
        assert_eq!(set.constraints.len(), 2);
        assert!(set
            .constraints
            .iter()
            .any(|c| c.args == vec![DefArg::Bound("i".to_string())]));
    }

    #[test]
    fn where_clause_attaches_to_global() {
        let p = program(vec![Decl::VarDecl(vec![IdTypeWhere {
            name: "g".to_string(),
            ty: Type::Int,
            where_clause: Some(bin(BinOp::Geq, Expr::var("g"), Expr::int_lit(0))),
        }])]);
        let tc = TypeContext::for_program(&p);
        let env = preprocess(&p, tc);
        let set = env.store.name_set("g").unwrap();
        assert_eq!(set.constraints.len(), 1);
        assert_eq!(set.constraints[0].kind, SpecKind::Where);
    }

    #[test]
    fn function_body_is_a_definition() {
        let p = program(vec![Decl::FunctionDecl {
            name: "inc".to_string(),
            type_args: vec![],
            args: vec![(Some("x".to_string()), Type::Int)],
            ret: Type::Int,
            body: Some(bin(BinOp::Plus, Expr::var("x"), Expr::int_lit(1))),
        }]);
        let tc = TypeContext::for_program(&p);
        let env = preprocess(&p, tc);
        assert_eq!(env.store.name_set("inc").unwrap().definitions.len(), 1);
        // the backing constant is registered with a map type
        assert!(env.tc.is_constant("inc"));
    }

    #[test]
    fn procedure_bodies_are_flattened() {
        use boogie_core::ast::{LabeledStatement, Statement};
        let body = vec![LabeledStatement::bare(Spanned::dummy(Statement::Return))];
        let p = program(vec![Decl::ProcedureDecl {
            name: "P".to_string(),
            type_args: vec![],
            formals: vec![],
            rets: vec![],
            specs: vec![],
            body: Some((vec![], body)),
        }]);
        let tc = TypeContext::for_program(&p);
        let env = preprocess(&p, tc);
        let info = env.procedures.get("P").unwrap();
        assert_eq!(info.impls.len(), 1);
        assert!(info.impls[0].blocks.get("start").is_some());
        assert!(!info.impls[0].params_renamed);
    }
}
