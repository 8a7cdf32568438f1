//! Expression evaluation
//!
//! The evaluator is lazy: a variable or map entry has no value until it is
//! first read, at which point definitions from the constraint store are
//! consulted and, failing those, the generator supplies a value that is
//! then constrained by where clauses and axiom-derived facts. Arithmetic
//! is Euclidean (`mod` never negative), logical connectives short-circuit
//! and remember the last sub-expression they touched, and equality on map
//! references resolves through the non-deterministic protocol of
//! [`Interpreter::map_equality`].

use crate::constraints::{DefArg, Definition, EntityConstraint};
use crate::error::{ExecResult, FailureSource, InternalError, RuntimeFailure};
use crate::generator::Generator;
use crate::memory::{Memory, StoreKind};
use crate::preprocess::ProgramEnv;
use crate::value::{MapRepr, Ref, Value};
use boogie_core::ast::{BinOp, Expr, Id, QOp, SpecKind, Type, UnOp};
use boogie_core::ctx::unify;
use boogie_core::{Span, Spanned};
use boogie_smt::{SatBackend, SolverBridge};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, Zero};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

/// Euclidean quotient and remainder: `q·b + r = a` and `0 ≤ r < |b|`
pub fn euclidean_div_mod(a: &BigInt, b: &BigInt) -> (BigInt, BigInt) {
    let (mut q, mut r) = a.div_rem(b);
    if r.is_negative() {
        if b.is_positive() {
            q -= 1;
            r += b;
        } else {
            q += 1;
            r -= b;
        }
    }
    (q, r)
}

/// The static type of a runtime value, as far as values carry one
fn value_type(v: &Value) -> Option<Type> {
    match v {
        Value::Int(_) => Some(Type::Int),
        Value::Bool(_) => Some(Type::Bool),
        Value::Custom(c) => Some(Type::Ident(c.type_name.clone(), vec![])),
        Value::Reference(_) => None,
    }
}

/// One execution branch: program environment, generator, memory, and the
/// bookkeeping the evaluator threads through a run
pub struct Interpreter<G> {
    pub env: ProgramEnv,
    pub gen: G,
    pub memory: Memory,
    /// Enumeration cap per quantified variable, and the domain size of
    /// user types under quantification
    pub q_bound: u64,
    /// Deterministic engines retry remaining goto targets on assumption
    /// violations; exploring engines surface the violation instead
    pub retry_unreachable: bool,
    /// Inside `old(…)` globals read their entry values
    pub(crate) in_old: bool,
    /// Last sub-expression a short-circuit connective evaluated
    pub(crate) last_term: Option<Spanned<Expr>>,
    /// Fresh codes for under-construction sentinels
    next_code: u64,
    /// Per-call-frame where clauses of locals, consulted at first
    /// materialization
    pub(crate) local_wheres: Vec<FxHashMap<Id, Spanned<Expr>>>,
    /// Every assumed clause of the current branch
    pub(crate) path_constraints: Vec<Spanned<Expr>>,
    /// Optional satisfiability pruning of assumed constraint sets
    pub(crate) solver: Option<SolverBridge<Box<dyn SatBackend>>>,
}

impl<G: Generator> Interpreter<G> {
    pub fn new(env: ProgramEnv, gen: G, q_bound: u64, retry_unreachable: bool) -> Self {
        Interpreter {
            env,
            gen,
            memory: Memory::new(),
            q_bound,
            retry_unreachable,
            in_old: false,
            last_term: None,
            next_code: 0,
            local_wheres: vec![FxHashMap::default()],
            path_constraints: Vec::new(),
            solver: None,
        }
    }

    /// Attach a solver bridge; assumed constraint sets are then checked
    /// for satisfiability and unsatisfiable branches fail early
    pub fn with_solver(mut self, solver: SolverBridge<Box<dyn SatBackend>>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub(crate) fn fail(&self, source: FailureSource, pos: Span) -> Box<RuntimeFailure> {
        Box::new(RuntimeFailure::new(source, pos, self.memory.clone()))
    }

    fn unsupported<T>(&self, what: impl Into<String>, pos: Span) -> ExecResult<T> {
        Err(self.fail(FailureSource::UnsupportedConstruct(what.into()), pos))
    }

    fn fresh_code(&mut self) -> u64 {
        let code = self.next_code;
        self.next_code += 1;
        code
    }

    /// Reject under-construction sentinels on read
    fn well_defined(&self, v: &Value, pos: Span) -> ExecResult<()> {
        match v.construction_code() {
            Some(code) => Err(self.fail(
                FailureSource::Internal(InternalError::UnderConstruction(code)),
                pos,
            )),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Expression dispatch
    // ------------------------------------------------------------------

    pub fn eval(&mut self, e: &Spanned<Expr>) -> ExecResult<Value> {
        match &e.node {
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(i.clone())),
            Expr::Var(name) => self.lazy_var(name, e.span),
            Expr::Apply(f, args) => self.eval_application(e, f, args),
            Expr::MapSelect(map, args) => self.eval_map_select(e, map, args),
            Expr::MapUpdate(map, args, v) => self.eval_map_update(map, args, v, e.span),
            Expr::Old(inner) => self.eval_old(inner),
            Expr::IfExpr(c, t, f) => {
                if self.eval_bool(c)? {
                    self.eval(t)
                } else {
                    self.eval(f)
                }
            }
            Expr::Coercion(inner, _) => self.eval(inner),
            Expr::UnaryExpr(op, inner) => self.eval_unary(*op, inner, e.span),
            Expr::BinaryExpr(op, l, r) => self.eval_binary(*op, l, r, e.span),
            Expr::Quantified(op, tv, vars, body) => {
                self.eval_quantifier(*op, tv, vars, body, e.span)
            }
        }
    }

    pub fn eval_bool(&mut self, e: &Spanned<Expr>) -> ExecResult<bool> {
        match self.eval(e)? {
            Value::Bool(b) => Ok(b),
            other => self.unsupported(
                format!("boolean expected, found {}", other.kind_name()),
                e.span,
            ),
        }
    }

    pub fn eval_int(&mut self, e: &Spanned<Expr>) -> ExecResult<BigInt> {
        match self.eval(e)? {
            Value::Int(i) => Ok(i),
            other => self.unsupported(
                format!("integer expected, found {}", other.kind_name()),
                e.span,
            ),
        }
    }

    fn eval_unary(&mut self, op: UnOp, inner: &Spanned<Expr>, _pos: Span) -> ExecResult<Value> {
        match op {
            UnOp::Neg => Ok(Value::Int(-self.eval_int(inner)?)),
            UnOp::Not => Ok(Value::Bool(!self.eval_bool(inner)?)),
        }
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        l: &Spanned<Expr>,
        r: &Spanned<Expr>,
        pos: Span,
    ) -> ExecResult<Value> {
        match op {
            BinOp::Plus => Ok(Value::Int(self.eval_int(l)? + self.eval_int(r)?)),
            BinOp::Minus => Ok(Value::Int(self.eval_int(l)? - self.eval_int(r)?)),
            BinOp::Times => Ok(Value::Int(self.eval_int(l)? * self.eval_int(r)?)),
            BinOp::Div | BinOp::Mod => {
                let a = self.eval_int(l)?;
                let b = self.eval_int(r)?;
                if b.is_zero() {
                    return Err(self.fail(FailureSource::DivisionByZero, pos));
                }
                let (q, m) = euclidean_div_mod(&a, &b);
                Ok(Value::Int(if op == BinOp::Div { q } else { m }))
            }

            // Short-circuit connectives track the deciding term
            BinOp::And => {
                if !self.eval_bool(l)? {
                    self.last_term = Some(l.clone());
                    Ok(Value::Bool(false))
                } else {
                    let rv = self.eval_bool(r)?;
                    self.last_term = Some(r.clone());
                    Ok(Value::Bool(rv))
                }
            }
            BinOp::Or => {
                if self.eval_bool(l)? {
                    self.last_term = Some(l.clone());
                    Ok(Value::Bool(true))
                } else {
                    let rv = self.eval_bool(r)?;
                    self.last_term = Some(r.clone());
                    Ok(Value::Bool(rv))
                }
            }
            BinOp::Implies => {
                if !self.eval_bool(l)? {
                    self.last_term = Some(l.clone());
                    Ok(Value::Bool(true))
                } else {
                    let rv = self.eval_bool(r)?;
                    self.last_term = Some(r.clone());
                    Ok(Value::Bool(rv))
                }
            }
            BinOp::Explies => {
                if self.eval_bool(l)? {
                    self.last_term = Some(l.clone());
                    Ok(Value::Bool(true))
                } else {
                    let rv = self.eval_bool(r)?;
                    self.last_term = Some(r.clone());
                    Ok(Value::Bool(!rv))
                }
            }
            BinOp::Equiv => {
                let lv = self.eval_bool(l)?;
                let rv = self.eval_bool(r)?;
                Ok(Value::Bool(lv == rv))
            }

            BinOp::Eq | BinOp::Neq => {
                let lv = self.eval(l)?;
                let rv = self.eval(r)?;
                let equal = self.values_equal(&lv, &rv, pos)?;
                Ok(Value::Bool(if op == BinOp::Eq { equal } else { !equal }))
            }
            BinOp::Lt => self.compare(l, r, |o| o == std::cmp::Ordering::Less),
            BinOp::Leq => self.compare(l, r, |o| o != std::cmp::Ordering::Greater),
            BinOp::Gt => self.compare(l, r, |o| o == std::cmp::Ordering::Greater),
            BinOp::Geq => self.compare(l, r, |o| o != std::cmp::Ordering::Less),
            BinOp::Lc => self.unsupported("partial order", pos),
        }
    }

    fn compare(
        &mut self,
        l: &Spanned<Expr>,
        r: &Spanned<Expr>,
        accept: impl FnOnce(std::cmp::Ordering) -> bool,
    ) -> ExecResult<Value> {
        let a = self.eval_int(l)?;
        let b = self.eval_int(r)?;
        Ok(Value::Bool(accept(a.cmp(&b))))
    }

    /// Equality dispatch: map references resolve through the heap
    pub(crate) fn values_equal(&mut self, l: &Value, r: &Value, pos: Span) -> ExecResult<bool> {
        match (l, r) {
            (Value::Reference(a), Value::Reference(b)) => self.map_equality(*a, *b, pos),
            _ => Ok(l == r),
        }
    }

    fn eval_old(&mut self, inner: &Spanned<Expr>) -> ExecResult<Value> {
        if self.in_old {
            // nested old does not re-save
            return self.eval(inner);
        }
        self.in_old = true;
        let result = self.eval(inner);
        self.in_old = false;
        result
    }

    // ------------------------------------------------------------------
    // Lazy variable access
    // ------------------------------------------------------------------

    /// Which store backs `name` right now
    fn name_store(&self, name: &str) -> StoreKind {
        if self.env.tc.is_local(name) || self.memory.locals.contains_key(name) {
            StoreKind::Local
        } else if self.env.tc.is_global(name) {
            if self.in_old {
                StoreKind::OldGlobal
            } else {
                StoreKind::Global
            }
        } else {
            StoreKind::Constant
        }
    }

    pub(crate) fn lazy_var(&mut self, name: &str, pos: Span) -> ExecResult<Value> {
        let kind = self.name_store(name);
        if let Some(v) = self.memory.get(kind, name) {
            let v = v.clone();
            self.well_defined(&v, pos)?;
            return Ok(v);
        }
        if kind == StoreKind::OldGlobal {
            return self.materialize_old_global(name, pos);
        }
        self.materialize(kind, name, pos)
    }

    /// First read of a name: consult definitions, then generate
    fn materialize(&mut self, kind: StoreKind, name: &str, pos: Span) -> ExecResult<Value> {
        let defs: Vec<Definition> = self
            .env
            .store
            .name_set(name)
            .map(|s| {
                s.definitions
                    .iter()
                    .filter(|d| d.args.is_empty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if !defs.is_empty() {
            let code = self.fresh_code();
            self.memory.set(kind, name.to_string(), Value::under_construction(code));
            for def in defs {
                match self.apply_definition(&def, &[]) {
                    Ok(Some(v)) => {
                        trace!(%name, "materialized from definition");
                        self.memory.set(kind, name.to_string(), v.clone());
                        self.finish_materialization(kind, name, &v, pos)?;
                        return Ok(v);
                    }
                    Ok(None) => {}
                    Err(f) if f.under_construction().is_some() => {
                        // cycle through this definition: not applicable
                        trace!(%name, "definition cycles, skipped");
                    }
                    Err(f) => {
                        self.memory.unset(kind, name);
                        return Err(f);
                    }
                }
            }
            self.memory.unset(kind, name);
        }

        // No definition produced a value: draw one
        let Some(ty) = self.env.tc.var_type(name) else {
            return self.unsupported(format!("undeclared name {}", name), pos);
        };
        let v = self.generate_value(&ty)?;
        trace!(%name, value = %v, "materialized from generator");
        self.memory.set(kind, name.to_string(), v.clone());
        self.finish_materialization(kind, name, &v, pos)?;
        Ok(v)
    }

    /// After a value lands in a store: mirror globals into the old store,
    /// attach deferred map facts, and apply constraints and where clauses
    fn finish_materialization(
        &mut self,
        kind: StoreKind,
        name: &str,
        v: &Value,
        pos: Span,
    ) -> ExecResult<()> {
        if kind == StoreKind::Global && !self.in_old && !self.memory.is_modified(name) {
            self.memory.mirror_old(name);
        }
        if let Value::Reference(r) = v {
            if let Some(set) = self.env.store.name_set(name) {
                let deferred = set.deferred();
                self.env.store.attach_ref(*r, deferred);
            }
        }
        self.apply_simple_constraints(name, pos)?;
        if kind == StoreKind::Local {
            let where_clause = self
                .local_wheres
                .last()
                .and_then(|frame| frame.get(name))
                .cloned();
            if let Some(w) = where_clause {
                self.assume_clause(&w, SpecKind::Where, w.span)?;
            }
        }
        Ok(())
    }

    /// `old(g)` when the old store has no entry yet
    fn materialize_old_global(&mut self, name: &str, pos: Span) -> ExecResult<Value> {
        if !self.memory.is_modified(name) {
            // untouched global: its current (possibly lazily generated)
            // value is its entry value
            self.in_old = false;
            let result = self.lazy_var(name, pos);
            self.in_old = true;
            result?;
            self.memory.mirror_old(name);
            let v = self
                .memory
                .get(StoreKind::OldGlobal, name)
                .cloned()
                .expect("mirrored old value");
            return Ok(v);
        }
        // The global was overwritten before it was ever read: its entry
        // value was never observed and is free
        let Some(ty) = self.env.tc.var_type(name) else {
            return self.unsupported(format!("undeclared name {}", name), pos);
        };
        let v = self.generate_value(&ty)?;
        self.memory.set(StoreKind::OldGlobal, name.to_string(), v.clone());
        if let Value::Reference(r) = &v {
            if let Some(set) = self.env.store.name_set(name) {
                let deferred = set.deferred();
                self.env.store.attach_ref(*r, deferred);
            }
        }
        self.apply_simple_constraints(name, pos)?;
        Ok(v)
    }

    /// Draw a value of the given type
    pub(crate) fn generate_value(&mut self, ty: &Type) -> ExecResult<Value> {
        match self.env.tc.resolve(ty) {
            Type::Bool => Ok(Value::Bool(self.gen.gen_bool())),
            Type::Int => Ok(Value::Int(self.gen.gen_int())),
            Type::Map(..) => {
                let r = self.memory.heap.alloc(MapRepr::empty_source());
                Ok(Value::Reference(r))
            }
            Type::Ident(name, _) => Ok(Value::Custom(crate::value::CustomValue {
                type_name: name,
                tag: self.gen.gen_int(),
            })),
        }
    }

    // ------------------------------------------------------------------
    // Definitions and constraints
    // ------------------------------------------------------------------

    /// Try one definition against actual arguments. `Ok(None)` means not
    /// applicable; internal cycle signals raised below are the caller's
    /// to interpret.
    fn apply_definition(
        &mut self,
        def: &Definition,
        actuals: &[Value],
    ) -> ExecResult<Option<Value>> {
        if def.args.len() != actuals.len() {
            return Ok(None);
        }
        if !self.type_vars_match(&def.type_vars, &def.bound, &def.args, actuals) {
            return Ok(None);
        }

        self.env.tc.push_scope(def.bound.iter().cloned());
        let mut undo: Vec<(Id, Option<Value>)> = Vec::new();
        let result = self.apply_definition_bound(def, actuals, &mut undo);
        for (name, shadowed) in undo.into_iter().rev() {
            self.memory.unbind_local(&name, shadowed);
        }
        self.env.tc.pop_scope();
        result
    }

    fn apply_definition_bound(
        &mut self,
        def: &Definition,
        actuals: &[Value],
        undo: &mut Vec<(Id, Option<Value>)>,
    ) -> ExecResult<Option<Value>> {
        for (pattern, actual) in def.args.iter().zip(actuals) {
            match pattern {
                DefArg::Bound(x) => {
                    let shadowed = self.memory.bind_local(x, actual.clone());
                    undo.push((x.clone(), shadowed));
                }
                DefArg::Fixed(e) => {
                    let fixed = self.eval(e)?;
                    if &fixed != actual {
                        return Ok(None);
                    }
                }
            }
        }
        if let Some(guard) = &def.guard {
            if !self.eval_bool(guard)? {
                return Ok(None);
            }
        }
        let v = self.eval(&def.body)?;
        Ok(Some(v))
    }

    /// Unification guard for polymorphic entities: the formal types of
    /// bound argument positions must unify with the actual value types
    fn type_vars_match(
        &self,
        type_vars: &[Id],
        bound: &[(Id, Type)],
        args: &[DefArg],
        actuals: &[Value],
    ) -> bool {
        if type_vars.is_empty() {
            return true;
        }
        let mut formals = Vec::new();
        let mut concrete = Vec::new();
        for (pattern, actual) in args.iter().zip(actuals) {
            if let DefArg::Bound(x) = pattern {
                let Some((_, ty)) = bound.iter().find(|(n, _)| n == x) else {
                    continue;
                };
                let Some(vt) = value_type(actual) else {
                    return false;
                };
                formals.push(ty.clone());
                concrete.push(vt);
            }
        }
        unify(&formals, &concrete, type_vars).is_some()
    }

    /// Apply the nullary constraints of `name` as assumptions
    fn apply_simple_constraints(&mut self, name: &str, pos: Span) -> ExecResult<()> {
        let constraints: Vec<EntityConstraint> = self
            .env
            .store
            .name_set(name)
            .map(|s| s.simple_constraints().cloned().collect())
            .unwrap_or_default();
        for c in constraints {
            let clause = guarded(&c);
            self.assume_clause(&clause, c.kind, if c.pos == Span::dummy() { pos } else { c.pos })?;
        }
        Ok(())
    }

    /// Evaluate a free clause; false fails the branch as unreachable
    pub(crate) fn assume_clause(
        &mut self,
        expr: &Spanned<Expr>,
        kind: SpecKind,
        pos: Span,
    ) -> ExecResult<()> {
        self.last_term = None;
        let holds = self.eval_bool(expr)?;
        if !holds {
            let last_term = self.last_term.take();
            return Err(self.fail(
                FailureSource::SpecViolation {
                    kind,
                    free: true,
                    expr: expr.clone(),
                    last_term,
                },
                pos,
            ));
        }
        self.note_path_constraint(expr, pos)?;
        Ok(())
    }

    /// Collect an assumed clause; with a solver attached, prune branches
    /// whose constraint set became unsatisfiable
    pub(crate) fn note_path_constraint(
        &mut self,
        expr: &Spanned<Expr>,
        pos: Span,
    ) -> ExecResult<()> {
        self.path_constraints.push(expr.clone());
        if let Some(bridge) = self.solver.as_mut() {
            match bridge.check(&self.path_constraints, 0) {
                Ok(sat) if sat.is_unsat() => {
                    debug!("solver pruned an unsatisfiable branch");
                    return Err(self.fail(
                        FailureSource::SpecViolation {
                            kind: SpecKind::Inline,
                            free: true,
                            expr: expr.clone(),
                            last_term: None,
                        },
                        pos,
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    return self.unsupported(format!("solver failure: {}", e), pos);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maps: selection, update, equality
    // ------------------------------------------------------------------

    fn eval_application(
        &mut self,
        whole: &Spanned<Expr>,
        f: &str,
        args: &[Spanned<Expr>],
    ) -> ExecResult<Value> {
        // A function is its backing map constant
        let fv = self.lazy_var(f, whole.span)?;
        let Value::Reference(r) = fv else {
            return self.unsupported(format!("{} is not applicable", f), whole.span);
        };
        let key = self.eval_index_tuple(args)?;
        let range_ty = self.env.tc.type_of(whole);
        self.select_at(r, key, range_ty, whole.span)
    }

    fn eval_map_select(
        &mut self,
        whole: &Spanned<Expr>,
        map: &Spanned<Expr>,
        args: &[Spanned<Expr>],
    ) -> ExecResult<Value> {
        let mv = self.eval(map)?;
        let Value::Reference(r) = mv else {
            return self.unsupported(
                format!("selection from {}", mv.kind_name()),
                whole.span,
            );
        };
        let key = self.eval_index_tuple(args)?;
        let range_ty = self.env.tc.type_of(whole);
        self.select_at(r, key, range_ty, whole.span)
    }

    fn eval_index_tuple(&mut self, args: &[Spanned<Expr>]) -> ExecResult<Vec<Value>> {
        let mut key = Vec::with_capacity(args.len());
        for a in args {
            let v = self.eval(a)?;
            if v.as_ref().is_some() {
                return self.unsupported("map value as map index", a.span);
            }
            key.push(v);
        }
        Ok(key)
    }

    /// Lazy map read at a concrete key
    pub(crate) fn select_at(
        &mut self,
        r: Ref,
        key: Vec<Value>,
        range_ty: Option<Type>,
        pos: Span,
    ) -> ExecResult<Value> {
        let (source, cache) = self.memory.heap.flatten(r);
        if let Some(v) = cache.get(&key) {
            let v = v.clone();
            self.well_defined(&v, pos)?;
            return Ok(v);
        }

        // Definitions attached to the source
        let defs: Vec<Definition> = self
            .env
            .store
            .ref_set(source)
            .map(|s| s.definitions.clone())
            .unwrap_or_default();
        if !defs.is_empty() {
            let code = self.fresh_code();
            self.memory
                .heap
                .store_at(source, key.clone(), Value::under_construction(code));
            for def in defs {
                match self.apply_definition(&def, &key) {
                    Ok(Some(v)) => {
                        self.memory.heap.store_at(source, key.clone(), v.clone());
                        self.apply_entry_constraints(source, &key, pos)?;
                        return Ok(v);
                    }
                    Ok(None) => {}
                    Err(f) if f.under_construction().is_some() => {
                        trace!("map definition cycles, skipped");
                    }
                    Err(f) => {
                        self.memory.heap.remove_at(source, &key);
                        return Err(f);
                    }
                }
            }
            self.memory.heap.remove_at(source, &key);
        }

        // Generate at the source, never in an override
        let Some(ty) = range_ty else {
            return self.unsupported("map selection outside the type context", pos);
        };
        let v = self.generate_value(&ty)?;
        self.memory.heap.store_at(source, key.clone(), v.clone());
        self.apply_entry_constraints(source, &key, pos)?;
        Ok(v)
    }

    /// Per-entry application of deferred map constraints
    fn apply_entry_constraints(
        &mut self,
        source: Ref,
        key: &[Value],
        pos: Span,
    ) -> ExecResult<()> {
        let constraints: Vec<EntityConstraint> = self
            .env
            .store
            .ref_set(source)
            .map(|s| s.constraints.clone())
            .unwrap_or_default();
        for c in constraints {
            if c.args.len() != key.len() {
                continue;
            }
            // Bind pattern positions; a fixed position that differs makes
            // the constraint inapplicable to this entry
            let mut undo: Vec<(Id, Option<Value>)> = Vec::new();
            let mut matched: Vec<Id> = Vec::new();
            let mut applicable = true;
            self.env.tc.push_scope(c.bound.iter().cloned());
            for (pattern, actual) in c.args.iter().zip(key) {
                match pattern {
                    DefArg::Bound(x) => {
                        let shadowed = self.memory.bind_local(x, actual.clone());
                        undo.push((x.clone(), shadowed));
                        matched.push(x.clone());
                    }
                    DefArg::Fixed(e) => match self.eval(e) {
                        Ok(fixed) if &fixed == actual => {}
                        Ok(_) => {
                            applicable = false;
                            break;
                        }
                        Err(f) => {
                            for (name, shadowed) in undo.into_iter().rev() {
                                self.memory.unbind_local(&name, shadowed);
                            }
                            self.env.tc.pop_scope();
                            return Err(f);
                        }
                    },
                }
            }
            let result = if applicable {
                // Binders the key did not determine stay quantified
                let residual: Vec<(Id, Type)> = c
                    .bound
                    .iter()
                    .filter(|(n, _)| !matched.contains(n))
                    .cloned()
                    .collect();
                let mut clause = guarded(&c);
                if !residual.is_empty() {
                    let span = clause.span;
                    clause = Spanned::new(
                        Expr::Quantified(
                            QOp::Forall,
                            c.type_vars.clone(),
                            residual,
                            Box::new(clause),
                        ),
                        span,
                    );
                }
                self.assume_clause(&clause, c.kind, if c.pos == Span::dummy() { pos } else { c.pos })
            } else {
                Ok(())
            };
            for (name, shadowed) in undo.into_iter().rev() {
                self.memory.unbind_local(&name, shadowed);
            }
            self.env.tc.pop_scope();
            result?;
        }
        Ok(())
    }

    fn eval_map_update(
        &mut self,
        map: &Spanned<Expr>,
        args: &[Spanned<Expr>],
        value: &Spanned<Expr>,
        pos: Span,
    ) -> ExecResult<Value> {
        let mv = self.eval(map)?;
        let Value::Reference(base) = mv else {
            return self.unsupported(format!("update of {}", mv.kind_name()), pos);
        };
        let key = self.eval_index_tuple(args)?;
        let new = self.eval(value)?;

        let repr = match self.memory.heap.get(base) {
            MapRepr::Source(_) => {
                let mut overrides = crate::value::MapCache::default();
                overrides.insert(key, new);
                MapRepr::Derived { base, overrides }
            }
            MapRepr::Derived {
                base: deeper,
                overrides,
            } => {
                let mut overrides = overrides.clone();
                overrides.insert(key, new);
                MapRepr::Derived {
                    base: *deeper,
                    overrides,
                }
            }
        };
        Ok(Value::Reference(self.memory.heap.alloc(repr)))
    }

    /// Equality of two map references: try direct evidence first, then
    /// resolve non-deterministically
    pub(crate) fn map_equality(&mut self, r1: Ref, r2: Ref, pos: Span) -> ExecResult<bool> {
        if r1 == r2 {
            return Ok(true);
        }
        let (s1, c1) = self.memory.heap.flatten(r1);
        let (s2, c2) = self.memory.heap.flatten(r2);

        // Conflicting shared key: definitely different
        for (k, v1) in c1.iter() {
            if let Some(v2) = c2.get(k) {
                if v1 != v2 {
                    let deep_equal = match (v1, v2) {
                        (Value::Reference(a), Value::Reference(b)) => {
                            self.map_equality(*a, *b, pos)?
                        }
                        _ => false,
                    };
                    if !deep_equal {
                        return Ok(false);
                    }
                }
            }
        }
        // Identical flattened views over the same source: equal
        if s1 == s2 && c1 == c2 {
            return Ok(true);
        }

        if self.gen.gen_bool() {
            debug!(%r1, %r2, "forcing maps equal");
            self.force_equal(r1, r2, pos)?;
            return Ok(true);
        }

        let in_overrides = if s1 == s2 {
            true
        } else {
            // the difference may sit in the overrides or in the sources
            self.gen.gen_bool()
        };

        if in_overrides {
            // Pick a key present on one side only and make both sides
            // concrete there, then look again
            let mut candidates: Vec<Vec<Value>> = Vec::new();
            for k in c1.keys() {
                if !c2.contains_key(k) {
                    candidates.push(k.clone());
                }
            }
            for k in c2.keys() {
                if !c1.contains_key(k) {
                    candidates.push(k.clone());
                }
            }
            if candidates.is_empty() {
                // No override distinguishes them; fall back to the
                // source-level split below
                self.install_distinguishing_entry(s1, s2, pos)?;
                return Ok(false);
            }
            let k = candidates[self.gen.gen_index(candidates.len())].clone();
            // The side that has the key tells us what to generate on the
            // side that lacks it
            let range_hint = c1
                .get(&k)
                .or_else(|| c2.get(&k))
                .and_then(value_type);
            self.select_at(r1, k.clone(), range_hint.clone(), pos)?;
            self.select_at(r2, k, range_hint, pos)?;
            self.map_equality(r1, r2, pos)
        } else {
            self.install_distinguishing_entry(s1, s2, pos)?;
            Ok(false)
        }
    }

    /// Make two distinct sources observably different at a synthesized key
    fn install_distinguishing_entry(&mut self, s1: Ref, s2: Ref, _pos: Span) -> ExecResult<()> {
        let key = vec![Value::source_witness(if s1 < s2 { s1 } else { s2 })];
        self.memory
            .heap
            .store_at(s1, key.clone(), Value::source_witness(s1));
        self.memory
            .heap
            .store_at(s2, key, Value::source_witness(s2));
        Ok(())
    }

    /// Unify two references so they denote the same map from here on
    pub(crate) fn force_equal(&mut self, r1: Ref, r2: Ref, pos: Span) -> ExecResult<()> {
        if r1 == r2 {
            return Ok(());
        }
        let (s1, c1) = self.memory.heap.flatten(r1);
        let (s2, c2) = self.memory.heap.flatten(r2);

        // (a) shared entries must agree
        for (k, v1) in c1.iter() {
            if let Some(v2) = c2.get(k) {
                self.enforce_value_equal(v1, v2, pos)?;
            }
        }

        if s1 == s2 {
            // (b) publish both sides' private overrides to the shared source
            for (k, v) in c1.iter() {
                if !c2.contains_key(k) {
                    self.memory.heap.store_at(s1, k.clone(), v.clone());
                }
            }
            for (k, v) in c2.iter() {
                if !c1.contains_key(k) {
                    self.memory.heap.store_at(s1, k.clone(), v.clone());
                }
            }
            return Ok(());
        }

        // (c) fresh source holding the union of known values; both prior
        // sources become derived from it, which redirects every chain
        // that passed through them
        let union = c1.union(c2);
        let fresh = self.memory.heap.alloc(MapRepr::Source(union));
        self.memory.heap.replace_repr(
            s1,
            MapRepr::Derived {
                base: fresh,
                overrides: crate::value::MapCache::default(),
            },
        );
        self.memory.heap.replace_repr(
            s2,
            MapRepr::Derived {
                base: fresh,
                overrides: crate::value::MapCache::default(),
            },
        );
        self.env.store.merge_refs(s1, s2, fresh);
        Ok(())
    }

    /// Forcing two values equal: references unify, concrete values must
    /// already agree — a mismatch means the generator's choice was
    /// infeasible, which prunes the branch
    fn enforce_value_equal(&mut self, v1: &Value, v2: &Value, pos: Span) -> ExecResult<()> {
        match (v1, v2) {
            (Value::Reference(a), Value::Reference(b)) => self.force_equal(*a, *b, pos),
            _ if v1 == v2 => Ok(()),
            _ => Err(self.fail(
                FailureSource::SpecViolation {
                    kind: SpecKind::Inline,
                    free: true,
                    expr: Spanned::new(Expr::Bool(false), pos),
                    last_term: None,
                },
                pos,
            )),
        }
    }
}

/// `guard ⇒ body`, or just the body when unguarded
fn guarded(c: &EntityConstraint) -> Spanned<Expr> {
    match &c.guard {
        None => c.body.clone(),
        Some(g) => {
            let span = c.body.span;
            Spanned::new(
                Expr::BinaryExpr(
                    BinOp::Implies,
                    Box::new(g.clone()),
                    Box::new(c.body.clone()),
                ),
                span,
            )
        }
    }
}
