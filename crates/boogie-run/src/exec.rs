//! Statement and procedure execution
//!
//! Bodies arrive flattened: execution walks labeled blocks, runs their
//! basic statements, and dispatches on the terminator. A goto with
//! several targets draws the target from the generator; under the
//! deterministic engine an assumption violation backtracks to the nearest
//! goto with untried targets, while an exploring engine lets the
//! violation surface as an invalid test case and revisits the goto
//! through the replay driver. Garbage collection runs after every basic
//! statement.

use crate::error::{ExecResult, FailureKind, FailureSource, RuntimeFailure};
use crate::generator::Generator;
use crate::memory::{Memory, StoreKind};
use crate::preprocess::{ProcedureImpl, ProcedureInfo};
use crate::value::Value;
use boogie_core::ast::{
    AssignTarget, Expr, Id, SpecClause, SpecKind, Statement, Type,
};
use boogie_core::flatten::{BasicBlocks, ENTRY_LABEL};
use boogie_core::normal_form::rename_vars;
use boogie_core::{Span, Spanned};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::eval::Interpreter;

/// What a block's terminator decided
enum BlockEnd {
    Return(Span),
    Goto(Vec<Id>),
}

/// A goto whose untried targets may still be revisited. Retrying restores
/// memory, collected path constraints, and the reference-attached half of
/// the constraint store (the abandoned branch may have allocated and
/// constrained references whose slots will be reused).
struct GotoAlternatives {
    remaining: Vec<Id>,
    memory: Memory,
    store: crate::constraints::ConstraintStore,
    constraints_len: usize,
}

/// Result of running the entry procedure once
#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub ins: Vec<(Id, Option<Value>)>,
    pub outs: Vec<(Id, Option<Value>)>,
    pub failure: Option<Box<RuntimeFailure>>,
}

impl<G: Generator> Interpreter<G> {
    // ------------------------------------------------------------------
    // Basic statements
    // ------------------------------------------------------------------

    /// Check a specification clause: free clauses are assumed, the rest
    /// asserted
    pub(crate) fn check_clause(&mut self, clause: &SpecClause) -> ExecResult<()> {
        if clause.free {
            return self.assume_clause(&clause.expr, clause.kind, clause.expr.span);
        }
        self.last_term = None;
        let holds = self.eval_bool(&clause.expr)?;
        if !holds {
            let last_term = self.last_term.take();
            return Err(self.fail(
                FailureSource::SpecViolation {
                    kind: clause.kind,
                    free: false,
                    expr: clause.expr.clone(),
                    last_term,
                },
                clause.expr.span,
            ));
        }
        Ok(())
    }

    fn exec_basic(&mut self, stmt: &Spanned<Statement>) -> ExecResult<()> {
        match &stmt.node {
            Statement::Predicate(clause) => self.check_clause(clause)?,
            Statement::Havoc(names) => {
                for n in names {
                    let kind = self.resolve_store(&n.node);
                    if kind == StoreKind::Global {
                        self.memory.mark_modified(&n.node);
                    }
                    self.memory.unset(kind, &n.node);
                    trace!(name = %n.node, "havoc");
                }
            }
            Statement::Assign(targets, rhss) => self.exec_assign(targets, rhss)?,
            Statement::Call(lhss, proc, args) => {
                self.exec_call(lhss, &proc.node, args, stmt.span)?
            }
            // The flattener leaves no other statement inside a block
            other => {
                return Err(self.fail(
                    FailureSource::UnsupportedConstruct(format!(
                        "{} outside of flattened control flow",
                        stmt_keyword(other)
                    )),
                    stmt.span,
                ));
            }
        }
        self.collect_garbage();
        Ok(())
    }

    fn resolve_store(&self, name: &str) -> StoreKind {
        if self.env.tc.is_global(name) && !self.env.tc.is_local(name) {
            StoreKind::Global
        } else {
            StoreKind::Local
        }
    }

    /// Run garbage collection and drop constraint sets of freed references
    pub(crate) fn collect_garbage(&mut self) {
        for r in self.memory.heap.collect_garbage() {
            self.env.store.release_ref(r);
        }
    }

    /// `a[i][j] := e` becomes `a := a[i := a[i][j := e]]`
    fn desugar_update(
        base: Spanned<Expr>,
        indexes: &[Vec<Spanned<Expr>>],
        rhs: Spanned<Expr>,
    ) -> Spanned<Expr> {
        match indexes.split_first() {
            None => rhs,
            Some((first, rest)) => {
                let span = base.span;
                let inner_base = Spanned::new(
                    Expr::MapSelect(Box::new(base.clone()), first.clone()),
                    span,
                );
                let inner = Self::desugar_update(inner_base, rest, rhs);
                Spanned::new(
                    Expr::MapUpdate(Box::new(base), first.clone(), Box::new(inner)),
                    span,
                )
            }
        }
    }

    fn exec_assign(
        &mut self,
        targets: &[AssignTarget],
        rhss: &[Spanned<Expr>],
    ) -> ExecResult<()> {
        // Evaluate all right-hand sides (with map updates desugared in),
        // then assign in order
        let mut values = Vec::with_capacity(targets.len());
        for (target, rhs) in targets.iter().zip(rhss) {
            let base = Spanned::new(Expr::Var(target.name.node.clone()), target.name.span);
            let full = Self::desugar_update(base, &target.indexes, rhs.clone());
            values.push(self.eval(&full)?);
        }
        for (target, value) in targets.iter().zip(values) {
            let kind = self.resolve_store(&target.name.node);
            if kind == StoreKind::Global {
                self.memory.mark_modified(&target.name.node);
            }
            self.memory.set(kind, target.name.node.clone(), value);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    fn exec_block(&mut self, blocks: &BasicBlocks, label: &str) -> ExecResult<BlockEnd> {
        let Some(stmts) = blocks.get(label) else {
            return Err(self.fail(
                FailureSource::UnsupportedConstruct(format!("jump to unknown label {}", label)),
                Span::dummy(),
            ));
        };
        let (terminator, body) = stmts.split_last().expect("blocks are non-empty");
        for stmt in body {
            self.exec_basic(stmt)?;
        }
        match &terminator.node {
            Statement::Return => Ok(BlockEnd::Return(terminator.span)),
            Statement::Goto(targets) => Ok(BlockEnd::Goto(targets.clone())),
            other => Err(self.fail(
                FailureSource::UnsupportedConstruct(format!(
                    "{} as a block terminator",
                    stmt_keyword(other)
                )),
                terminator.span,
            )),
        }
    }

    /// Execute a flattened body from `start` to its `return`
    pub(crate) fn run_body(&mut self, blocks: &BasicBlocks) -> ExecResult<Span> {
        let mut label: Id = ENTRY_LABEL.to_string();
        let mut alternatives: Vec<GotoAlternatives> = Vec::new();
        loop {
            match self.exec_block(blocks, &label) {
                Ok(BlockEnd::Return(span)) => return Ok(span),
                Ok(BlockEnd::Goto(targets)) => {
                    let idx = if targets.len() > 1 {
                        self.gen.gen_index(targets.len())
                    } else {
                        0
                    };
                    if self.retry_unreachable && targets.len() > 1 {
                        let mut remaining = targets.clone();
                        remaining.remove(idx);
                        alternatives.push(GotoAlternatives {
                            remaining,
                            memory: self.memory.clone(),
                            store: self.env.store.clone(),
                            constraints_len: self.path_constraints.len(),
                        });
                    }
                    label = targets[idx].clone();
                }
                Err(f)
                    if self.retry_unreachable && f.kind() == FailureKind::Unreachable =>
                {
                    // Retry the nearest goto that still has untried targets
                    let Some(next) = self.backtrack(&mut alternatives) else {
                        return Err(f);
                    };
                    debug!(label = %next, "assumption violated, retrying goto");
                    label = next;
                }
                Err(f) => return Err(f),
            }
        }
    }

    fn backtrack(&mut self, alternatives: &mut Vec<GotoAlternatives>) -> Option<Id> {
        loop {
            let mut alt = alternatives.pop()?;
            if alt.remaining.is_empty() {
                continue;
            }
            self.memory = alt.memory.clone();
            self.env.store = alt.store.clone();
            self.path_constraints.truncate(alt.constraints_len);
            let idx = if alt.remaining.len() > 1 {
                self.gen.gen_index(alt.remaining.len())
            } else {
                0
            };
            let label = alt.remaining.remove(idx);
            if !alt.remaining.is_empty() {
                alternatives.push(alt);
            }
            return Some(label);
        }
    }

    // ------------------------------------------------------------------
    // Procedure calls
    // ------------------------------------------------------------------

    fn exec_call(
        &mut self,
        lhss: &[Spanned<Id>],
        proc: &str,
        args: &[Spanned<Expr>],
        call_span: Span,
    ) -> ExecResult<()> {
        let Some(info) = self.env.procedures.get(proc).cloned() else {
            return Err(self.fail(
                FailureSource::UnsupportedConstruct(format!("call to undeclared {}", proc)),
                call_span,
            ));
        };
        let mut in_values = Vec::with_capacity(args.len());
        for a in args {
            in_values.push(self.eval(a)?);
        }

        let outs = self.invoke(&info, Some(in_values), call_span)?;
        for (lhs, value) in lhss.iter().zip(outs) {
            let kind = self.resolve_store(&lhs.node);
            if kind == StoreKind::Global {
                self.memory.mark_modified(&lhs.node);
            }
            let value = value.expect("call outputs are materialized");
            self.memory.set(kind, lhs.node.clone(), value);
        }
        Ok(())
    }

    /// Execute one call of `info`. `in_values` is `None` for the entry
    /// procedure, whose inputs are generated lazily. Returns the output
    /// values, materialized for real calls.
    fn invoke(
        &mut self,
        info: &ProcedureInfo,
        in_values: Option<Vec<Value>>,
        call_span: Span,
    ) -> ExecResult<Vec<Option<Value>>> {
        let is_call = in_values.is_some();

        // Choose an implementation; none means a havoc-and-assume dummy
        let chosen: Option<ProcedureImpl> = if info.impls.is_empty() {
            None
        } else if info.impls.len() == 1 {
            Some(info.impls[0].clone())
        } else {
            let idx = self.gen.gen_index(info.impls.len());
            Some(info.impls[idx].clone())
        };

        let frames = self.enter_procedure(info, chosen.as_ref(), in_values);
        let result = self.invoke_in_frame(info, chosen.as_ref(), is_call, call_span);
        self.exit_procedure(frames);
        // no collection here: returned values may hold the only reference
        // until the caller stores them; the statement-end sweep follows
        result
    }

    fn invoke_in_frame(
        &mut self,
        info: &ProcedureInfo,
        imp: Option<&ProcedureImpl>,
        is_call: bool,
        call_span: Span,
    ) -> ExecResult<Vec<Option<Value>>> {
        let annotate = |f: Box<RuntimeFailure>| {
            if is_call {
                Box::new(f.push_frame(call_span, info.name.clone()))
            } else {
                f
            }
        };

        // Parameters bound by the call are materialized already; their
        // where clauses are assumed now. Lazily materialized names keep
        // theirs for first read.
        if is_call {
            let bound_wheres: Vec<Spanned<Expr>> = self
                .local_wheres
                .last()
                .map(|frame| {
                    frame
                        .iter()
                        .filter(|(name, _)| {
                            self.memory.get(StoreKind::Local, name).is_some()
                        })
                        .map(|(_, w)| w.clone())
                        .collect()
                })
                .unwrap_or_default();
            for w in bound_wheres {
                self.assume_clause(&w, SpecKind::Where, w.span)
                    .map_err(&annotate)?;
            }
        }

        // Preconditions: checked at call sites, assumed for the entry
        // procedure (they constrain its generated inputs)
        for (free, e) in &info.requires {
            let clause = SpecClause {
                kind: SpecKind::Precondition,
                free: *free || !is_call,
                expr: e.clone(),
            };
            self.check_clause(&clause).map_err(annotate)?;
        }

        match imp {
            Some(imp) => {
                let blocks = imp.blocks.clone();
                self.run_body(&blocks).map_err(annotate)?;
            }
            None => {
                // Dummy body: havoc everything the contract lets the
                // procedure touch
                debug!(name = %info.name, "no implementation, synthesizing dummy");
                for g in &info.modifies {
                    self.memory.mark_modified(g);
                    self.memory.unset(StoreKind::Global, g);
                }
            }
        }

        // Contracts speak in declared parameter names; under renaming the
        // body wrote the implementation's, so mirror outputs across
        if let Some(imp) = imp {
            if imp.params_renamed {
                let pairs: Vec<(Id, Id)> = info
                    .rets
                    .iter()
                    .map(|v| v.name.clone())
                    .zip(imp.outs.iter().cloned())
                    .collect();
                for (decl, impl_name) in pairs {
                    if decl != impl_name {
                        if let Some(v) =
                            self.memory.get(StoreKind::Local, &impl_name).cloned()
                        {
                            self.memory.set(StoreKind::Local, decl, v);
                        }
                    }
                }
            }
        }

        // Postconditions: checked against an implementation, assumed of a
        // dummy (they are all we know about it)
        for (free, e) in &info.ensures {
            let clause = SpecClause {
                kind: SpecKind::Postcondition,
                free: *free || imp.is_none(),
                expr: e.clone(),
            };
            self.check_clause(&clause).map_err(annotate)?;
        }

        // Materialize outputs under their implementation names
        let out_names: Vec<Id> = match imp {
            Some(imp) => imp.outs.clone(),
            None => info.rets.iter().map(|v| v.name.clone()).collect(),
        };
        let mut outs = Vec::with_capacity(out_names.len());
        for name in &out_names {
            let v = self.lazy_var(name, call_span).map_err(annotate)?;
            outs.push(Some(v));
        }
        Ok(outs)
    }

    /// Set up callee frames: locals with bound inputs, fresh old store,
    /// type scope, and where-clause table
    fn enter_procedure(
        &mut self,
        info: &ProcedureInfo,
        imp: Option<&ProcedureImpl>,
        in_values: Option<Vec<Value>>,
    ) -> ProcedureFrames {
        let renamed = imp.is_some_and(|i| i.params_renamed);

        // Scope types: declared formals and rets, implementation aliases,
        // and implementation locals
        let mut scope: Vec<(Id, Type)> = Vec::new();
        for v in info.formals.iter().chain(&info.rets) {
            scope.push((v.name.clone(), v.ty.clone()));
        }
        if let Some(imp) = imp {
            if renamed {
                for (name, v) in imp.ins.iter().zip(&info.formals) {
                    scope.push((name.clone(), v.ty.clone()));
                }
                for (name, v) in imp.outs.iter().zip(&info.rets) {
                    scope.push((name.clone(), v.ty.clone()));
                }
            }
            for l in &imp.locals {
                scope.push((l.name.clone(), l.ty.clone()));
            }
        }

        // Where clauses become lazy local constraints; under renaming the
        // declared parameter names are rewritten to the implementation's
        let mut wheres: FxHashMap<Id, Spanned<Expr>> = FxHashMap::default();
        let mut renaming: FxHashMap<Id, Id> = FxHashMap::default();
        if let Some(imp) = imp {
            if renamed {
                for (decl, impl_name) in info
                    .formals
                    .iter()
                    .map(|v| &v.name)
                    .chain(info.rets.iter().map(|v| &v.name))
                    .zip(imp.ins.iter().chain(&imp.outs))
                {
                    renaming.insert(decl.clone(), impl_name.clone());
                }
            }
            for l in &imp.locals {
                if let Some(w) = &l.where_clause {
                    wheres.insert(l.name.clone(), w.clone());
                }
            }
        }
        for v in info.formals.iter().chain(&info.rets) {
            if let Some(w) = &v.where_clause {
                let w = rename_vars(w, &renaming);
                let target = renaming.get(&v.name).unwrap_or(&v.name).clone();
                wheres.insert(target, w);
            }
        }

        // Bind inputs under declared names and implementation aliases
        let mut bindings: Vec<(Id, Value)> = Vec::new();
        if let Some(values) = in_values {
            for (v, value) in info.formals.iter().zip(&values) {
                bindings.push((v.name.clone(), value.clone()));
            }
            if renamed {
                if let Some(imp) = imp {
                    for (name, value) in imp.ins.iter().zip(&values) {
                        bindings.push((name.clone(), value.clone()));
                    }
                }
            }
        }

        self.env.tc.push_scope(scope);
        self.local_wheres.push(wheres);
        let locals = self.memory.push_locals(bindings);
        let old = self.memory.save_old();
        ProcedureFrames { locals, old }
    }

    fn exit_procedure(&mut self, frames: ProcedureFrames) {
        self.memory.pop_locals(frames.locals);
        self.memory.restore_old(frames.old);
        self.local_wheres.pop();
        self.env.tc.pop_scope();
    }

    // ------------------------------------------------------------------
    // Entry runs
    // ------------------------------------------------------------------

    /// Run `entry` once from a fresh state, recording its materialized
    /// inputs and outputs. Failures are captured, not propagated.
    pub fn run_entry(&mut self, entry: &str) -> EntryRecord {
        let Some(info) = self.env.procedures.get(entry).cloned() else {
            let failure = self.fail(
                FailureSource::UnsupportedConstruct(format!(
                    "entry procedure {} is not declared",
                    entry
                )),
                Span::dummy(),
            );
            return EntryRecord {
                ins: vec![],
                outs: vec![],
                failure: Some(failure),
            };
        };

        let chosen: Option<ProcedureImpl> = if info.impls.is_empty() {
            None
        } else if info.impls.len() == 1 {
            Some(info.impls[0].clone())
        } else {
            let idx = self.gen.gen_index(info.impls.len());
            Some(info.impls[idx].clone())
        };

        let frames = self.enter_procedure(&info, chosen.as_ref(), None);
        let result = self.invoke_in_frame(&info, chosen.as_ref(), false, info.pos);

        // Read parameters out of the entry frame before dismantling it;
        // inputs the run never touched stay unmaterialized
        let read = |mem: &Memory, decl: &Id, alias: Option<&Id>| -> Option<Value> {
            mem.get(StoreKind::Local, decl)
                .or_else(|| alias.and_then(|a| mem.get(StoreKind::Local, a)))
                .cloned()
        };
        let aliases: Vec<Option<&Id>> = match &chosen {
            Some(imp) if imp.params_renamed => imp.ins.iter().map(Some).collect(),
            _ => info.formals.iter().map(|_| None).collect(),
        };
        let ins: Vec<(Id, Option<Value>)> = info
            .formals
            .iter()
            .zip(aliases)
            .map(|(v, alias)| (v.name.clone(), read(&self.memory, &v.name, alias)))
            .collect();

        let (outs, failure) = match result {
            Ok(values) => {
                let outs = info
                    .rets
                    .iter()
                    .map(|v| v.name.clone())
                    .zip(values)
                    .collect();
                (outs, None)
            }
            Err(f) => {
                let out_aliases: Vec<Option<&Id>> = match &chosen {
                    Some(imp) if imp.params_renamed => imp.outs.iter().map(Some).collect(),
                    _ => info.rets.iter().map(|_| None).collect(),
                };
                let outs = info
                    .rets
                    .iter()
                    .zip(out_aliases)
                    .map(|(v, alias)| (v.name.clone(), read(&self.memory, &v.name, alias)))
                    .collect();
                (outs, Some(f))
            }
        };

        self.exit_procedure(frames);
        EntryRecord { ins, outs, failure }
    }
}

struct ProcedureFrames {
    locals: crate::memory::LocalsFrame,
    old: crate::memory::OldFrame,
}

fn stmt_keyword(stmt: &Statement) -> &'static str {
    match stmt {
        Statement::Predicate(_) => "predicate",
        Statement::Havoc(_) => "havoc",
        Statement::Assign(..) => "assignment",
        Statement::Call(..) => "call",
        Statement::If(..) => "if",
        Statement::While(..) => "while",
        Statement::Break(_) => "break",
        Statement::Return => "return",
        Statement::Goto(_) => "goto",
        Statement::Skip => "skip",
    }
}
