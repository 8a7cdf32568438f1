//! Abstract constraint store
//!
//! Axioms, function bodies, and where clauses are compiled into two kinds
//! of facts about entities: *definitions* (guarded equalities that can
//! produce a value) and *constraints* (predicates a materialized value
//! must satisfy, applied as assumptions). Facts attach to names at
//! preprocessing time; facts about map entities transfer to the map's
//! heap reference when the map is materialized, so that later indexing
//! can consult them.

use crate::value::Ref;
use boogie_core::ast::{Expr, Id, SpecKind, Type};
use boogie_core::{Span, Spanned};
use rustc_hash::FxHashMap;

/// A formal argument position of a definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefArg {
    /// A bound variable of the defining axiom: matches any value
    Bound(Id),
    /// A fixed expression: the definition applies when the actual
    /// argument equals it
    Fixed(Spanned<Expr>),
}

/// A guarded equality: `guard(args) ⇒ entity(args) == body(args)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    /// Bound type variables of the defining axiom
    pub type_vars: Vec<Id>,
    /// Bound variables with their declared types
    pub bound: Vec<(Id, Type)>,
    /// Argument pattern; empty for plain (nullary) entities
    pub args: Vec<DefArg>,
    /// `None` means unconditionally applicable
    pub guard: Option<Spanned<Expr>>,
    pub body: Spanned<Expr>,
    /// Position of the defining axiom or function body
    pub pos: Span,
}

/// A predicate a materialized entity must satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityConstraint {
    /// Bound type variables of the constraining axiom
    pub type_vars: Vec<Id>,
    /// Bound variables; non-empty makes this a forall-style constraint
    /// that is checked per map entry rather than once
    pub bound: Vec<(Id, Type)>,
    /// Argument pattern for forall-style constraints on maps
    pub args: Vec<DefArg>,
    pub guard: Option<Spanned<Expr>>,
    pub body: Spanned<Expr>,
    /// `Axiom` or `Where`; both are free clauses
    pub kind: SpecKind,
    pub pos: Span,
}

/// Definitions and constraints of one entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    pub definitions: Vec<Definition>,
    pub constraints: Vec<EntityConstraint>,
}

impl ConstraintSet {
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty() && self.constraints.is_empty()
    }

    /// Facts whose bound-variable list is empty, applied once at
    /// materialization
    pub fn simple_constraints(&self) -> impl Iterator<Item = &EntityConstraint> {
        self.constraints.iter().filter(|c| c.bound.is_empty())
    }

    /// Forall-style facts, deferred to per-entry application
    pub fn deferred(&self) -> ConstraintSet {
        ConstraintSet {
            definitions: self
                .definitions
                .iter()
                .filter(|d| !d.bound.is_empty() || !d.args.is_empty())
                .cloned()
                .collect(),
            constraints: self
                .constraints
                .iter()
                .filter(|c| !c.bound.is_empty())
                .cloned()
                .collect(),
        }
    }

    fn merge(&mut self, other: ConstraintSet) {
        self.definitions.extend(other.definitions);
        self.constraints.extend(other.constraints);
    }
}

/// The store: per-name facts from preprocessing, per-reference facts
/// attached at materialization and merged by map unification
#[derive(Debug, Clone, Default)]
pub struct ConstraintStore {
    names: FxHashMap<Id, ConstraintSet>,
    refs: FxHashMap<usize, ConstraintSet>,
}

impl ConstraintStore {
    pub fn new() -> Self {
        ConstraintStore::default()
    }

    pub fn name_set(&self, name: &str) -> Option<&ConstraintSet> {
        self.names.get(name)
    }

    pub fn add_definition(&mut self, name: impl Into<Id>, def: Definition) {
        self.names.entry(name.into()).or_default().definitions.push(def);
    }

    pub fn add_constraint(&mut self, name: impl Into<Id>, c: EntityConstraint) {
        self.names.entry(name.into()).or_default().constraints.push(c);
    }

    pub fn ref_set(&self, r: Ref) -> Option<&ConstraintSet> {
        self.refs.get(&r.0)
    }

    /// Attach facts to a freshly materialized map reference
    pub fn attach_ref(&mut self, r: Ref, set: ConstraintSet) {
        if set.is_empty() {
            return;
        }
        self.refs.entry(r.0).or_default().merge(set);
    }

    /// Merge the facts of two unified sources into their replacement
    /// (map equality forcing)
    pub fn merge_refs(&mut self, a: Ref, b: Ref, into: Ref) {
        let mut merged = self.refs.remove(&a.0).unwrap_or_default();
        merged.merge(self.refs.remove(&b.0).unwrap_or_default());
        if !merged.is_empty() {
            self.refs.entry(into.0).or_default().merge(merged);
        }
    }

    /// Drop facts of a collected reference
    pub fn release_ref(&mut self, r: Ref) {
        self.refs.remove(&r.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boogie_core::ast::Expr;
    use boogie_core::Spanned;

    fn def(bound: Vec<(Id, Type)>, args: Vec<DefArg>) -> Definition {
        Definition {
            type_vars: vec![],
            bound,
            args,
            guard: None,
            body: Spanned::dummy(Expr::Bool(true)),
            pos: Span::dummy(),
        }
    }

    #[test]
    fn deferred_keeps_only_parameterized_facts() {
        let mut set = ConstraintSet::default();
        set.definitions.push(def(vec![], vec![]));
        set.definitions.push(def(
            vec![("x".to_string(), Type::Int)],
            vec![DefArg::Bound("x".to_string())],
        ));
        set.constraints.push(EntityConstraint {
            type_vars: vec![],
            bound: vec![],
            args: vec![],
            guard: None,
            body: Spanned::dummy(Expr::Bool(true)),
            kind: SpecKind::Axiom,
            pos: Span::dummy(),
        });
        let deferred = set.deferred();
        assert_eq!(deferred.definitions.len(), 1);
        assert!(deferred.constraints.is_empty());
        assert_eq!(set.simple_constraints().count(), 1);
    }

    #[test]
    fn merge_refs_combines_and_clears() {
        let mut store = ConstraintStore::new();
        let mut a = ConstraintSet::default();
        a.definitions.push(def(vec![], vec![]));
        let mut b = ConstraintSet::default();
        b.definitions.push(def(vec![], vec![]));

        store.attach_ref(Ref(0), a);
        store.attach_ref(Ref(1), b);
        store.merge_refs(Ref(0), Ref(1), Ref(2));

        assert!(store.ref_set(Ref(0)).is_none());
        assert!(store.ref_set(Ref(1)).is_none());
        assert_eq!(store.ref_set(Ref(2)).unwrap().definitions.len(), 2);
    }
}
