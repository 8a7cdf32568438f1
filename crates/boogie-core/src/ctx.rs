//! Type context for a checked program
//!
//! The type checker runs upstream of the interpreter; what the interpreter
//! needs from it is the *context*: signatures of functions and procedures,
//! types of constants and variables, and enough type synthesis to know what
//! kind of value to generate for a name or a map selection. `TypeContext`
//! holds that information and a scope stack for quantified/procedure-local
//! bindings.
//!
//! Unification of formal against actual types (for polymorphic maps and
//! functions) also lives here because deferred map constraints match on it.

use crate::ast::{BinOp, Decl, Expr, FArg, Id, Program, QOp, Type, UnOp};
use crate::span::Spanned;
use rustc_hash::FxHashMap;

/// A function signature
#[derive(Debug, Clone)]
pub struct FunctionSig {
    pub type_args: Vec<Id>,
    pub args: Vec<Type>,
    pub ret: Type,
}

/// A procedure signature
#[derive(Debug, Clone)]
pub struct ProcedureSig {
    pub type_args: Vec<Id>,
    pub ins: Vec<(Id, Type)>,
    pub outs: Vec<(Id, Type)>,
    pub modifies: Vec<Id>,
}

/// A substitution of types for type variables
pub type TypeSubst = FxHashMap<Id, Type>;

/// Apply `subst` to `ty`, leaving unbound idents untouched
pub fn type_subst(ty: &Type, subst: &TypeSubst) -> Type {
    match ty {
        Type::Bool | Type::Int => ty.clone(),
        Type::Map(tv, domains, range) => {
            // Binders shadow the substitution
            let mut inner = subst.clone();
            for v in tv {
                inner.remove(v);
            }
            Type::Map(
                tv.clone(),
                domains.iter().map(|d| type_subst(d, &inner)).collect(),
                Box::new(type_subst(range, &inner)),
            )
        }
        Type::Ident(name, args) => {
            if args.is_empty() {
                if let Some(t) = subst.get(name) {
                    return t.clone();
                }
            }
            Type::Ident(
                name.clone(),
                args.iter().map(|a| type_subst(a, subst)).collect(),
            )
        }
    }
}

/// Unify each formal against the corresponding concrete type, binding the
/// names in `tvars`. Returns `None` when the shapes disagree.
pub fn unify(formals: &[Type], concrete: &[Type], tvars: &[Id]) -> Option<TypeSubst> {
    if formals.len() != concrete.len() {
        return None;
    }
    let mut subst = TypeSubst::default();
    for (formal, actual) in formals.iter().zip(concrete) {
        unify_one(formal, actual, tvars, &mut subst)?;
    }
    Some(subst)
}

fn unify_one(formal: &Type, actual: &Type, tvars: &[Id], subst: &mut TypeSubst) -> Option<()> {
    match (formal, actual) {
        (Type::Ident(name, args), _) if args.is_empty() && tvars.contains(name) => {
            match subst.get(name) {
                Some(bound) if bound == actual => Some(()),
                Some(_) => None,
                None => {
                    subst.insert(name.clone(), actual.clone());
                    Some(())
                }
            }
        }
        (Type::Bool, Type::Bool) | (Type::Int, Type::Int) => Some(()),
        (Type::Map(tv1, d1, r1), Type::Map(tv2, d2, r2)) => {
            // Map binders must agree in count; their names are local
            if tv1.len() != tv2.len() || d1.len() != d2.len() {
                return None;
            }
            for (a, b) in d1.iter().zip(d2) {
                unify_one(a, b, tvars, subst)?;
            }
            unify_one(r1, r2, tvars, subst)
        }
        (Type::Ident(n1, a1), Type::Ident(n2, a2)) => {
            if n1 != n2 || a1.len() != a2.len() {
                return None;
            }
            for (a, b) in a1.iter().zip(a2) {
                unify_one(a, b, tvars, subst)?;
            }
            Some(())
        }
        _ => None,
    }
}

/// The type context the checker hands to the interpreter
#[derive(Debug, Clone, Default)]
pub struct TypeContext {
    /// Type constructor name → arity
    type_constructors: FxHashMap<Id, usize>,
    /// Type synonym name → (parameters, right-hand side)
    type_synonyms: FxHashMap<Id, (Vec<Id>, Type)>,
    /// Global variable types
    globals: FxHashMap<Id, Type>,
    /// Constant types
    constants: FxHashMap<Id, Type>,
    /// Function signatures
    functions: FxHashMap<Id, FunctionSig>,
    /// Procedure signatures
    procedures: FxHashMap<Id, ProcedureSig>,
    /// Scope stack of local bindings, innermost last
    locals: Vec<FxHashMap<Id, Type>>,
    /// Scope stack of bound type variables, innermost last
    type_vars: Vec<Vec<Id>>,
}

impl TypeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the context a type checker would produce for `program`.
    /// Assumes the program is well-typed; no checking happens here.
    pub fn for_program(program: &Program) -> Self {
        let mut ctx = TypeContext::new();
        for decl in &program.decls {
            match &decl.node {
                Decl::TypeDecl { name, args, value } => match value {
                    Some(rhs) => {
                        ctx.type_synonyms
                            .insert(name.clone(), (args.clone(), rhs.clone()));
                    }
                    None => {
                        ctx.type_constructors.insert(name.clone(), args.len());
                    }
                },
                Decl::ConstDecl(names, ty) => {
                    for n in names {
                        ctx.constants.insert(n.clone(), ty.clone());
                    }
                }
                Decl::FunctionDecl {
                    name,
                    type_args,
                    args,
                    ret,
                    ..
                } => {
                    let arg_types: Vec<Type> =
                        args.iter().map(|(_, t): &FArg| t.clone()).collect();
                    ctx.functions.insert(
                        name.clone(),
                        FunctionSig {
                            type_args: type_args.clone(),
                            args: arg_types,
                            ret: ret.clone(),
                        },
                    );
                }
                Decl::AxiomDecl(_) => {}
                Decl::VarDecl(vars) => {
                    for v in vars {
                        ctx.globals.insert(v.name.clone(), v.ty.clone());
                    }
                }
                Decl::ProcedureDecl {
                    name,
                    type_args,
                    formals,
                    rets,
                    specs,
                    ..
                } => {
                    let modifies = specs
                        .iter()
                        .filter_map(|c| match c {
                            crate::ast::Contract::Modifies(ids) => Some(ids.clone()),
                            _ => None,
                        })
                        .flatten()
                        .collect();
                    ctx.procedures.insert(
                        name.clone(),
                        ProcedureSig {
                            type_args: type_args.clone(),
                            ins: formals.iter().map(|v| (v.name.clone(), v.ty.clone())).collect(),
                            outs: rets.iter().map(|v| (v.name.clone(), v.ty.clone())).collect(),
                            modifies,
                        },
                    );
                }
                Decl::ImplementationDecl { .. } => {}
            }
        }
        ctx
    }

    /// Expand type synonyms at the head of `ty` until a constructor,
    /// builtin, map, or variable remains
    pub fn resolve(&self, ty: &Type) -> Type {
        match ty {
            Type::Ident(name, args) => {
                if let Some((params, rhs)) = self.type_synonyms.get(name) {
                    let mut subst = TypeSubst::default();
                    for (p, a) in params.iter().zip(args) {
                        subst.insert(p.clone(), self.resolve(a));
                    }
                    self.resolve(&type_subst(rhs, &subst))
                } else {
                    ty.clone()
                }
            }
            _ => ty.clone(),
        }
    }

    /// Is `name` declared in one of the local scopes?
    pub fn is_local(&self, name: &str) -> bool {
        self.locals.iter().any(|scope| scope.contains_key(name))
    }

    /// Is `name` a bound type variable in the current scope?
    pub fn is_type_var(&self, name: &str) -> bool {
        self.type_vars.iter().any(|scope| scope.iter().any(|v| v == name))
    }

    /// Is `name` a declared type constructor?
    pub fn is_type_constructor(&self, name: &str) -> bool {
        self.type_constructors.contains_key(name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSig> {
        self.functions.get(name)
    }

    pub fn procedure(&self, name: &str) -> Option<&ProcedureSig> {
        self.procedures.get(name)
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    pub fn global_names(&self) -> impl Iterator<Item = &Id> {
        self.globals.keys()
    }

    /// Register a function signature directly (used for function constants
    /// introduced by bodyless declarations)
    pub fn insert_function(&mut self, name: Id, sig: FunctionSig) {
        self.functions.insert(name, sig);
    }

    /// Register a constant, e.g. the map constant backing a function
    pub fn insert_constant(&mut self, name: Id, ty: Type) {
        self.constants.insert(name, ty);
    }

    /// Enter a local scope with the given bindings
    pub fn push_scope(&mut self, bindings: impl IntoIterator<Item = (Id, Type)>) {
        self.locals.push(bindings.into_iter().collect());
    }

    /// Leave the innermost local scope
    pub fn pop_scope(&mut self) {
        self.locals.pop();
    }

    /// Enter a type-variable scope
    pub fn push_type_vars(&mut self, vars: Vec<Id>) {
        self.type_vars.push(vars);
    }

    /// Leave the innermost type-variable scope
    pub fn pop_type_vars(&mut self) {
        self.type_vars.pop();
    }

    /// The declared type of a name: innermost local scope first, then
    /// globals, then constants
    pub fn var_type(&self, name: &str) -> Option<Type> {
        for scope in self.locals.iter().rev() {
            if let Some(t) = scope.get(name) {
                return Some(t.clone());
            }
        }
        self.globals
            .get(name)
            .or_else(|| self.constants.get(name))
            .cloned()
    }

    /// Synthesize the type of a well-typed expression. Returns `None` for
    /// shapes the checker would have rejected.
    pub fn type_of(&self, expr: &Spanned<Expr>) -> Option<Type> {
        match &expr.node {
            Expr::Bool(_) => Some(Type::Bool),
            Expr::Int(_) => Some(Type::Int),
            Expr::Var(name) => self.var_type(name),
            Expr::Apply(name, args) => {
                let sig = self.functions.get(name)?;
                if sig.type_args.is_empty() {
                    return Some(sig.ret.clone());
                }
                let actual: Option<Vec<Type>> =
                    args.iter().map(|a| self.type_of(a)).collect();
                let subst = unify(&sig.args, &actual?, &sig.type_args)?;
                Some(type_subst(&sig.ret, &subst))
            }
            Expr::MapSelect(map, args) => {
                let map_ty = self.resolve(&self.type_of(map)?);
                let Type::Map(tv, domains, range) = map_ty else {
                    return None;
                };
                if tv.is_empty() {
                    return Some(*range);
                }
                let actual: Option<Vec<Type>> =
                    args.iter().map(|a| self.type_of(a)).collect();
                let subst = unify(&domains, &actual?, &tv)?;
                Some(type_subst(&range, &subst))
            }
            Expr::MapUpdate(map, _, _) => self.type_of(map),
            Expr::Old(e) => self.type_of(e),
            Expr::IfExpr(_, then_e, _) => self.type_of(then_e),
            Expr::Coercion(_, ty) => Some(ty.clone()),
            Expr::UnaryExpr(UnOp::Neg, _) => Some(Type::Int),
            Expr::UnaryExpr(UnOp::Not, _) => Some(Type::Bool),
            Expr::BinaryExpr(op, ..) => match op {
                BinOp::Plus | BinOp::Minus | BinOp::Times | BinOp::Div | BinOp::Mod => {
                    Some(Type::Int)
                }
                _ => Some(Type::Bool),
            },
            Expr::Quantified(QOp::Lambda, ..) => None,
            Expr::Quantified(..) => Some(Type::Bool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::span::Spanned;

    fn int_int_map() -> Type {
        Type::Map(vec![], vec![Type::Int], Box::new(Type::Int))
    }

    #[test]
    fn unify_binds_type_vars() {
        let tvars = vec!["a".to_string()];
        let subst = unify(
            &[Type::named("a"), Type::Int],
            &[Type::Bool, Type::Int],
            &tvars,
        )
        .unwrap();
        assert_eq!(subst.get("a"), Some(&Type::Bool));
    }

    #[test]
    fn unify_rejects_conflicting_bindings() {
        let tvars = vec!["a".to_string()];
        assert!(unify(
            &[Type::named("a"), Type::named("a")],
            &[Type::Bool, Type::Int],
            &tvars,
        )
        .is_none());
    }

    #[test]
    fn polymorphic_select_instantiates_range() {
        // m: <a>[a]a, so m[5] : int
        let mut ctx = TypeContext::new();
        ctx.push_scope([(
            "m".to_string(),
            Type::Map(
                vec!["a".to_string()],
                vec![Type::named("a")],
                Box::new(Type::named("a")),
            ),
        )]);
        let sel = Spanned::dummy(Expr::MapSelect(
            Box::new(Expr::var("m")),
            vec![Expr::int_lit(5)],
        ));
        assert_eq!(ctx.type_of(&sel), Some(Type::Int));
    }

    #[test]
    fn synonyms_resolve_through_layers() {
        let mut ctx = TypeContext::new();
        ctx.type_synonyms
            .insert("Row".to_string(), (vec![], int_int_map()));
        ctx.type_synonyms.insert(
            "Grid".to_string(),
            (
                vec![],
                Type::Map(vec![], vec![Type::Int], Box::new(Type::named("Row"))),
            ),
        );
        let resolved = ctx.resolve(&Type::named("Grid"));
        let Type::Map(_, _, range) = resolved else {
            panic!("expected map");
        };
        assert_eq!(ctx.resolve(&range), int_int_map());
    }

    #[test]
    fn scope_shadowing() {
        let mut ctx = TypeContext::new();
        ctx.globals.insert("x".to_string(), Type::Bool);
        assert_eq!(ctx.var_type("x"), Some(Type::Bool));
        ctx.push_scope([("x".to_string(), Type::Int)]);
        assert_eq!(ctx.var_type("x"), Some(Type::Int));
        ctx.pop_scope();
        assert_eq!(ctx.var_type("x"), Some(Type::Bool));
    }
}
