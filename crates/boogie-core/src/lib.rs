//! boogie-core - Boogie 2 program representation
//!
//! This crate provides:
//! - **AST**: span-aware representation of Boogie 2 types, expressions,
//!   statements, and declarations
//! - **Type context**: the signatures and variable types the external
//!   type checker hands to the interpreter, with type unification
//! - **Flattening**: structured bodies lowered to labeled basic blocks
//! - **Normal forms**: negation-prenex rewriting for the quantifier engine
//!
//! Parsing and type checking happen upstream; programs reach this crate
//! already checked, either from a front end or built programmatically.

pub mod ast;
pub mod ctx;
pub mod flatten;
pub mod normal_form;
pub mod span;

pub use ast::{
    AssignTarget, BinOp, Block, Contract, Decl, Expr, FArg, Id, IdTypeWhere,
    LabeledStatement, Program, QOp, SpecClause, SpecKind, Statement, Type, UnOp,
    WildcardExpr,
};
pub use ctx::{unify, type_subst, FunctionSig, ProcedureSig, TypeContext, TypeSubst};
pub use flatten::{flatten, BasicBlocks, ENTRY_LABEL};
pub use normal_form::{negation_nf, normalize, prenex_nf, rename_vars};
pub use span::{FileId, Span, Spanned};
