//! Abstract Syntax Tree for Boogie 2
//!
//! This module defines the AST types consumed by the interpreter.
//! The AST is designed to be:
//! - Complete: represents the Boogie 2 surface the interpreter executes
//! - Span-aware: every node has source location info
//! - Front-end agnostic: produced by an external parser/type checker, or
//!   built programmatically (as the test suites do)

use crate::span::{Span, Spanned};
use num_bigint::BigInt;
use std::fmt;

/// Identifiers are plain interned-by-clone strings
pub type Id = String;

/// A Boogie 2 type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// `bool`
    Bool,
    /// `int`
    Int,
    /// `<a, b>[D1, D2]R` — a logical map with bound type variables,
    /// domain types and a range type
    Map(Vec<Id>, Vec<Type>, Box<Type>),
    /// A named type: a user-declared constructor applied to arguments,
    /// or a type variable when the name is bound by an enclosing scope
    Ident(Id, Vec<Type>),
}

impl Type {
    /// A named nullary type
    pub fn named(name: impl Into<Id>) -> Type {
        Type::Ident(name.into(), Vec::new())
    }

    /// Whether this is a map type
    pub fn is_map(&self) -> bool {
        matches!(self, Type::Map(..))
    }

    /// Free type variables of `self` with respect to `bound`: names in
    /// `bound` that occur as nullary idents inside this type
    pub fn bound_occurrences(&self, bound: &[Id], out: &mut Vec<Id>) {
        match self {
            Type::Bool | Type::Int => {}
            Type::Map(tv, domains, range) => {
                // Inner binders shadow outer ones
                let visible: Vec<Id> = bound
                    .iter()
                    .filter(|v| !tv.contains(v))
                    .cloned()
                    .collect();
                for d in domains {
                    d.bound_occurrences(&visible, out);
                }
                range.bound_occurrences(&visible, out);
            }
            Type::Ident(name, args) => {
                if args.is_empty() && bound.contains(name) && !out.contains(name) {
                    out.push(name.clone());
                }
                for a in args {
                    a.bound_occurrences(bound, out);
                }
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Map(tv, domains, range) => {
                if !tv.is_empty() {
                    write!(f, "<{}>", tv.join(", "))?;
                }
                write!(f, "[")?;
                for (i, d) in domains.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", d)?;
                }
                write!(f, "]{}", range)
            }
            Type::Ident(name, args) => {
                write!(f, "{}", name)?;
                for a in args {
                    write!(f, " {}", a)?;
                }
                Ok(())
            }
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    /// Arithmetic negation `-`
    Neg,
    /// Logical negation `!`
    Not,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Neg => write!(f, "-"),
            UnOp::Not => write!(f, "!"),
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Plus,
    Minus,
    Times,
    /// Euclidean division `div`
    Div,
    /// Euclidean remainder `mod`
    Mod,
    And,
    Or,
    /// `==>`
    Implies,
    /// `<==` (reverse implication)
    Explies,
    /// `<==>`
    Equiv,
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
    /// Partial order `<:` (not executable)
    Lc,
}

impl BinOp {
    /// Binding power for the printer; higher binds tighter
    fn precedence(self) -> u8 {
        use BinOp::*;
        match self {
            Times | Div | Mod => 7,
            Plus | Minus => 6,
            Eq | Neq | Lt | Leq | Gt | Geq | Lc => 4,
            And | Or => 3,
            Implies | Explies => 2,
            Equiv => 1,
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Times => "*",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Implies => "==>",
            BinOp::Explies => "<==",
            BinOp::Equiv => "<==>",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Leq => "<=",
            BinOp::Gt => ">",
            BinOp::Geq => ">=",
            BinOp::Lc => "<:",
        };
        write!(f, "{}", s)
    }
}

/// Quantifier kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QOp {
    Forall,
    Exists,
    /// Lambda abstraction (not executable)
    Lambda,
}

impl fmt::Display for QOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QOp::Forall => write!(f, "forall"),
            QOp::Exists => write!(f, "exists"),
            QOp::Lambda => write!(f, "lambda"),
        }
    }
}

/// Boogie 2 expressions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// `true` or `false`
    Bool(bool),
    /// Integer literal
    Int(BigInt),
    /// Variable or constant reference
    Var(Id),
    /// Function application `f(e1, …, en)`
    Apply(Id, Vec<Spanned<Expr>>),
    /// Map selection `m[e1, …, en]`
    MapSelect(Box<Spanned<Expr>>, Vec<Spanned<Expr>>),
    /// Map update `m[e1, …, en := v]`
    MapUpdate(Box<Spanned<Expr>>, Vec<Spanned<Expr>>, Box<Spanned<Expr>>),
    /// `old(e)` — globals refer to their procedure-entry values inside
    Old(Box<Spanned<Expr>>),
    /// Conditional `if c then t else e`
    IfExpr(
        Box<Spanned<Expr>>,
        Box<Spanned<Expr>>,
        Box<Spanned<Expr>>,
    ),
    /// Type coercion `e : T`
    Coercion(Box<Spanned<Expr>>, Type),
    /// Unary application
    UnaryExpr(UnOp, Box<Spanned<Expr>>),
    /// Binary application
    BinaryExpr(BinOp, Box<Spanned<Expr>>, Box<Spanned<Expr>>),
    /// Quantified expression with bound type variables and bound variables
    Quantified(QOp, Vec<Id>, Vec<(Id, Type)>, Box<Spanned<Expr>>),
}

impl Expr {
    /// Literal `true`/`false` with a dummy span
    pub fn bool_lit(b: bool) -> Spanned<Expr> {
        Spanned::dummy(Expr::Bool(b))
    }

    /// Integer literal with a dummy span
    pub fn int_lit(i: impl Into<BigInt>) -> Spanned<Expr> {
        Spanned::dummy(Expr::Int(i.into()))
    }

    /// Variable reference with a dummy span
    pub fn var(name: impl Into<Id>) -> Spanned<Expr> {
        Spanned::dummy(Expr::Var(name.into()))
    }

    /// Printer precedence; atoms bind tightest
    fn precedence(&self) -> u8 {
        match self {
            Expr::BinaryExpr(op, ..) => op.precedence(),
            Expr::UnaryExpr(..) => 8,
            // Quantifiers print their own parentheses
            Expr::IfExpr(..) => 0,
            _ => 9,
        }
    }
}

/// Print `e`, parenthesized when its precedence is below `min`
fn fmt_prec(e: &Expr, min: u8, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if e.precedence() < min {
        write!(f, "({})", e)
    } else {
        write!(f, "{}", e)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Int(i) => write!(f, "{}", i),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Apply(name, args) => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a.node)?;
                }
                write!(f, ")")
            }
            Expr::MapSelect(m, args) => {
                fmt_prec(&m.node, 9, f)?;
                write!(f, "[")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a.node)?;
                }
                write!(f, "]")
            }
            Expr::MapUpdate(m, args, v) => {
                fmt_prec(&m.node, 9, f)?;
                write!(f, "[")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a.node)?;
                }
                write!(f, " := {}]", v.node)
            }
            Expr::Old(e) => write!(f, "old({})", e.node),
            Expr::IfExpr(c, t, e) => {
                write!(f, "if {} then {} else {}", c.node, t.node, e.node)
            }
            Expr::Coercion(e, ty) => {
                fmt_prec(&e.node, 9, f)?;
                write!(f, " : {}", ty)
            }
            Expr::UnaryExpr(op, e) => {
                write!(f, "{}", op)?;
                fmt_prec(&e.node, 8, f)
            }
            Expr::BinaryExpr(op, l, r) => {
                let p = op.precedence();
                fmt_prec(&l.node, p, f)?;
                write!(f, " {} ", op)?;
                // Right operand needs parens at equal precedence too;
                // comparisons and implications do not chain
                fmt_prec(&r.node, p + 1, f)
            }
            Expr::Quantified(op, tv, vars, body) => {
                write!(f, "({} ", op)?;
                if !tv.is_empty() {
                    write!(f, "<{}> ", tv.join(", "))?;
                }
                for (i, (name, ty)) in vars.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                write!(f, " :: {})", body.node)
            }
        }
    }
}

/// A guard that may be the wildcard `*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WildcardExpr {
    Wildcard,
    Expr(Spanned<Expr>),
}

impl WildcardExpr {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, WildcardExpr::Wildcard)
    }
}

/// The kind of a specification clause, used for failure reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecKind {
    /// An inline `assert`/`assume` statement
    Inline,
    /// Procedure precondition
    Precondition,
    /// Procedure postcondition
    Postcondition,
    /// Loop invariant
    LoopInvariant,
    /// `where` clause of a variable declaration
    Where,
    /// Top-level axiom
    Axiom,
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpecKind::Inline => "assertion",
            SpecKind::Precondition => "precondition",
            SpecKind::Postcondition => "postcondition",
            SpecKind::LoopInvariant => "loop invariant",
            SpecKind::Where => "where clause",
            SpecKind::Axiom => "axiom",
        };
        write!(f, "{}", s)
    }
}

/// A specification clause: free clauses are assumed, checked ones asserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecClause {
    pub kind: SpecKind,
    pub free: bool,
    pub expr: Spanned<Expr>,
}

impl SpecClause {
    pub fn assert(expr: Spanned<Expr>) -> Self {
        SpecClause {
            kind: SpecKind::Inline,
            free: false,
            expr,
        }
    }

    pub fn assume(expr: Spanned<Expr>) -> Self {
        SpecClause {
            kind: SpecKind::Inline,
            free: true,
            expr,
        }
    }
}

/// An assignment target: a variable possibly followed by chains of map
/// indices, e.g. `a[i][j]` has two index tuples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignTarget {
    pub name: Spanned<Id>,
    pub indexes: Vec<Vec<Spanned<Expr>>>,
}

/// Boogie 2 statements, structured and basic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `assert e;` / `assume e;` (and flattener-inserted spec clauses)
    Predicate(SpecClause),
    /// `havoc x, y;`
    Havoc(Vec<Spanned<Id>>),
    /// `x, a[i] := e1, e2;`
    Assign(Vec<AssignTarget>, Vec<Spanned<Expr>>),
    /// `call x, y := p(e1, e2);`
    Call(Vec<Spanned<Id>>, Spanned<Id>, Vec<Spanned<Expr>>),
    /// `if (c) { … } else { … }` — the else block may be absent
    If(WildcardExpr, Block, Option<Block>),
    /// `while (c) invariant …; { … }`
    While(WildcardExpr, Vec<SpecClause>, Block),
    /// `break;` / `break L;`
    Break(Option<Id>),
    /// `return;`
    Return,
    /// `goto L1, …, Ln;`
    Goto(Vec<Id>),
    /// No-op, used for empty branches
    Skip,
}

/// A statement with its (possibly empty) list of leading labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledStatement {
    pub labels: Vec<Id>,
    pub statement: Spanned<Statement>,
}

impl LabeledStatement {
    /// A statement with no labels
    pub fn bare(statement: Spanned<Statement>) -> Self {
        LabeledStatement {
            labels: Vec::new(),
            statement,
        }
    }
}

/// A statement block
pub type Block = Vec<LabeledStatement>;

/// A variable declaration with an optional `where` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTypeWhere {
    pub name: Id,
    pub ty: Type,
    /// `None` means `where true`
    pub where_clause: Option<Spanned<Expr>>,
}

impl IdTypeWhere {
    pub fn plain(name: impl Into<Id>, ty: Type) -> Self {
        IdTypeWhere {
            name: name.into(),
            ty,
            where_clause: None,
        }
    }
}

/// A procedure contract clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contract {
    /// `requires e;` — free when assumed rather than checked at call sites
    Requires(bool, Spanned<Expr>),
    /// `modifies g1, …, gn;`
    Modifies(Vec<Id>),
    /// `ensures e;`
    Ensures(bool, Spanned<Expr>),
}

/// A function signature formal: Boogie allows unnamed formals
pub type FArg = (Option<Id>, Type);

/// Top-level declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decl {
    /// `type T a1 … an;` or `type T = …;`
    TypeDecl {
        name: Id,
        args: Vec<Id>,
        /// Synonym right-hand side, when present
        value: Option<Type>,
    },
    /// `const c1, c2: T;`
    ConstDecl(Vec<Id>, Type),
    /// `function f<a>(x: T) returns (R) { body }`
    FunctionDecl {
        name: Id,
        type_args: Vec<Id>,
        args: Vec<FArg>,
        ret: Type,
        body: Option<Spanned<Expr>>,
    },
    /// `axiom e;`
    AxiomDecl(Spanned<Expr>),
    /// `var g: T where e;`
    VarDecl(Vec<IdTypeWhere>),
    /// `procedure p(…) returns (…) spec { body }`
    ProcedureDecl {
        name: Id,
        type_args: Vec<Id>,
        formals: Vec<IdTypeWhere>,
        rets: Vec<IdTypeWhere>,
        specs: Vec<Contract>,
        body: Option<(Vec<IdTypeWhere>, Block)>,
    },
    /// `implementation p(…) returns (…) { body }` — may carry several bodies
    ImplementationDecl {
        name: Id,
        type_args: Vec<Id>,
        formals: Vec<(Id, Type)>,
        rets: Vec<(Id, Type)>,
        bodies: Vec<(Vec<IdTypeWhere>, Block)>,
    },
}

/// A type-checked program is a list of declarations
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub decls: Vec<Spanned<Decl>>,
}

impl Program {
    pub fn new(decls: Vec<Spanned<Decl>>) -> Self {
        Program { decls }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(op: BinOp, l: Spanned<Expr>, r: Spanned<Expr>) -> Spanned<Expr> {
        Spanned::dummy(Expr::BinaryExpr(op, Box::new(l), Box::new(r)))
    }

    #[test]
    fn display_flat_comparison() {
        let e = bin(BinOp::Eq, Expr::int_lit(1), Expr::int_lit(2));
        assert_eq!(e.node.to_string(), "1 == 2");
    }

    #[test]
    fn display_nested_precedence() {
        // (a + b) * c keeps its parens, a + b * c does not gain any
        let sum = bin(BinOp::Plus, Expr::var("a"), Expr::var("b"));
        let prod = bin(BinOp::Times, sum.clone(), Expr::var("c"));
        assert_eq!(prod.node.to_string(), "(a + b) * c");

        let prod2 = bin(BinOp::Times, Expr::var("b"), Expr::var("c"));
        let sum2 = bin(BinOp::Plus, Expr::var("a"), prod2);
        assert_eq!(sum2.node.to_string(), "a + b * c");
    }

    #[test]
    fn display_map_select_and_update() {
        let sel = Spanned::dummy(Expr::MapSelect(
            Box::new(Expr::var("m")),
            vec![Expr::int_lit(0), Expr::var("k")],
        ));
        assert_eq!(sel.node.to_string(), "m[0, k]");

        let upd = Spanned::dummy(Expr::MapUpdate(
            Box::new(Expr::var("m")),
            vec![Expr::int_lit(0)],
            Box::new(Expr::int_lit(5)),
        ));
        assert_eq!(upd.node.to_string(), "m[0 := 5]");
    }

    #[test]
    fn display_quantified() {
        let body = bin(BinOp::Geq, Expr::var("i"), Expr::int_lit(0));
        let q = Expr::Quantified(
            QOp::Forall,
            vec![],
            vec![("i".to_string(), Type::Int)],
            Box::new(body),
        );
        assert_eq!(q.to_string(), "(forall i: int :: i >= 0)");
    }

    #[test]
    fn display_map_type() {
        let t = Type::Map(
            vec!["a".to_string()],
            vec![Type::named("a")],
            Box::new(Type::Int),
        );
        assert_eq!(t.to_string(), "<a>[a]int");
    }

    #[test]
    fn bound_occurrences_respects_shadowing() {
        // <a>[a]b with bound = [a, b]: only b is free in the binder's scope
        let t = Type::Map(
            vec!["a".to_string()],
            vec![Type::named("a")],
            Box::new(Type::named("b")),
        );
        let mut out = Vec::new();
        t.bound_occurrences(&["a".to_string(), "b".to_string()], &mut out);
        assert_eq!(out, vec!["b".to_string()]);
    }
}
