//! Expression AST nodes

use std::rc::Rc;

use crate::lexer::Span;

use super::{FunctionDecl, Ident, Spanned};

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    /// Short-circuit `&&` / `and`
    And,
    /// Short-circuit `||` / `or`
    Or,

    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    /// Returns the precedence of the operator (higher = binds tighter)
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::BitOr => 3,
            BinOp::BitXor => 4,
            BinOp::BitAnd => 5,
            BinOp::Eq | BinOp::Ne => 6,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 7,
            BinOp::Shl | BinOp::Shr => 8,
            BinOp::Add | BinOp::Sub => 9,
            BinOp::Mul | BinOp::Div | BinOp::Mod => 10,
        }
    }

    /// Returns the operator's string representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }

    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
    /// Logical not (!)
    Not,
    /// Bitwise not (~)
    BitNot,
}

/// Prefix qualifiers usable in expression position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprQualifier {
    Ref,
    Val,
    Clone,
}

impl ExprQualifier {
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            ExprQualifier::Ref => "ref",
            ExprQualifier::Val => "val",
            ExprQualifier::Clone => "clone",
        }
    }
}

/// Field initializers of a struct literal
#[derive(Debug, Clone, PartialEq)]
pub enum StructFields {
    /// `Point { 1, 2 }`
    Positional(Vec<Expr>),
    /// `Point { x: 1, y: 2 }`
    Named(Vec<(Ident, Expr)>),
}

/// An expression with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Whether the expression names a storage location
    #[must_use]
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Ident(_) | ExprKind::Index { .. } | ExprKind::Field { .. }
        )
    }

    /// Whether evaluating the expression may call user code
    #[must_use]
    pub fn contains_call(&self) -> bool {
        match &self.kind {
            ExprKind::Call { .. } => true,
            ExprKind::Number(_)
            | ExprKind::String(_)
            | ExprKind::Bool(_)
            | ExprKind::Null
            | ExprKind::Ident(_)
            | ExprKind::Function(_) => false,
            ExprKind::Binary { lhs, rhs, .. } => lhs.contains_call() || rhs.contains_call(),
            ExprKind::Unary { operand, .. } => operand.contains_call(),
            ExprKind::Assign { target, value, .. } => {
                target.contains_call() || value.contains_call()
            }
            ExprKind::Index { object, index } => object.contains_call() || index.contains_call(),
            ExprKind::Field { object, .. } => object.contains_call(),
            ExprKind::List(items) => items.iter().any(Expr::contains_call),
            ExprKind::Map(entries) => entries.iter().any(|(_, v)| v.contains_call()),
            ExprKind::Struct { fields, .. } => match fields {
                StructFields::Positional(values) => values.iter().any(Expr::contains_call),
                StructFields::Named(values) => values.iter().any(|(_, v)| v.contains_call()),
            },
            ExprKind::Qualified { expr, .. } => expr.contains_call(),
        }
    }

    /// Whether the identifier `name` appears anywhere in the expression
    #[must_use]
    pub fn mentions(&self, name: &str) -> bool {
        match &self.kind {
            ExprKind::Ident(ident) => ident.name == name,
            ExprKind::Number(_) | ExprKind::String(_) | ExprKind::Bool(_) | ExprKind::Null => {
                false
            }
            // A closure may capture the name and observe it later
            ExprKind::Function(_) => true,
            ExprKind::Binary { lhs, rhs, .. } => lhs.mentions(name) || rhs.mentions(name),
            ExprKind::Unary { operand, .. } => operand.mentions(name),
            ExprKind::Assign { target, value, .. } => target.mentions(name) || value.mentions(name),
            ExprKind::Call { callee, args } => {
                callee.mentions(name) || args.iter().any(|a| a.mentions(name))
            }
            ExprKind::Index { object, index } => object.mentions(name) || index.mentions(name),
            ExprKind::Field { object, .. } => object.mentions(name),
            ExprKind::List(items) => items.iter().any(|e| e.mentions(name)),
            ExprKind::Map(entries) => entries.iter().any(|(_, v)| v.mentions(name)),
            ExprKind::Struct { fields, .. } => match fields {
                StructFields::Positional(values) => values.iter().any(|e| e.mentions(name)),
                StructFields::Named(values) => values.iter().any(|(_, v)| v.mentions(name)),
            },
            ExprKind::Qualified { expr, .. } => expr.mentions(name),
        }
    }
}

impl Spanned for Expr {
    fn span(&self) -> Span {
        self.span
    }
}

/// The kind of expression
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    String(String),
    Bool(bool),
    Null,

    Ident(Ident),

    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    /// `target = value`, or `target op= value` when `op` is set
    Assign {
        target: Box<Expr>,
        op: Option<BinOp>,
        value: Box<Expr>,
    },

    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },

    /// `object[index]`
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },

    /// `object.field`; also `Enum.Variant`
    Field {
        object: Box<Expr>,
        field: Ident,
    },

    List(Vec<Expr>),

    /// `{ key: value }` with string keys
    Map(Vec<(String, Expr)>),

    Struct {
        name: Ident,
        fields: StructFields,
    },

    /// `ref e`, `val e`, `clone e`
    Qualified {
        qualifier: ExprQualifier,
        expr: Box<Expr>,
    },

    /// Anonymous function
    Function(Rc<FunctionDecl>),
}
