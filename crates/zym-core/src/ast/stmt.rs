//! Statement AST nodes

use std::rc::Rc;

use crate::config::TcoMode;
use crate::lexer::Span;
use crate::object::Qualifier;

use super::{Block, Expr, Ident, Spanned};

/// A statement with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    #[must_use]
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

impl Spanned for Stmt {
    fn span(&self) -> Span {
        self.span
    }
}

/// One binding of a `var` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct VarBinding {
    pub name: Ident,
    pub init: Option<Expr>,
}

/// A function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub qualifier: Qualifier,
}

/// A named or anonymous function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Option<Ident>,
    pub params: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

impl FunctionDecl {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn qualifiers(&self) -> Vec<Qualifier> {
        self.params.iter().map(|p| p.qualifier).collect()
    }
}

/// The kind of statement
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `var a = 1, b;`
    Var(Vec<VarBinding>),

    /// `ref r = target;`
    Ref { name: Ident, target: Expr },

    /// `slot s = target;` declares a slot, or rebinds `s` when it already is one
    Slot { name: Ident, target: Expr },

    Function(Rc<FunctionDecl>),

    /// `struct Name { a, b }`
    Struct { name: Ident, fields: Vec<Ident> },

    /// `enum Name { A, B }`
    Enum { name: Ident, variants: Vec<Ident> },

    /// `@tco mode`
    Tco(TcoMode),

    Block(Block),

    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    While {
        cond: Expr,
        body: Box<Stmt>,
    },

    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },

    /// C-style `for (init; cond; step) body`
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },

    Break,
    Continue,
    Return(Option<Expr>),

    Goto(Ident),

    /// `name:`
    Label(Ident),

    Expr(Expr),
}
