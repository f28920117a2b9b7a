//! Statement AST nodes

use super::{Expr, VarDecl};
use crate::lexer::Span;

/// A statement with its source location
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

/// The kind of statement
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `{ ... }`
    Compound(Vec<Stmt>),
    /// `if cond stmt (else stmt)?`
    Cond {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    /// `return;`: leave the handler early without consuming the request
    Return,
    /// `var name = expr;` inside a handler body
    Var(VarDecl),
    /// An expression evaluated for its effect
    Expr(Expr),
}
