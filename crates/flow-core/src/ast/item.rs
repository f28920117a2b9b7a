//! Top-level items of a Flow compilation unit

use super::{Expr, Ident, Spanned, Stmt};
use crate::lexer::Span;

/// A complete source file: imports, global variables, and handlers
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    /// Plugin imports, in source order
    pub imports: Vec<Import>,
    /// Global variable declarations, in source order
    pub vars: Vec<VarDecl>,
    /// Handler declarations, in source order
    pub handlers: Vec<HandlerDecl>,
}

impl Unit {
    /// Returns true if the unit declares nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.vars.is_empty() && self.handlers.is_empty()
    }

    /// Find a handler declaration by name
    #[must_use]
    pub fn find_handler(&self, name: &str) -> Option<&HandlerDecl> {
        self.handlers.iter().find(|h| h.name.name == name)
    }
}

/// `import name;` or `import name from "path";`
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub name: Ident,
    pub path: Option<String>,
    pub span: Span,
}

impl Spanned for Import {
    fn span(&self) -> Span {
        self.span
    }
}

/// `var name = expr;`: global at unit scope, local inside a handler
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: Ident,
    pub value: Expr,
    pub span: Span,
}

impl Spanned for VarDecl {
    fn span(&self) -> Span {
        self.span
    }
}

/// `handler name { ... }`: compiles to a native function taking the
/// opaque request context and returning the consumed flag
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerDecl {
    pub name: Ident,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl Spanned for HandlerDecl {
    fn span(&self) -> Span {
        self.span
    }
}
