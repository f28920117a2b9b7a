//! Parser for the Flow configuration language
//!
//! A hand-written recursive descent parser producing the AST the code
//! generator consumes. Errors are collected rather than aborting, so a
//! single parse surfaces every syntax problem in the unit.
//!
//! # Example
//!
//! ```
//! use flow_core::parser::Parser;
//!
//! let unit = Parser::parse_unit("handler main { deny; }").unwrap();
//! assert_eq!(unit.handlers.len(), 1);
//! ```

mod error;

pub use error::{ParseError, ParseErrorKind};

use std::net::IpAddr;
use std::str::FromStr;

use crate::ast::{
    BinOp, Expr, ExprKind, HandlerDecl, Ident, Import, Stmt, StmtKind, UnaryOp, Unit, VarDecl,
};
use crate::lexer::{self, Lexer, Span, Token, TokenKind};

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// The Flow parser
pub struct Parser {
    /// All tokens from the source
    tokens: Vec<Token>,
    /// Current position in the token stream
    position: usize,
    /// Collected parse errors
    errors: Vec<ParseError>,
}

impl Parser {
    /// Create a new parser from source code
    #[must_use]
    pub fn new(source: &str) -> Self {
        let (tokens, lex_errors) = Lexer::tokenize(source);
        let errors = lex_errors
            .into_iter()
            .map(|e| ParseError::new(ParseErrorKind::UnexpectedChar, e.span))
            .collect();
        Self {
            tokens,
            position: 0,
            errors,
        }
    }

    /// Parse an entire compilation unit (source file)
    pub fn parse_unit(source: &str) -> Result<Unit, Vec<ParseError>> {
        let mut parser = Parser::new(source);
        let unit = parser.unit();
        if parser.errors.is_empty() {
            Ok(unit)
        } else {
            Err(parser.errors)
        }
    }

    /// Parse a single expression (useful for tests and tooling)
    pub fn parse_expression(source: &str) -> Result<Expr, Vec<ParseError>> {
        let mut parser = Parser::new(source);
        match parser.expression() {
            Ok(expr) if parser.errors.is_empty() => Ok(expr),
            Ok(_) => Err(parser.errors),
            Err(e) => {
                parser.errors.push(e);
                Err(parser.errors)
            }
        }
    }

    // ========== Token stream helpers ==========

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn eof_span(&self) -> Span {
        self.tokens.last().map_or(Span::new(0, 0), |t| t.span)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> ParseResult<Token> {
        match self.peek() {
            Some(t) if t.kind == kind => Ok(self.advance().unwrap_or_else(|| unreachable!())),
            Some(t) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    found: t.kind,
                    expected,
                },
                t.span,
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof(expected),
                self.eof_span(),
            )),
        }
    }

    /// Skip forward to a plausible declaration or statement boundary
    fn synchronize(&mut self) {
        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Semicolon => {
                    self.position += 1;
                    return;
                }
                TokenKind::RBrace
                | TokenKind::Handler
                | TokenKind::Var
                | TokenKind::Import => return,
                _ => self.position += 1,
            }
        }
    }

    // ========== Declarations ==========

    fn unit(&mut self) -> Unit {
        let mut unit = Unit {
            imports: Vec::new(),
            vars: Vec::new(),
            handlers: Vec::new(),
        };

        while let Some(kind) = self.peek_kind() {
            let result = match kind {
                TokenKind::Import => self.import_decl().map(|i| unit.imports.push(i)),
                TokenKind::Var => self.var_decl().map(|v| unit.vars.push(v)),
                TokenKind::Handler => self.handler_decl().map(|h| unit.handlers.push(h)),
                _ => {
                    let span = self.peek().map_or(Span::new(0, 0), |t| t.span);
                    Err(ParseError::new(ParseErrorKind::ExpectedDeclaration, span))
                }
            };
            if let Err(e) = result {
                self.errors.push(e);
                self.synchronize();
            }
        }

        unit
    }

    fn import_decl(&mut self) -> ParseResult<Import> {
        let start = self.expect(TokenKind::Import, "'import'")?.span;
        let name = self.identifier()?;
        let path = if self.eat(TokenKind::From) {
            let token = self.expect(TokenKind::Str, "import path string")?;
            Some(string_value(&token))
        } else {
            None
        };
        let end = self.expect(TokenKind::Semicolon, "';'")?.span;
        Ok(Import {
            name,
            path,
            span: start.merge(end),
        })
    }

    fn var_decl(&mut self) -> ParseResult<VarDecl> {
        let start = self.expect(TokenKind::Var, "'var'")?.span;
        let name = self.identifier()?;
        self.expect(TokenKind::Eq, "'='")?;
        let value = self.expression()?;
        let end = self.expect(TokenKind::Semicolon, "';'")?.span;
        Ok(VarDecl {
            name,
            value,
            span: start.merge(end),
        })
    }

    fn handler_decl(&mut self) -> ParseResult<HandlerDecl> {
        let start = self.expect(TokenKind::Handler, "'handler'")?.span;
        let name = self.identifier()?;
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.peek().is_none() {
                return Err(ParseError::new(
                    ParseErrorKind::UnexpectedEof("'}'"),
                    self.eof_span(),
                ));
            }
            match self.statement() {
                Ok(stmt) => body.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize();
                }
            }
        }
        let end = self.expect(TokenKind::RBrace, "'}'")?.span;
        Ok(HandlerDecl {
            name,
            body,
            span: start.merge(end),
        })
    }

    fn identifier(&mut self) -> ParseResult<Ident> {
        let token = self.expect(TokenKind::Ident, "identifier")?;
        Ok(Ident::new(token.lexeme, token.span))
    }

    // ========== Statements ==========

    fn statement(&mut self) -> ParseResult<Stmt> {
        match self.peek_kind() {
            Some(TokenKind::LBrace) => self.compound_stmt(),
            Some(TokenKind::If) => self.cond_stmt(),
            Some(TokenKind::Return) => {
                let start = self.advance().unwrap_or_else(|| unreachable!()).span;
                let end = self.expect(TokenKind::Semicolon, "';'")?.span;
                Ok(Stmt::new(StmtKind::Return, start.merge(end)))
            }
            Some(TokenKind::Var) => {
                let decl = self.var_decl()?;
                let span = decl.span;
                Ok(Stmt::new(StmtKind::Var(decl), span))
            }
            Some(_) => {
                let expr = self.expression()?;
                let start = expr.span;
                let end = self.expect(TokenKind::Semicolon, "';'")?.span;
                Ok(Stmt::new(StmtKind::Expr(expr), start.merge(end)))
            }
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof("statement"),
                self.eof_span(),
            )),
        }
    }

    fn compound_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.expect(TokenKind::LBrace, "'{'")?.span;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.peek().is_none() {
                return Err(ParseError::new(
                    ParseErrorKind::UnexpectedEof("'}'"),
                    self.eof_span(),
                ));
            }
            stmts.push(self.statement()?);
        }
        let end = self.expect(TokenKind::RBrace, "'}'")?.span;
        Ok(Stmt::new(StmtKind::Compound(stmts), start.merge(end)))
    }

    fn cond_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.expect(TokenKind::If, "'if'")?.span;
        let condition = self.expression()?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.eat(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        let end = else_branch
            .as_deref()
            .map_or(then_branch.span, |s| s.span);
        Ok(Stmt::new(
            StmtKind::Cond {
                condition,
                then_branch,
                else_branch,
            },
            start.merge(end),
        ))
    }

    // ========== Expressions ==========

    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    /// `=` is right-associative and has the lowest precedence
    fn assignment(&mut self) -> ParseResult<Expr> {
        let left = self.or_expr()?;
        if self.eat(TokenKind::Eq) {
            let right = self.assignment()?;
            let span = left.span.merge(right.span);
            return Ok(Expr::new(
                ExprKind::Binary {
                    op: BinOp::Assign,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            ));
        }
        Ok(left)
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.xor_expr()?;
        while self.eat(TokenKind::PipePipe) {
            let right = self.xor_expr()?;
            left = binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn xor_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(TokenKind::Xor) {
            let right = self.and_expr()?;
            left = binary(BinOp::Xor, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.rel_expr()?;
        while self.eat(TokenKind::AmpAmp) {
            let right = self.rel_expr()?;
            left = binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    /// Relational and match operators are non-associative: at most one
    /// per chain
    fn rel_expr(&mut self) -> ParseResult<Expr> {
        let left = self.add_expr()?;
        let op = match self.peek_kind() {
            Some(TokenKind::EqEq) => BinOp::Eq,
            Some(TokenKind::BangEq) => BinOp::Ne,
            Some(TokenKind::Lt) => BinOp::Lt,
            Some(TokenKind::Gt) => BinOp::Gt,
            Some(TokenKind::LtEq) => BinOp::Le,
            Some(TokenKind::GtEq) => BinOp::Ge,
            Some(TokenKind::PrefixMatch) => BinOp::PrefixMatch,
            Some(TokenKind::SuffixMatch) => BinOp::SuffixMatch,
            Some(TokenKind::RegexMatch) => BinOp::RegexMatch,
            Some(TokenKind::In) => BinOp::In,
            _ => return Ok(left),
        };
        self.position += 1;
        let right = self.add_expr()?;
        Ok(binary(op, left, right))
    }

    fn add_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.mul_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.mul_expr()?;
            left = binary(op, left, right);
        }
    }

    fn mul_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.pow_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.pow_expr()?;
            left = binary(op, left, right);
        }
    }

    /// `**` is right-associative
    fn pow_expr(&mut self) -> ParseResult<Expr> {
        let left = self.unary()?;
        if self.eat(TokenKind::StarStar) {
            let right = self.pow_expr()?;
            return Ok(binary(BinOp::Pow, left, right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek_kind() {
            Some(TokenKind::Bang) => UnaryOp::Not,
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Plus) => UnaryOp::Plus,
            _ => return self.postfix(),
        };
        let start = self.advance().unwrap_or_else(|| unreachable!()).span;
        let operand = self.unary()?;
        let span = start.merge(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let primary = self.primary()?;
        if let ExprKind::Ident(name) = &primary.kind {
            if self.check(TokenKind::LParen) {
                let callee = name.clone();
                self.position += 1;
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect(TokenKind::RParen, "')'")?.span;
                let span = primary.span.merge(end);
                return Ok(Expr::new(ExprKind::Call { callee, args }, span));
            }
        }
        Ok(primary)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let Some(token) = self.advance() else {
            return Err(ParseError::new(
                ParseErrorKind::ExpectedExpression,
                self.eof_span(),
            ));
        };
        let span = token.span;
        match token.kind {
            TokenKind::Number => {
                let digits: String = token.lexeme.chars().filter(|c| *c != '_').collect();
                let value = i64::from_str(&digits).map_err(|_| {
                    ParseError::new(ParseErrorKind::InvalidNumber(token.lexeme.clone()), span)
                })?;
                Ok(Expr::new(ExprKind::Number(value), span))
            }
            TokenKind::True => Ok(Expr::new(ExprKind::Bool(true), span)),
            TokenKind::False => Ok(Expr::new(ExprKind::Bool(false), span)),
            TokenKind::Str => Ok(Expr::new(ExprKind::Str(string_value(&token)), span)),
            TokenKind::Regex => {
                let body = &token.lexeme[1..token.lexeme.len() - 1];
                Ok(Expr::new(ExprKind::Regex(body.to_string()), span))
            }
            TokenKind::Ipv4 | TokenKind::Ipv6 => {
                let addr = IpAddr::from_str(&token.lexeme).map_err(|_| {
                    ParseError::new(ParseErrorKind::InvalidIp(token.lexeme.clone()), span)
                })?;
                Ok(Expr::new(ExprKind::Ip(addr), span))
            }
            TokenKind::Ident => Ok(Expr::new(ExprKind::Ident(token.lexeme), span)),
            TokenKind::LBracket => {
                let mut elements = Vec::new();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        elements.push(self.expression()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect(TokenKind::RBracket, "']'")?.span;
                Ok(Expr::new(ExprKind::List(elements), span.merge(end)))
            }
            TokenKind::LParen => {
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            found => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    found,
                    expected: "expression",
                },
                span,
            )),
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn string_value(token: &Token) -> String {
    let body = &token.lexeme[1..token.lexeme.len() - 1];
    lexer::unescape(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unit_structure() {
        let source = r#"
            import director from "plugins/director";
            var limit = 100;

            handler main {
                deny;
            }
        "#;
        let unit = Parser::parse_unit(source).unwrap();
        assert_eq!(unit.imports.len(), 1);
        assert_eq!(unit.imports[0].name.name, "director");
        assert_eq!(unit.imports[0].path.as_deref(), Some("plugins/director"));
        assert_eq!(unit.vars.len(), 1);
        assert_eq!(unit.handlers.len(), 1);
        assert!(unit.find_handler("main").is_some());
    }

    #[test]
    fn precedence_mul_over_add() {
        let expr = Parser::parse_expression("1 + 2 * 3").unwrap();
        let ExprKind::Binary { op: BinOp::Add, right, .. } = expr.kind else {
            panic!("expected addition at the root");
        };
        assert!(matches!(
            right.kind,
            ExprKind::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn pow_is_right_associative() {
        let expr = Parser::parse_expression("2 ** 3 ** 2").unwrap();
        let ExprKind::Binary { op: BinOp::Pow, right, .. } = expr.kind else {
            panic!("expected pow at the root");
        };
        assert!(matches!(
            right.kind,
            ExprKind::Binary { op: BinOp::Pow, .. }
        ));
    }

    #[test]
    fn or_binds_looser_than_and() {
        let expr = Parser::parse_expression("a && b || c").unwrap();
        assert!(matches!(
            expr.kind,
            ExprKind::Binary { op: BinOp::Or, .. }
        ));
    }

    #[test]
    fn match_operators_parse() {
        for source in ["a =^ 'p'", "a =$ 'q'", "a =~ /x/", "42 in [1, 42]"] {
            assert!(Parser::parse_expression(source).is_ok(), "{source}");
        }
    }

    #[test]
    fn if_else_and_return() {
        let unit = Parser::parse_unit(
            "handler main { if req.path =^ '/private/' { deny; } else return; }",
        )
        .unwrap();
        let body = &unit.handlers[0].body;
        assert_eq!(body.len(), 1);
        let StmtKind::Cond { else_branch, .. } = &body[0].kind else {
            panic!("expected a conditional");
        };
        assert!(matches!(
            else_branch.as_deref().map(|s| &s.kind),
            Some(StmtKind::Return)
        ));
    }

    #[test]
    fn call_with_arguments() {
        let expr = Parser::parse_expression("balance('backend', 1 + 2)").unwrap();
        let ExprKind::Call { callee, args } = expr.kind else {
            panic!("expected a call");
        };
        assert_eq!(callee, "balance");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn ip_literals_validate() {
        assert!(Parser::parse_expression("10.0.0.1").is_ok());
        assert!(Parser::parse_expression("2001:db8::1").is_ok());
        assert!(Parser::parse_expression("999.0.0.1").is_err());
    }

    #[test]
    fn errors_are_collected_across_statements() {
        let errs = Parser::parse_unit("handler a { 1 + ; } handler b { var = 2; }").unwrap_err();
        assert!(errs.len() >= 2);
    }

    #[test]
    fn missing_semicolon_reports() {
        let errs = Parser::parse_unit("handler main { deny }").unwrap_err();
        assert!(!errs.is_empty());
    }
}
