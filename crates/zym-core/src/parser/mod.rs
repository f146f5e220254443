//! Parser for the Zym language
//!
//! A recursive-descent statement parser with precedence climbing for binary
//! operators. Struct names are collected in a pre-pass over the tokens so
//! `Name { ... }` can be told apart from a name followed by a block.
//!
//! ```
//! use zym_core::parser::Parser;
//!
//! let program = Parser::parse_program("func add(a, b) { return a + b }").unwrap();
//! assert_eq!(program.stmts.len(), 1);
//! ```

mod error;

pub use error::{ParseError, ParseErrorKind};

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{
    BinOp, Block, Expr, ExprKind, ExprQualifier, FunctionDecl, Ident, Param, Program, Stmt,
    StmtKind, StructFields, UnaryOp, VarBinding,
};
use crate::config::TcoMode;
use crate::lexer::{unescape, Lexer, Span, Token, TokenKind};
use crate::object::Qualifier;

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// The Zym parser
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    errors: Vec<ParseError>,
    struct_names: HashSet<String>,
}

impl Parser {
    #[must_use]
    pub fn new(source: &str) -> Self {
        let (tokens, lex_errors) = Lexer::tokenize(source);
        let errors = lex_errors
            .into_iter()
            .map(|e| ParseError::new(ParseErrorKind::Lex(e.error), e.span))
            .collect();
        let struct_names = tokens
            .windows(2)
            .filter(|w| w[0].kind == TokenKind::Struct && w[1].kind == TokenKind::Ident)
            .map(|w| w[1].lexeme.clone())
            .collect();
        // Error tokens were already reported by the lexer
        let tokens = tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Error)
            .collect();
        Self {
            tokens,
            position: 0,
            errors,
            struct_names,
        }
    }

    /// Parse a whole program
    pub fn parse_program(source: &str) -> Result<Program, Vec<ParseError>> {
        let mut parser = Parser::new(source);
        let program = parser.program();
        if parser.errors.is_empty() {
            Ok(program)
        } else {
            Err(parser.errors)
        }
    }

    /// Parse a single expression
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

    // ==================== Token Management ====================

    fn current(&self) -> &Token {
        // The stream always ends with Eof and the parser never moves past it
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> TokenKind {
        self.current().kind
    }

    fn peek_kind(&self, distance: usize) -> TokenKind {
        self.tokens
            .get(self.position + distance)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn is_eof(&self) -> bool {
        self.current_kind() == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if !self.is_eof() {
            self.position += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    found: self.current_kind(),
                    expected,
                },
                self.current().span,
            ))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<Ident> {
        let token = self.current().clone();
        if token.kind == TokenKind::Ident {
            self.advance();
            Ok(Ident::new(token.lexeme, token.span))
        } else {
            Err(ParseError::new(
                ParseErrorKind::ExpectedIdentifier(token.kind),
                token.span,
            ))
        }
    }

    fn previous_end(&self) -> u32 {
        self.position
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(0, |t| t.span.end)
    }

    fn span_from(&self, start: u32) -> Span {
        Span::new(start, self.previous_end().max(start))
    }

    /// Skip to a likely statement boundary after an error
    fn synchronize(&mut self) {
        let start = self.position;
        while !self.is_eof() {
            if self.eat(TokenKind::Semicolon).is_some() {
                return;
            }
            let at_boundary = matches!(
                self.current_kind(),
                TokenKind::Var
                    | TokenKind::Func
                    | TokenKind::Struct
                    | TokenKind::Enum
                    | TokenKind::If
                    | TokenKind::While
                    | TokenKind::Do
                    | TokenKind::For
                    | TokenKind::Return
                    | TokenKind::Goto
                    | TokenKind::RBrace
            );
            if at_boundary && self.position != start {
                return;
            }
            self.advance();
        }
    }

    // ==================== Statements ====================

    fn program(&mut self) -> Program {
        let mut stmts = Vec::new();
        while !self.is_eof() {
            self.statement_into(&mut stmts);
        }
        Program { stmts }
    }

    fn statement_into(&mut self, stmts: &mut Vec<Stmt>) {
        let before = self.position;
        match self.statement() {
            Ok(stmt) => stmts.push(stmt),
            Err(e) => {
                self.errors.push(e);
                self.synchronize();
                if self.position == before {
                    self.advance();
                }
            }
        }
    }

    fn block(&mut self) -> ParseResult<Block> {
        let open = self.expect(TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            self.statement_into(&mut stmts);
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Block::new(stmts, self.span_from(open.span.start)))
    }

    fn end_statement(&mut self) {
        self.eat(TokenKind::Semicolon);
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let start = self.current().span.start;
        let kind = match self.current_kind() {
            TokenKind::Semicolon => {
                self.advance();
                StmtKind::Block(Block::new(Vec::new(), self.span_from(start)))
            }
            TokenKind::LBrace => StmtKind::Block(self.block()?),
            TokenKind::Var => self.var_decl()?,
            TokenKind::Ref if self.is_binding_declaration() => {
                self.advance();
                let (name, target) = self.binding_target()?;
                StmtKind::Ref { name, target }
            }
            TokenKind::Slot if self.is_binding_declaration() => {
                self.advance();
                let (name, target) = self.binding_target()?;
                StmtKind::Slot { name, target }
            }
            TokenKind::Val | TokenKind::Clone if self.is_binding_declaration() => {
                let keyword = if self.check(TokenKind::Val) { "val" } else { "clone" };
                return Err(ParseError::new(
                    ParseErrorKind::MisplacedQualifier(keyword),
                    self.current().span,
                ));
            }
            TokenKind::Func if self.peek_kind(1) == TokenKind::Ident => {
                StmtKind::Function(Rc::new(self.function()?))
            }
            TokenKind::Struct => self.struct_decl()?,
            TokenKind::Enum => self.enum_decl()?,
            TokenKind::TcoDirective => {
                self.advance();
                let mode = self.expect_ident()?;
                self.end_statement();
                let parsed = mode.name.parse::<TcoMode>().map_err(|_| {
                    ParseError::new(ParseErrorKind::InvalidTcoMode(mode.name.clone()), mode.span)
                })?;
                StmtKind::Tco(parsed)
            }
            TokenKind::If => self.if_stmt()?,
            TokenKind::While => {
                self.advance();
                let cond = self.paren_expr()?;
                let body = Box::new(self.statement()?);
                StmtKind::While { cond, body }
            }
            TokenKind::Do => {
                self.advance();
                let body = Box::new(self.statement()?);
                self.expect(TokenKind::While, "'while' after do body")?;
                let cond = self.paren_expr()?;
                self.end_statement();
                StmtKind::DoWhile { body, cond }
            }
            TokenKind::For => self.for_stmt()?,
            TokenKind::Break => {
                self.advance();
                self.end_statement();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                self.end_statement();
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                let value = if matches!(
                    self.current_kind(),
                    TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement();
                StmtKind::Return(value)
            }
            TokenKind::Goto => {
                self.advance();
                let label = self.expect_ident()?;
                self.end_statement();
                StmtKind::Goto(label)
            }
            TokenKind::Ident if self.peek_kind(1) == TokenKind::Colon => {
                let label = self.expect_ident()?;
                self.advance();
                StmtKind::Label(label)
            }
            _ => {
                let expr = self.expression()?;
                self.end_statement();
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt::new(kind, self.span_from(start)))
    }

    /// `name = target` after `ref` / `slot`
    /// `<qualifier> name = ...` at the current token
    fn is_binding_declaration(&self) -> bool {
        self.peek_kind(1) == TokenKind::Ident && self.peek_kind(2) == TokenKind::Eq
    }

    fn binding_target(&mut self) -> ParseResult<(Ident, Expr)> {
        let name = self.expect_ident()?;
        self.expect(TokenKind::Eq, "'='")?;
        let target = self.expression()?;
        self.end_statement();
        Ok((name, target))
    }

    fn var_decl(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let mut bindings = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat(TokenKind::Eq).is_some() {
                Some(self.expression()?)
            } else {
                None
            };
            bindings.push(VarBinding { name, init });
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.end_statement();
        Ok(StmtKind::Var(bindings))
    }

    fn function(&mut self) -> ParseResult<FunctionDecl> {
        let start = self.expect(TokenKind::Func, "'func'")?.span.start;
        let name = if self.check(TokenKind::Ident) {
            Some(self.expect_ident()?)
        } else {
            None
        };
        self.expect(TokenKind::LParen, "'(' before parameters")?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) && !self.is_eof() {
            let qualifier = match self.current_kind() {
                TokenKind::Ref => Qualifier::Ref,
                TokenKind::Val => Qualifier::Val,
                TokenKind::Slot => Qualifier::Slot,
                TokenKind::Clone => Qualifier::Clone,
                _ => Qualifier::Normal,
            };
            if qualifier != Qualifier::Normal {
                self.advance();
            }
            let name = self.expect_ident()?;
            params.push(Param { name, qualifier });
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')' after parameters")?;
        let body = self.block()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            span: self.span_from(start),
        })
    }

    fn ident_list(&mut self) -> ParseResult<Vec<Ident>> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut items = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            items.push(self.expect_ident()?);
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        self.end_statement();
        Ok(items)
    }

    fn struct_decl(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let name = self.expect_ident()?;
        let fields = self.ident_list()?;
        Ok(StmtKind::Struct { name, fields })
    }

    fn enum_decl(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let name = self.expect_ident()?;
        let variants = self.ident_list()?;
        Ok(StmtKind::Enum { name, variants })
    }

    fn paren_expr(&mut self) -> ParseResult<Expr> {
        self.expect(TokenKind::LParen, "'('")?;
        let expr = self.expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        Ok(expr)
    }

    fn if_stmt(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let cond = self.paren_expr()?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.eat(TokenKind::Else).is_some() {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn for_stmt(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        self.expect(TokenKind::LParen, "'(' after 'for'")?;

        let init = if self.eat(TokenKind::Semicolon).is_some() {
            None
        } else {
            let start = self.current().span.start;
            let kind = if self.check(TokenKind::Var) {
                self.var_decl()?
            } else {
                let expr = self.expression()?;
                self.expect(TokenKind::Semicolon, "';' after loop initializer")?;
                StmtKind::Expr(expr)
            };
            Some(Box::new(Stmt::new(kind, self.span_from(start))))
        };

        let cond = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenKind::Semicolon, "';' after loop condition")?;

        let step = if self.check(TokenKind::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenKind::RParen, "')' after for clauses")?;

        let body = Box::new(self.statement()?);
        Ok(StmtKind::For {
            init,
            cond,
            step,
            body,
        })
    }

    // ==================== Expressions ====================

    pub fn expression(&mut self) -> ParseResult<Expr> {
        let target = self.binary(1)?;

        let op = match self.current_kind() {
            TokenKind::Eq => None,
            TokenKind::PlusEq => Some(BinOp::Add),
            TokenKind::MinusEq => Some(BinOp::Sub),
            TokenKind::StarEq => Some(BinOp::Mul),
            TokenKind::SlashEq => Some(BinOp::Div),
            TokenKind::PercentEq => Some(BinOp::Mod),
            _ => return Ok(target),
        };
        let op_token = self.advance();
        if !target.is_lvalue() {
            return Err(ParseError::new(
                ParseErrorKind::InvalidAssignmentTarget,
                target.span.merge(op_token.span),
            ));
        }
        let value = self.expression()?;
        let span = target.span.merge(value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(target),
                op,
                value: Box::new(value),
            },
            span,
        ))
    }

    fn infix_op(&self) -> Option<BinOp> {
        Some(match self.current_kind() {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Percent => BinOp::Mod,
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::NotEq => BinOp::Ne,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::LtEq => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::GtEq => BinOp::Ge,
            TokenKind::And => BinOp::And,
            TokenKind::Or => BinOp::Or,
            TokenKind::Ampersand => BinOp::BitAnd,
            TokenKind::Pipe => BinOp::BitOr,
            TokenKind::Caret => BinOp::BitXor,
            TokenKind::Shl => BinOp::Shl,
            TokenKind::Shr => BinOp::Shr,
            _ => return None,
        })
    }

    fn binary(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.infix_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.binary(prec + 1)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let start = self.current().span.start;
        let op = match self.current_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            TokenKind::Ref | TokenKind::Val | TokenKind::Clone => {
                let qualifier = match self.advance().kind {
                    TokenKind::Ref => ExprQualifier::Ref,
                    TokenKind::Val => ExprQualifier::Val,
                    _ => ExprQualifier::Clone,
                };
                let expr = self.unary()?;
                return Ok(Expr::new(
                    ExprKind::Qualified {
                        qualifier,
                        expr: Box::new(expr),
                    },
                    self.span_from(start),
                ));
            }
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.unary()?;
        let span = self.span_from(start);
        // Fold negative literals so they can use immediate encodings
        if let (UnaryOp::Neg, ExprKind::Number(n)) = (op, &operand.kind) {
            return Ok(Expr::new(ExprKind::Number(-n), span));
        }
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let start = expr.span.start;
            match self.current_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    while !self.check(TokenKind::RParen) && !self.is_eof() {
                        args.push(self.expression()?);
                        if self.eat(TokenKind::Comma).is_none() {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen, "')' after arguments")?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        self.span_from(start),
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        self.span_from(start),
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_ident()?;
                    expr = Expr::new(
                        ExprKind::Field {
                            object: Box::new(expr),
                            field,
                        },
                        self.span_from(start),
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn number(&mut self, token: &Token) -> ParseResult<f64> {
        let text = token.lexeme.replace('_', "");
        let parsed = match token.kind {
            TokenKind::HexInt => u64::from_str_radix(&text[2..], 16).map(|n| n as f64).ok(),
            _ => text.parse::<f64>().ok(),
        };
        parsed.ok_or_else(|| {
            ParseError::new(ParseErrorKind::InvalidNumber(token.lexeme.clone()), token.span)
        })
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        let start = token.span.start;
        let kind = match token.kind {
            TokenKind::Int | TokenKind::HexInt | TokenKind::Float => {
                self.advance();
                ExprKind::Number(self.number(&token)?)
            }
            TokenKind::String => {
                self.advance();
                let text = unescape(&token.lexeme)
                    .map_err(|e| ParseError::new(ParseErrorKind::Lex(e), token.span))?;
                ExprKind::String(text)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Null => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::Ident => {
                let name = self.expect_ident()?;
                if self.struct_names.contains(&name.name) && self.check(TokenKind::LBrace) {
                    self.struct_literal(name)?
                } else {
                    ExprKind::Ident(name)
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                return Ok(Expr::new(inner.kind, self.span_from(start)));
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(TokenKind::RBracket) && !self.is_eof() {
                    items.push(self.expression()?);
                    if self.eat(TokenKind::Comma).is_none() {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket, "']' after list items")?;
                ExprKind::List(items)
            }
            TokenKind::LBrace => self.map_literal()?,
            TokenKind::Func => ExprKind::Function(Rc::new(self.function()?)),
            other => {
                return Err(ParseError::new(
                    ParseErrorKind::ExpectedExpression(other),
                    token.span,
                ))
            }
        };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    fn map_literal(&mut self) -> ParseResult<ExprKind> {
        self.advance();
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            let key_token = self.advance();
            let key = match key_token.kind {
                TokenKind::Ident => key_token.lexeme,
                TokenKind::String => unescape(&key_token.lexeme)
                    .map_err(|e| ParseError::new(ParseErrorKind::Lex(e), key_token.span))?,
                found => {
                    return Err(ParseError::new(
                        ParseErrorKind::UnexpectedToken {
                            found,
                            expected: "map key",
                        },
                        key_token.span,
                    ))
                }
            };
            self.expect(TokenKind::Colon, "':' after map key")?;
            entries.push((key, self.expression()?));
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}' after map entries")?;
        Ok(ExprKind::Map(entries))
    }

    fn struct_literal(&mut self, name: Ident) -> ParseResult<ExprKind> {
        self.advance();
        let named = self.check(TokenKind::Ident) && self.peek_kind(1) == TokenKind::Colon;
        let fields = if named {
            let mut fields = Vec::new();
            while !self.check(TokenKind::RBrace) && !self.is_eof() {
                let field = self.expect_ident()?;
                self.expect(TokenKind::Colon, "':' after field name")?;
                fields.push((field, self.expression()?));
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
            StructFields::Named(fields)
        } else {
            let mut values = Vec::new();
            while !self.check(TokenKind::RBrace) && !self.is_eof() {
                values.push(self.expression()?);
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
            StructFields::Positional(values)
        };
        self.expect(TokenKind::RBrace, "'}' after struct fields")?;
        Ok(ExprKind::Struct { name, fields })
    }
}
