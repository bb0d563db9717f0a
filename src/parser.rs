//! # Parser
//!
//! Recursive-descent parser turning a token stream into the statement list
//! the compiler consumes. Grammar shape follows the source language's
//! statement/expression vocabulary (`print`, `let`, blocks, `if`/`else`,
//! `while`, `return`, `fn`, `struct`, `impl`) with standard C-family
//! precedence climbing for expressions.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type PResult<T> = Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<()> {
        if self.matches(kind) {
            Ok(())
        } else {
            Err(ParseError {
                line: self.line(),
                message: format!("expected {}, found {:?}", what, self.peek()),
            })
        }
    }

    fn expect_identifier(&mut self, what: &str) -> PResult<String> {
        match self.peek().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(ParseError {
                line: self.line(),
                message: format!("expected {}, found {:?}", what, other),
            }),
        }
    }

    pub fn parse_program(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::Eof) {
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> PResult<Stmt> {
        match self.peek().clone() {
            TokenKind::Print => {
                self.advance();
                let e = self.expression()?;
                self.expect(&TokenKind::Semicolon, "';' after print statement")?;
                Ok(Stmt::Print(e))
            }
            TokenKind::Let => {
                self.advance();
                let name = self.expect_identifier("variable name")?;
                let init = if self.matches(&TokenKind::Eq) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.expect(&TokenKind::Semicolon, "';' after let statement")?;
                Ok(Stmt::Let { name, init })
            }
            TokenKind::LBrace => Ok(Stmt::Block(self.block()?)),
            TokenKind::If => {
                self.advance();
                self.expect(&TokenKind::LParen, "'(' after if")?;
                let cond = self.expression()?;
                self.expect(&TokenKind::RParen, "')' after if condition")?;
                let then_branch = Box::new(self.statement()?);
                let else_branch = if self.matches(&TokenKind::Else) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                })
            }
            TokenKind::While => {
                self.advance();
                self.expect(&TokenKind::LParen, "'(' after while")?;
                let cond = self.expression()?;
                self.expect(&TokenKind::RParen, "')' after while condition")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { cond, body })
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(&TokenKind::Semicolon, "';' after return statement")?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Fn => Ok(Stmt::Function(self.function_decl()?)),
            TokenKind::Struct => {
                self.advance();
                let name = self.expect_identifier("struct name")?;
                self.expect(&TokenKind::LBrace, "'{' after struct name")?;
                let mut properties = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    properties.push(self.expect_identifier("property name")?);
                    self.expect(&TokenKind::Semicolon, "';' after property name")?;
                }
                self.expect(&TokenKind::RBrace, "'}' after struct body")?;
                Ok(Stmt::Struct { name, properties })
            }
            TokenKind::Impl => {
                self.advance();
                let target = self.expect_identifier("struct name")?;
                self.expect(&TokenKind::LBrace, "'{' after impl target")?;
                let mut methods = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    methods.push(self.function_decl()?);
                }
                self.expect(&TokenKind::RBrace, "'}' after impl body")?;
                Ok(Stmt::Impl { target, methods })
            }
            _ => {
                let e = self.expression()?;
                self.expect(&TokenKind::Semicolon, "';' after expression statement")?;
                Ok(Stmt::Expr(e))
            }
        }
    }

    fn function_decl(&mut self) -> PResult<FunctionDecl> {
        self.expect(&TokenKind::Fn, "'fn'")?;
        let name = self.expect_identifier("function name")?;
        self.expect(&TokenKind::LParen, "'(' after function name")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.expect_identifier("parameter name")?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')' after parameters")?;
        let body = self.block()?;
        Ok(FunctionDecl { name, params, body })
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            stmts.push(self.statement()?);
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let target = self.logical_or()?;
        if self.matches(&TokenKind::Eq) {
            let value = self.assignment()?;
            return Ok(Expr::Assign {
                target: Box::new(target),
                value: Box::new(value),
            });
        }
        Ok(target)
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.logical_and()?;
        while self.matches(&TokenKind::PipePipe) {
            let rhs = self.logical_and()?;
            lhs = Expr::Logical {
                op: LogicalOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.equality()?;
        while self.matches(&TokenKind::AmpAmp) {
            let rhs = self.equality()?;
            lhs = Expr::Logical {
                op: LogicalOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.comparison()?;
        loop {
            let op = if self.matches(&TokenKind::EqEq) {
                BinaryOp::Eq
            } else if self.matches(&TokenKind::BangEq) {
                BinaryOp::Ne
            } else {
                break;
            };
            let rhs = self.comparison()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let mut lhs = self.bitor()?;
        loop {
            let op = if self.matches(&TokenKind::Lt) {
                BinaryOp::Lt
            } else if self.matches(&TokenKind::LtEq) {
                BinaryOp::Le
            } else if self.matches(&TokenKind::Gt) {
                BinaryOp::Gt
            } else if self.matches(&TokenKind::GtEq) {
                BinaryOp::Ge
            } else {
                break;
            };
            let rhs = self.bitor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn bitor(&mut self) -> PResult<Expr> {
        let mut lhs = self.bitxor()?;
        while self.matches(&TokenKind::Pipe) {
            let rhs = self.bitxor()?;
            lhs = Expr::Binary {
                op: BinaryOp::BitOr,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn bitxor(&mut self) -> PResult<Expr> {
        let mut lhs = self.bitand()?;
        while self.matches(&TokenKind::Caret) {
            let rhs = self.bitand()?;
            lhs = Expr::Binary {
                op: BinaryOp::BitXor,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn bitand(&mut self) -> PResult<Expr> {
        let mut lhs = self.shift()?;
        while self.matches(&TokenKind::Amp) {
            let rhs = self.shift()?;
            lhs = Expr::Binary {
                op: BinaryOp::BitAnd,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn shift(&mut self) -> PResult<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = if self.matches(&TokenKind::Shl) {
                BinaryOp::Shl
            } else if self.matches(&TokenKind::Shr) {
                BinaryOp::Shr
            } else {
                break;
            };
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> PResult<Expr> {
        let mut lhs = self.factor()?;
        loop {
            let op = if self.matches(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.matches(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.matches(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.matches(&TokenKind::Slash) {
                BinaryOp::Div
            } else if self.matches(&TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        if self.matches(&TokenKind::Minus) {
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(self.unary()?),
            });
        }
        if self.matches(&TokenKind::Bang) {
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(self.unary()?),
            });
        }
        if self.matches(&TokenKind::Tilde) {
            return Ok(Expr::Unary {
                op: UnaryOp::BitNot,
                expr: Box::new(self.unary()?),
            });
        }
        if self.matches(&TokenKind::Amp) {
            return Ok(Expr::AddressOf(Box::new(self.unary()?)));
        }
        if self.matches(&TokenKind::Star) {
            return Ok(Expr::Deref(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.matches(&TokenKind::Dot) {
                let name = self.expect_identifier("property or method name")?;
                if self.matches(&TokenKind::LParen) {
                    let args = self.arg_list()?;
                    expr = Expr::MethodCall {
                        receiver: Box::new(expr),
                        method: name,
                        args,
                    };
                } else {
                    expr = Expr::Attr {
                        base: Box::new(expr),
                        name,
                    };
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn arg_list(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')' after arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::LParen => {
                self.advance();
                let e = self.expression()?;
                self.expect(&TokenKind::RParen, "')' after expression")?;
                Ok(e)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.matches(&TokenKind::LParen) {
                    let args = self.arg_list()?;
                    Ok(Expr::Call { callee: name, args })
                } else if self.matches(&TokenKind::LBrace) {
                    let mut fields = Vec::new();
                    while !self.check(&TokenKind::RBrace) {
                        let field_name = self.expect_identifier("field name")?;
                        self.expect(&TokenKind::Eq, "':' is written as '=' in field init")?;
                        let value = self.expression()?;
                        fields.push((field_name, value));
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBrace, "'}' after struct literal")?;
                    Ok(Expr::StructInit { name, fields })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            other => Err(ParseError {
                line: self.line(),
                message: format!("unexpected token {:?}", other),
            }),
        }
    }
}

pub fn parse(tokens: Vec<Token>) -> Result<Vec<Stmt>, ParseError> {
    Parser::new(tokens).parse_program()
}
