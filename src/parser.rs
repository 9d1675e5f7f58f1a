//! Recursive-descent parser over the formula token stream
//!
//! Precedence, loosest first: `or`, `and`, comparisons, `+ -`, `* /`,
//! unary `- not`, primaries. A `/` in operand position starts an absolute
//! reference; in operator position it is division - the descent
//! disambiguates the two without lookahead tricks.

use crate::ast::{BinaryOperator, ContextKind, Expression, ItemKind, UnaryOperator};
use crate::error::FormulaSyntaxError;
use crate::lexer::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        // The lexer terminates its stream; tolerate hand-built ones that don't
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
            let end = tokens.last().map(|t| t.span.end).unwrap_or(0);
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: crate::lexer::Span {
                    start: end,
                    end,
                    text: String::new(),
                },
            });
        }
        Self { tokens, pos: 0 }
    }

    /// Parse a complete formula; trailing tokens are an error.
    pub fn parse_expression(&mut self) -> Result<Expression, FormulaSyntaxError> {
        let expr = self.parse_or()?;
        match self.peek_kind() {
            TokenKind::Eof => Ok(expr),
            _ => Err(self.unexpected("end of formula")),
        }
    }

    fn parse_or(&mut self) -> Result<Expression, FormulaSyntaxError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek_kind(), TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = binary(BinaryOperator::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, FormulaSyntaxError> {
        let mut left = self.parse_comparison()?;
        while matches!(self.peek_kind(), TokenKind::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(BinaryOperator::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expression, FormulaSyntaxError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqualEqual => BinaryOperator::Equal,
                TokenKind::NotEqual => BinaryOperator::NotEqual,
                TokenKind::Less => BinaryOperator::Less,
                TokenKind::LessEqual => BinaryOperator::LessEqual,
                TokenKind::Greater => BinaryOperator::Greater,
                TokenKind::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression, FormulaSyntaxError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, FormulaSyntaxError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOperator::Multiply,
                TokenKind::Slash => BinaryOperator::Divide,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, FormulaSyntaxError> {
        match self.peek_kind() {
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expression::Unary {
                    op: UnaryOperator::Negate,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expression::Unary {
                    op: UnaryOperator::Not,
                    operand: Box::new(operand),
                })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, FormulaSyntaxError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expression::Literal(number_literal(n)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expression::Literal(serde_json::Value::String(s)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::Literal(serde_json::Value::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::Literal(serde_json::Value::Bool(false)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expression::Literal(serde_json::Value::Null))
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(&TokenKind::RightParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if matches!(self.peek_kind(), TokenKind::LeftParen) {
                    self.parse_call(name)
                } else {
                    let path = self.parse_reference_tail(name, false)?;
                    Ok(Expression::Reference { token: path })
                }
            }
            // `/a/b` - absolute reference from the root
            TokenKind::Slash => {
                self.advance();
                let first = self.expect_identifier()?;
                let path = self.parse_reference_tail(first, true)?;
                Ok(Expression::Reference {
                    token: format!("/{path}"),
                })
            }
            // `../a`, `../../a` - parent-relative reference
            TokenKind::DotDot => {
                let mut ups = 0;
                while matches!(self.peek_kind(), TokenKind::DotDot) {
                    self.advance();
                    self.expect(&TokenKind::Slash, "'/' after '..'")?;
                    ups += 1;
                }
                let first = self.expect_identifier()?;
                let path = self.parse_reference_tail(first, true)?;
                Ok(Expression::Reference {
                    token: format!("{}{}", "../".repeat(ups), path),
                })
            }
            TokenKind::ContextToken(name) => {
                self.advance();
                let kind = match name.as_str() {
                    "index" => ContextKind::Index,
                    "length" => ContextKind::Length,
                    "first" => ContextKind::First,
                    "last" => ContextKind::Last,
                    _ => {
                        return Err(FormulaSyntaxError::new(
                            format!("unknown context token '#{name}'"),
                            token.span.start,
                        ))
                    }
                };
                Ok(Expression::Context(kind))
            }
            TokenKind::ItemToken(name) => {
                self.advance();
                let which = match name.as_str() {
                    "prev" => ItemKind::Prev,
                    "next" => ItemKind::Next,
                    _ => {
                        return Err(FormulaSyntaxError::new(
                            format!("unknown item token '@{name}'"),
                            token.span.start,
                        ))
                    }
                };
                let member = if matches!(self.peek_kind(), TokenKind::Dot) {
                    self.advance();
                    let first = self.expect_identifier()?;
                    Some(self.parse_reference_tail(first, false)?)
                } else {
                    None
                };
                Ok(Expression::Item { which, member })
            }
            TokenKind::Eof => Err(FormulaSyntaxError::new(
                "unexpected end of formula",
                token.span.start,
            )),
            _ => Err(self.unexpected("a value, reference or '('")),
        }
    }

    /// `name(args, ...)` - builtin call
    fn parse_call(&mut self, name: String) -> Result<Expression, FormulaSyntaxError> {
        self.expect(&TokenKind::LeftParen, "'('")?;
        let mut args = Vec::new();
        if !matches!(self.peek_kind(), TokenKind::RightParen) {
            loop {
                args.push(self.parse_or()?);
                if matches!(self.peek_kind(), TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightParen, "')'")?;
        Ok(Expression::Call { name, args })
    }

    /// Extend a reference path with `.field` segments. Inside absolute and
    /// parent-relative references `/field` also continues the path (both
    /// separators normalize to dots); for bare references a slash is always
    /// division, so `total / count` stays an arithmetic expression.
    fn parse_reference_tail(
        &mut self,
        first: String,
        allow_slash: bool,
    ) -> Result<String, FormulaSyntaxError> {
        let mut path = first;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let next = self.expect_identifier()?;
                    path.push('.');
                    path.push_str(&next);
                }
                TokenKind::Slash if allow_slash && self.next_is_identifier() => {
                    self.advance();
                    let next = self.expect_identifier()?;
                    path.push('.');
                    path.push_str(&next);
                }
                _ => break,
            }
        }
        Ok(path)
    }

    /// True when the token after the current one is an identifier; used to
    /// tell `/segment` path continuation apart from division.
    fn next_is_identifier(&self) -> bool {
        matches!(
            self.tokens.get(self.pos + 1).map(|t| &t.kind),
            Some(TokenKind::Identifier(_))
        )
    }

    fn expect_identifier(&mut self) -> Result<String, FormulaSyntaxError> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), FormulaSyntaxError> {
        if self.peek_kind() == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expected: &str) -> FormulaSyntaxError {
        let token = self.peek();
        let found = if token.span.text.is_empty() {
            "end of formula".to_string()
        } else {
            format!("'{}'", token.span.text)
        };
        FormulaSyntaxError::new(
            format!("expected {expected}, found {found}"),
            token.span.start,
        )
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }
}

fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
    Expression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn number_literal(n: f64) -> serde_json::Value {
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}
