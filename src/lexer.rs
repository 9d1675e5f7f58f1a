//! Lexer for formula expressions - tokenizes formula text before parsing
//!
//! Two-phase approach:
//! 1. Lexer: formula text -> token stream (pest grammar, `formula.pest`)
//! 2. Parser: token stream -> expression AST
//!
//! The separation keeps keyword/identifier distinction out of the grammar:
//! `and`, `or`, `not`, `true`, `false` and `null` are plain identifiers at
//! the grammar level and become keywords here.

use crate::error::FormulaSyntaxError;
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "formula.pest"]
struct FormulaLexer;

/// Byte span of a token inside the formula text
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// A token with its span
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals and names
    Identifier(String),
    Number(f64),
    Str(String),

    /// `#index`, `#length`, `#first`, `#last` (name without the `#`)
    ContextToken(String),
    /// `@prev`, `@next` (name without the `@`)
    ItemToken(String),

    // Keywords
    True,
    False,
    Null,
    And,
    Or,
    Not,

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    EqualEqual,   // ==
    NotEqual,     // !=
    Less,         // <
    LessEqual,    // <=
    Greater,      // >
    GreaterEqual, // >=

    // Punctuation
    LeftParen,  // (
    RightParen, // )
    Comma,      // ,
    Dot,        // .
    DotDot,     // ..

    Eof,
}

/// Lexer that converts formula text to tokens
pub struct Lexer<'a> {
    source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    /// Tokenize the formula text
    pub fn tokenize(&self) -> Result<Vec<Token>, FormulaSyntaxError> {
        let pairs = FormulaLexer::parse(Rule::tokens, self.source).map_err(|e| {
            let offset = match e.location {
                pest::error::InputLocation::Pos(p) => p,
                pest::error::InputLocation::Span((s, _)) => s,
            };
            FormulaSyntaxError::new("unrecognized character in formula", offset)
        })?;

        let mut tokens = Vec::new();
        for pair in pairs {
            if pair.as_rule() != Rule::tokens {
                continue;
            }
            for inner in pair.into_inner() {
                if inner.as_rule() == Rule::token {
                    tokens.push(Self::process_token(inner)?);
                }
            }
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span {
                start: self.source.len(),
                end: self.source.len(),
                text: String::new(),
            },
        });

        Ok(tokens)
    }

    fn process_token(pair: pest::iterators::Pair<Rule>) -> Result<Token, FormulaSyntaxError> {
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| FormulaSyntaxError::new("empty token", 0))?;
        let pest_span = inner.as_span();
        let span = Span {
            start: pest_span.start(),
            end: pest_span.end(),
            text: pest_span.as_str().to_string(),
        };
        let text = pest_span.as_str();

        let kind = match inner.as_rule() {
            Rule::number => {
                let value = text.parse::<f64>().map_err(|_| {
                    FormulaSyntaxError::new(format!("invalid number '{text}'"), span.start)
                })?;
                TokenKind::Number(value)
            }
            Rule::string => {
                // Quotes are part of the match; strip them
                TokenKind::Str(text[1..text.len() - 1].to_string())
            }
            Rule::ident => Self::keyword_or_identifier(text),
            Rule::context_token => TokenKind::ContextToken(text[1..].to_string()),
            Rule::item_token => TokenKind::ItemToken(text[1..].to_string()),
            Rule::symbol => match text {
                "+" => TokenKind::Plus,
                "-" => TokenKind::Minus,
                "*" => TokenKind::Star,
                "/" => TokenKind::Slash,
                "==" => TokenKind::EqualEqual,
                "!=" => TokenKind::NotEqual,
                "<" => TokenKind::Less,
                "<=" => TokenKind::LessEqual,
                ">" => TokenKind::Greater,
                ">=" => TokenKind::GreaterEqual,
                "(" => TokenKind::LeftParen,
                ")" => TokenKind::RightParen,
                "," => TokenKind::Comma,
                "." => TokenKind::Dot,
                ".." => TokenKind::DotDot,
                other => {
                    return Err(FormulaSyntaxError::new(
                        format!("unknown symbol '{other}'"),
                        span.start,
                    ))
                }
            },
            rule => {
                return Err(FormulaSyntaxError::new(
                    format!("unexpected token rule {rule:?}"),
                    span.start,
                ))
            }
        };

        Ok(Token { kind, span })
    }

    fn keyword_or_identifier(text: &str) -> TokenKind {
        match text {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            _ => TokenKind::Identifier(text.to_string()),
        }
    }
}
