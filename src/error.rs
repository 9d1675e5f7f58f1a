//! Error types and formatting for formcalc
//!
//! Tree and schema faults get typed errors callers can match on; formula
//! syntax errors carry an offset so editors can render a caret under the
//! offending spot.

use colored::Colorize;
use thiserror::Error;

/// Faults raised by the value tree and schema collaborators
#[derive(Debug, Error)]
pub enum FormcalcError {
    #[error("no node at path '{0}'")]
    PathNotFound(String),

    #[error("node at '{path}' is not {expected}")]
    KindMismatch {
        path: String,
        expected: &'static str,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

/// A formula failed to tokenize or parse.
///
/// `offset` is a byte offset into the expression text.
#[derive(Debug, Clone, Error)]
#[error("{message} (at offset {offset})")]
pub struct FormulaSyntaxError {
    pub message: String,
    pub offset: usize,
}

impl FormulaSyntaxError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// Format a formula syntax error with the expression text and a caret
/// under the error position. Used by editor surfaces, not by the
/// evaluation hot path.
pub fn format_formula_error(expression: &str, error: &FormulaSyntaxError) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{} {}\n",
        "Formula error:".red().bold(),
        error.message
    ));

    output.push_str(&format!("   {}\n", "|".blue()));
    output.push_str(&format!("   {} {}\n", "|".blue(), expression));

    let column = expression
        .char_indices()
        .take_while(|(idx, _)| *idx < error.offset)
        .count()
        .min(expression.chars().count());
    let indicator = format!("{}^", " ".repeat(column));
    output.push_str(&format!(
        "   {} {}\n",
        "|".blue(),
        indicator.red().bold()
    ));

    output
}
