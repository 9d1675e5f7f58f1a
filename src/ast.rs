//! Expression AST for the formula language

use serde_json::Value;

/// A parsed formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Number, string, boolean or null literal
    Literal(Value),

    /// Reference to another cell, stored in raw dependency-token form:
    /// `a.b` (sibling-relative), `/a.b` (absolute), `../a` (parent-relative)
    Reference { token: String },

    /// Array context token: `#index`, `#length`, `#first`, `#last`
    Context(ContextKind),

    /// Neighbor item token `@prev` / `@next`, with an optional member path
    /// such as the `value` in `@prev.value`
    Item {
        which: ItemKind,
        member: Option<String>,
    },

    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },

    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    /// Builtin function call, e.g. `if(cond, a, b)`
    Call {
        name: String,
        args: Vec<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Index,
    Length,
    First,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Prev,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl Expression {
    /// Collect every cell reference token in the expression, in source
    /// order, without duplicates. Context and neighbor-item tokens are not
    /// references; they carry no static dependency.
    pub fn references(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.walk_references(&mut out);
        out
    }

    fn walk_references(&self, out: &mut Vec<String>) {
        match self {
            Expression::Reference { token } => {
                if !out.iter().any(|t| t == token) {
                    out.push(token.clone());
                }
            }
            Expression::Unary { operand, .. } => operand.walk_references(out),
            Expression::Binary { left, right, .. } => {
                left.walk_references(out);
                right.walk_references(out);
            }
            Expression::Call { args, .. } => {
                for arg in args {
                    arg.walk_references(out);
                }
            }
            Expression::Literal(_) | Expression::Context(_) | Expression::Item { .. } => {}
        }
    }
}
