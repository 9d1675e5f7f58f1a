//! The expression service - the fixed contract the engine evaluates against
//!
//! Three entry points: `extract_dependencies` (static reference list for
//! graph building), `validate_syntax` (editor-facing check, outside the
//! evaluation hot path) and `evaluate` (dynamic evaluation against a
//! snapshot context).
//!
//! Values are plain `serde_json::Value`s. A reference that resolves to
//! nothing yields null; whether that is an error is up to the formula
//! (`isnull` exists for exactly this).

use crate::ast::{BinaryOperator, ContextKind, Expression, ItemKind, UnaryOperator};
use crate::error::FormulaSyntaxError;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::path;
use anyhow::{anyhow, bail, Result};
use serde_json::Value;

/// Snapshot context for one evaluation.
///
/// `item_data` and `current_path` are set when the evaluated field lives
/// inside a container (object or array item); the array context tokens
/// additionally require `current_path` to end in an array index.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub root_data: &'a Value,
    pub item_data: Option<&'a Value>,
    pub current_path: Option<&'a str>,
}

/// Result of a syntax check
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxCheck {
    pub valid: bool,
    pub error: Option<String>,
}

/// Parse a formula into its AST
pub fn parse(expression: &str) -> Result<Expression, FormulaSyntaxError> {
    let tokens = Lexer::new(expression).tokenize()?;
    Parser::new(tokens).parse_expression()
}

/// Extract the raw dependency tokens of a formula, in source order.
///
/// Absolute references come back normalized (`/a/b` -> `/a.b`) so that
/// stripping the leading `/` leaves a canonical path.
pub fn extract_dependencies(expression: &str) -> Result<Vec<String>> {
    let expr = parse(expression).map_err(|e| anyhow!(e))?;
    Ok(expr.references())
}

/// Check a formula for syntax errors without evaluating it
pub fn validate_syntax(expression: &str) -> SyntaxCheck {
    match parse(expression) {
        Ok(_) => SyntaxCheck {
            valid: true,
            error: None,
        },
        Err(e) => SyntaxCheck {
            valid: false,
            error: Some(e.to_string()),
        },
    }
}

/// Evaluate a formula against a snapshot context
pub fn evaluate(expression: &str, ctx: &EvalContext) -> Result<Value> {
    let expr = parse(expression).map_err(|e| anyhow!(e))?;
    eval_expr(&expr, ctx)
}

fn eval_expr(expr: &Expression, ctx: &EvalContext) -> Result<Value> {
    match expr {
        Expression::Literal(value) => Ok(value.clone()),

        Expression::Reference { token } => {
            let resolved = path::resolve_dependency(token, ctx.current_path.unwrap_or(""));
            Ok(path::lookup(ctx.root_data, &resolved)
                .cloned()
                .unwrap_or(Value::Null))
        }

        Expression::Context(kind) => {
            let pos = ArrayPosition::of(ctx)?;
            Ok(match kind {
                ContextKind::Index => Value::from(pos.index),
                ContextKind::Length => Value::from(pos.length),
                ContextKind::First => Value::Bool(pos.index == 0),
                ContextKind::Last => Value::Bool(pos.index + 1 == pos.length),
            })
        }

        Expression::Item { which, member } => {
            let pos = ArrayPosition::of(ctx)?;
            let neighbor = match which {
                ItemKind::Prev => pos.index.checked_sub(1),
                ItemKind::Next => Some(pos.index + 1),
            };
            let item = neighbor
                .and_then(|i| pos.items.get(i))
                .cloned()
                .unwrap_or(Value::Null);
            match member {
                Some(member_path) => Ok(path::lookup(&item, member_path)
                    .cloned()
                    .unwrap_or(Value::Null)),
                None => Ok(item),
            }
        }

        Expression::Unary { op, operand } => {
            let value = eval_expr(operand, ctx)?;
            Ok(match op {
                UnaryOperator::Negate => number(-to_number(&value)),
                UnaryOperator::Not => Value::Bool(!truthy(&value)),
            })
        }

        Expression::Binary { op, left, right } => eval_binary(*op, left, right, ctx),

        Expression::Call { name, args } => eval_call(name, args, ctx),
    }
}

fn eval_binary(
    op: BinaryOperator,
    left: &Expression,
    right: &Expression,
    ctx: &EvalContext,
) -> Result<Value> {
    // Short-circuit logic first
    match op {
        BinaryOperator::And => {
            let lhs = eval_expr(left, ctx)?;
            if !truthy(&lhs) {
                return Ok(Value::Bool(false));
            }
            let rhs = eval_expr(right, ctx)?;
            return Ok(Value::Bool(truthy(&rhs)));
        }
        BinaryOperator::Or => {
            let lhs = eval_expr(left, ctx)?;
            if truthy(&lhs) {
                return Ok(Value::Bool(true));
            }
            let rhs = eval_expr(right, ctx)?;
            return Ok(Value::Bool(truthy(&rhs)));
        }
        _ => {}
    }

    let lhs = eval_expr(left, ctx)?;
    let rhs = eval_expr(right, ctx)?;

    let value = match op {
        BinaryOperator::Add => {
            // String on either side concatenates, like the tree's own
            // string coercion; everything else is numeric
            if lhs.is_string() || rhs.is_string() {
                Value::String(format!("{}{}", to_display(&lhs), to_display(&rhs)))
            } else {
                number(to_number(&lhs) + to_number(&rhs))
            }
        }
        BinaryOperator::Subtract => number(to_number(&lhs) - to_number(&rhs)),
        BinaryOperator::Multiply => number(to_number(&lhs) * to_number(&rhs)),
        BinaryOperator::Divide => number(to_number(&lhs) / to_number(&rhs)),
        BinaryOperator::Equal => Value::Bool(loose_eq(&lhs, &rhs)),
        BinaryOperator::NotEqual => Value::Bool(!loose_eq(&lhs, &rhs)),
        BinaryOperator::Less => compare(&lhs, &rhs, |o| o.is_lt()),
        BinaryOperator::LessEqual => compare(&lhs, &rhs, |o| o.is_le()),
        BinaryOperator::Greater => compare(&lhs, &rhs, |o| o.is_gt()),
        BinaryOperator::GreaterEqual => compare(&lhs, &rhs, |o| o.is_ge()),
        BinaryOperator::And | BinaryOperator::Or => unreachable!("handled above"),
    };
    Ok(value)
}

fn eval_call(name: &str, args: &[Expression], ctx: &EvalContext) -> Result<Value> {
    // `if` keeps its branches lazy; a guarded branch must not evaluate
    if name == "if" {
        if args.len() != 2 && args.len() != 3 {
            bail!("if() takes 2 or 3 arguments, got {}", args.len());
        }
        let cond = eval_expr(&args[0], ctx)?;
        return if truthy(&cond) {
            eval_expr(&args[1], ctx)
        } else if let Some(else_arm) = args.get(2) {
            eval_expr(else_arm, ctx)
        } else {
            Ok(Value::Null)
        };
    }

    let values: Vec<Value> = args
        .iter()
        .map(|a| eval_expr(a, ctx))
        .collect::<Result<_>>()?;

    match name {
        "isnull" => {
            expect_args(name, &values, 1)?;
            Ok(Value::Bool(values[0].is_null()))
        }
        "not" => {
            expect_args(name, &values, 1)?;
            Ok(Value::Bool(!truthy(&values[0])))
        }
        "abs" => {
            expect_args(name, &values, 1)?;
            Ok(number(to_number(&values[0]).abs()))
        }
        "round" => {
            expect_args(name, &values, 1)?;
            Ok(number(to_number(&values[0]).round()))
        }
        "min" => {
            if values.is_empty() {
                bail!("min() needs at least one argument");
            }
            Ok(number(
                values.iter().map(to_number).fold(f64::INFINITY, f64::min),
            ))
        }
        "max" => {
            if values.is_empty() {
                bail!("max() needs at least one argument");
            }
            Ok(number(
                values
                    .iter()
                    .map(to_number)
                    .fold(f64::NEG_INFINITY, f64::max),
            ))
        }
        "concat" => Ok(Value::String(
            values.iter().map(to_display).collect::<String>(),
        )),
        other => bail!("unknown function '{other}'"),
    }
}

fn expect_args(name: &str, values: &[Value], count: usize) -> Result<()> {
    if values.len() != count {
        bail!("{name}() takes {count} argument(s), got {}", values.len());
    }
    Ok(())
}

/// Position of the current item inside its enclosing array; only
/// available when the evaluated field lives inside an array item.
struct ArrayPosition {
    index: usize,
    length: usize,
    items: Vec<Value>,
}

impl ArrayPosition {
    fn of(ctx: &EvalContext) -> Result<Self> {
        let current = ctx
            .current_path
            .filter(|_| ctx.item_data.is_some())
            .ok_or_else(|| anyhow!("array context token used outside an array item"))?;
        let index = match path::parse(current).pop() {
            Some(path::Segment::Index(n)) => n,
            _ => bail!("array context token used outside an array item"),
        };
        let items = path::lookup(ctx.root_data, path::parent_path(current))
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| anyhow!("enclosing array not found in snapshot"))?;
        Ok(Self {
            index,
            length: items.len(),
            items,
        })
    }
}

/// JS-style truthiness: null, false, 0, NaN and "" are false
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric coercion: numbers pass through, booleans become 0/1, numeric
/// strings parse, everything else is 0
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Display coercion: strings pass through, numbers drop a trailing `.0`,
/// containers render as JSON
pub fn to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value, check: fn(std::cmp::Ordering) -> bool) -> Value {
    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => to_number(lhs)
            .partial_cmp(&to_number(rhs))
            .unwrap_or(std::cmp::Ordering::Equal),
    };
    Value::Bool(check(ordering))
}
