//! Per-field evaluation - snapshot, context assembly, expression-service
//! call, result coercion and failure isolation
//!
//! Evaluation knows nothing about scheduling. Aside from the single write
//! to its own target cell it treats the tree as read-only. Any failure
//! resets the target to its schema default instead of leaving a stale or
//! half-written value, and never aborts the surrounding pass.

use crate::collector::ComputedField;
use crate::formula::{self, EvalContext};
use crate::path;
use crate::schema::PrimitiveKind;
use crate::tree::ValueTree;
use serde_json::Value;

/// Callback invoked when a field's evaluation fails; receives the field's
/// canonical path and the failure
pub type ErrorHook = Box<dyn Fn(&str, &anyhow::Error)>;

/// Evaluate one computed field and write the result into its target cell
pub fn evaluate_field(tree: &ValueTree, field: &ComputedField, on_error: Option<&ErrorHook>) {
    let Some((kind, default)) = tree.cell_schema(&field.target) else {
        // Target vanished since collection; nothing to write
        return;
    };

    let root_data = tree.snapshot();
    let item_data = if field.container_path.is_empty() {
        None
    } else {
        path::lookup(&root_data, &field.container_path).filter(|v| v.is_object())
    };
    let current_path = item_data.map(|_| field.container_path.as_str());
    let ctx = EvalContext {
        root_data: &root_data,
        item_data,
        current_path,
    };

    match formula::evaluate(&field.expression, &ctx) {
        Ok(raw) => {
            let coerced = coerce(raw, kind, &default);
            if let Err(write_err) = tree.write_cell(&field.target, coerced) {
                report(on_error, &field.path, &anyhow::Error::new(write_err));
            }
        }
        Err(eval_err) => {
            report(on_error, &field.path, &eval_err);
            // Reset rather than leave a stale value; a missing target is
            // already covered by the schema probe above
            let _ = tree.write_cell(&field.target, default);
        }
    }
}

fn report(on_error: Option<&ErrorHook>, field_path: &str, error: &anyhow::Error) {
    tracing::debug!(field = field_path, %error, "formula evaluation failed");
    if let Some(hook) = on_error {
        hook(field_path, error);
    }
}

/// Coerce a raw expression result to the target cell's declared type.
/// Never fails: a mismatched result is converted, not rejected.
pub fn coerce(value: Value, kind: PrimitiveKind, default: &Value) -> Value {
    match kind {
        PrimitiveKind::String => Value::String(formula::to_display(&value)),
        PrimitiveKind::Number => {
            let n = formula::to_number(&value);
            let n = if n.is_finite() { n } else { 0.0 };
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or_else(|| default.clone())
        }
        PrimitiveKind::Boolean => Value::Bool(formula::truthy(&value)),
    }
}
