//! Declarative schemas for value trees
//!
//! A schema describes the shape of user-entered data: objects with ordered
//! named fields, arrays of uniformly-shaped items, and typed primitives
//! with defaults. A primitive may declare a formula, which makes every
//! cell instantiated from it a computed field.
//!
//! Schemas deserialize from JSON. Object fields are a list (not a map) so
//! declaration order survives the round trip:
//!
//! ```json
//! {
//!   "type": "object",
//!   "fields": [
//!     { "name": "a",   "type": "number", "default": 10 },
//!     { "name": "sum", "type": "number", "formula": "a + b" }
//!   ]
//! }
//! ```

use crate::error::FormcalcError;
use crate::tree::{Node, PrimitiveCell};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema node - the closed set of shapes a value tree can take
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    Object {
        fields: Vec<Field>,
    },
    Array {
        items: Box<Schema>,
    },
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<std::string::String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formula: Option<std::string::String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formula: Option<std::string::String>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formula: Option<std::string::String>,
    },
}

/// A named field of an object schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub name: std::string::String,
    #[serde(flatten)]
    pub schema: Schema,
}

/// Declared type of a primitive cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    String,
    Number,
    Boolean,
}

impl Schema {
    /// Parse a schema from its JSON representation
    pub fn from_json(input: &str) -> Result<Schema, FormcalcError> {
        serde_json::from_str(input).map_err(|e| FormcalcError::InvalidSchema(e.to_string()))
    }

    /// Instantiate the default value tree node for this schema.
    ///
    /// Arrays start empty; items are created later through the tree's
    /// append operation, which instantiates the item schema per item.
    pub fn instantiate(&self) -> Node {
        match self {
            Schema::Object { fields } => Node::Object {
                children: fields
                    .iter()
                    .map(|f| (f.name.clone(), f.schema.instantiate()))
                    .collect(),
            },
            Schema::Array { items } => Node::Array {
                items: Vec::new(),
                item_schema: (**items).clone(),
            },
            Schema::String { default, formula } => {
                let default = Value::String(default.clone().unwrap_or_default());
                Node::Primitive(PrimitiveCell {
                    value: default.clone(),
                    default,
                    kind: PrimitiveKind::String,
                    formula: formula.clone(),
                })
            }
            Schema::Number { default, formula } => {
                let default = number_default(*default);
                Node::Primitive(PrimitiveCell {
                    value: default.clone(),
                    default,
                    kind: PrimitiveKind::Number,
                    formula: formula.clone(),
                })
            }
            Schema::Boolean { default, formula } => {
                let default = Value::Bool(default.unwrap_or(false));
                Node::Primitive(PrimitiveCell {
                    value: default.clone(),
                    default,
                    kind: PrimitiveKind::Boolean,
                    formula: formula.clone(),
                })
            }
        }
    }
}

fn number_default(default: Option<f64>) -> Value {
    default
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::Number(serde_json::Number::from(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_object_schema_keeps_field_order() {
        let schema = Schema::from_json(
            r#"{
                "type": "object",
                "fields": [
                    { "name": "b", "type": "number", "default": 2 },
                    { "name": "a", "type": "number", "default": 1 }
                ]
            }"#,
        )
        .unwrap();
        match &schema {
            Schema::Object { fields } => {
                assert_eq!(fields[0].name, "b");
                assert_eq!(fields[1].name, "a");
            }
            other => panic!("expected object schema, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_formula_field() {
        let schema = Schema::from_json(
            r#"{
                "type": "object",
                "fields": [
                    { "name": "sum", "type": "number", "formula": "a + b" }
                ]
            }"#,
        )
        .unwrap();
        match schema {
            Schema::Object { fields } => match &fields[0].schema {
                Schema::Number { formula, .. } => {
                    assert_eq!(formula.as_deref(), Some("a + b"));
                }
                other => panic!("expected number schema, got {other:?}"),
            },
            other => panic!("expected object schema, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_schema_is_typed_error() {
        let err = Schema::from_json(r#"{"type": "rocket"}"#).unwrap_err();
        assert!(matches!(err, FormcalcError::InvalidSchema(_)));
    }

    #[test]
    fn test_instantiate_defaults() {
        let schema = Schema::from_json(
            r#"{
                "type": "object",
                "fields": [
                    { "name": "name", "type": "string", "default": "anon" },
                    { "name": "count", "type": "number" },
                    { "name": "active", "type": "boolean", "default": true },
                    { "name": "tags", "type": "array",
                      "items": { "type": "string" } }
                ]
            }"#,
        )
        .unwrap();
        let node = schema.instantiate();
        match node {
            Node::Object { children } => {
                assert_eq!(children.len(), 4);
                match &children[0].1 {
                    Node::Primitive(cell) => {
                        assert_eq!(cell.value, Value::String("anon".to_string()));
                        assert_eq!(cell.kind, PrimitiveKind::String);
                    }
                    other => panic!("expected primitive, got {other:?}"),
                }
                match &children[1].1 {
                    Node::Primitive(cell) => assert_eq!(cell.value.as_f64(), Some(0.0)),
                    other => panic!("expected primitive, got {other:?}"),
                }
                match &children[3].1 {
                    Node::Array { items, .. } => assert!(items.is_empty()),
                    other => panic!("expected array, got {other:?}"),
                }
            }
            other => panic!("expected object, got {other:?}"),
        }
    }
}
