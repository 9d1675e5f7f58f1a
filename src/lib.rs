//! Formcalc - incremental formula recomputation for schema-shaped value trees
//!
//! User-entered data lives in a tree of typed values shaped by a
//! declarative schema. Primitive fields may declare a formula; formcalc
//! discovers those computed fields, resolves their dependencies into
//! canonical tree-relative paths, builds a dependency graph with a
//! topological evaluation order, and re-evaluates only the transitively
//! affected fields when a value changes. Structural changes (array items
//! appearing or disappearing) invalidate index-based paths, so the engine
//! rebuilds its whole view and re-evaluates everything.
//!
//! ```
//! use formcalc::{Engine, EngineOptions, Schema, ValueTree};
//! use serde_json::json;
//!
//! let schema = Schema::from_json(r#"{
//!     "type": "object",
//!     "fields": [
//!         { "name": "a",   "type": "number", "default": 10 },
//!         { "name": "b",   "type": "number", "default": 20 },
//!         { "name": "sum", "type": "number", "formula": "a + b" }
//!     ]
//! }"#).unwrap();
//!
//! let tree = ValueTree::from_schema(&schema);
//! let _engine = Engine::new(&tree, EngineOptions::default());
//! assert_eq!(tree.get_value("sum").unwrap().as_f64(), Some(30.0));
//!
//! tree.set_value("a", json!(50)).unwrap();
//! assert_eq!(tree.get_value("sum").unwrap().as_f64(), Some(70.0));
//! ```

pub mod ast;
pub mod collector;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod formula;
pub mod graph;
pub mod lexer;
pub mod parser;
pub mod path;
pub mod schema;
pub mod tree;

// Re-export commonly used types
pub use ast::Expression;
pub use collector::{Collected, ComputedField};
pub use engine::{Engine, EngineOptions};
pub use error::{format_formula_error, FormcalcError, FormulaSyntaxError};
pub use evaluator::ErrorHook;
pub use formula::{extract_dependencies, validate_syntax, EvalContext, SyntaxCheck};
pub use lexer::{Lexer, Token, TokenKind};
pub use schema::{PrimitiveKind, Schema};
pub use tree::{CellRef, Node, PrimitiveCell, ValueTree, WatchId};

/// Parse a formula into its expression AST
pub fn parse_formula(input: &str) -> Result<Expression, FormulaSyntaxError> {
    formula::parse(input)
}

/// Formcalc version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
