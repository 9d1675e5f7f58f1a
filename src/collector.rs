//! Field collector - one walk over the live tree produces everything the
//! dependency resolver and the engine need
//!
//! The collector has no incremental mode: it is called once per (re)build
//! and its result replaces the previous artifacts wholesale. Correctness
//! over a moving tree shape comes from full rebuild, not patching.

use crate::formula;
use crate::path;
use crate::tree::{CellRef, Node, ValueTree};
use std::collections::HashMap;

/// A primitive cell that declares a formula
#[derive(Debug, Clone)]
pub struct ComputedField {
    /// Canonical path of the cell
    pub path: String,
    /// Formula text as declared
    pub expression: String,
    /// Handle for writing the result back
    pub target: CellRef,
    /// Dependency tokens as extracted, unresolved
    pub raw_dependencies: Vec<String>,
    /// Canonical path of the enclosing container
    pub container_path: String,
}

impl ComputedField {
    /// Dependency tokens resolved against the enclosing container
    pub fn resolved_dependencies(&self) -> Vec<String> {
        self.raw_dependencies
            .iter()
            .map(|token| path::resolve_dependency(token, &self.container_path))
            .collect()
    }
}

/// Everything one collection pass discovers
#[derive(Debug, Default)]
pub struct Collected {
    /// Computed fields by canonical path
    pub fields: HashMap<String, ComputedField>,
    /// Every primitive cell by canonical path; dependencies may target
    /// plain fields, so all of them are addressable
    pub cells_by_path: HashMap<String, CellRef>,
    /// Every array container, whether or not it holds computed fields -
    /// these are the structural-watch targets
    pub arrays: Vec<String>,
}

/// Depth-first walk of the tree
pub fn collect(tree: &ValueTree) -> Collected {
    let mut out = Collected::default();
    tree.with_root(|root| walk(root, String::new(), &mut out));
    tracing::debug!(
        fields = out.fields.len(),
        cells = out.cells_by_path.len(),
        arrays = out.arrays.len(),
        "collected value tree"
    );
    out
}

fn walk(node: &Node, node_path: String, out: &mut Collected) {
    match node {
        Node::Primitive(cell) => {
            out.cells_by_path
                .insert(node_path.clone(), CellRef::new(node_path.clone()));
            if let Some(expression) = &cell.formula {
                // An unparsable expression still registers a field with no
                // dependencies; it fails (and resets) at evaluation time
                let raw_dependencies =
                    formula::extract_dependencies(expression).unwrap_or_default();
                let container_path = path::parent_path(&node_path).to_string();
                out.fields.insert(
                    node_path.clone(),
                    ComputedField {
                        target: CellRef::new(node_path.clone()),
                        path: node_path,
                        expression: expression.clone(),
                        raw_dependencies,
                        container_path,
                    },
                );
            }
        }
        Node::Object { children } => {
            for (name, child) in children {
                let child_path = if node_path.is_empty() {
                    name.clone()
                } else {
                    format!("{node_path}.{name}")
                };
                walk(child, child_path, out);
            }
        }
        Node::Array { items, .. } => {
            out.arrays.push(node_path.clone());
            for (index, item) in items.iter().enumerate() {
                walk(item, format!("{node_path}[{index}]"), out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use pretty_assertions::assert_eq;

    fn sample_tree() -> ValueTree {
        let schema = Schema::from_json(
            r#"{
                "type": "object",
                "fields": [
                    { "name": "a", "type": "number", "default": 10 },
                    { "name": "sum", "type": "number", "formula": "a + b" },
                    { "name": "b", "type": "number", "default": 20 },
                    { "name": "items", "type": "array", "items": {
                        "type": "object",
                        "fields": [
                            { "name": "price", "type": "number" },
                            { "name": "total", "type": "number",
                              "formula": "price * quantity" },
                            { "name": "quantity", "type": "number" }
                        ]
                    }}
                ]
            }"#,
        )
        .unwrap();
        ValueTree::from_schema(&schema)
    }

    #[test]
    fn test_collect_root_fields() {
        let tree = sample_tree();
        let collected = collect(&tree);

        assert_eq!(collected.fields.len(), 1);
        let sum = &collected.fields["sum"];
        assert_eq!(sum.expression, "a + b");
        assert_eq!(sum.raw_dependencies, vec!["a", "b"]);
        assert_eq!(sum.container_path, "");
        assert_eq!(sum.resolved_dependencies(), vec!["a", "b"]);

        // Plain cells register too
        assert!(collected.cells_by_path.contains_key("a"));
        assert!(collected.cells_by_path.contains_key("b"));
        assert_eq!(collected.arrays, vec!["items".to_string()]);
    }

    #[test]
    fn test_collect_array_items() {
        let tree = sample_tree();
        tree.push_default_item("items").unwrap();
        tree.push_default_item("items").unwrap();
        let collected = collect(&tree);

        assert_eq!(collected.fields.len(), 3);
        let total = &collected.fields["items[1].total"];
        assert_eq!(total.container_path, "items[1]");
        assert_eq!(
            total.resolved_dependencies(),
            vec!["items[1].price", "items[1].quantity"]
        );
        assert!(collected.cells_by_path.contains_key("items[0].price"));
    }

    #[test]
    fn test_unparsable_formula_collects_with_no_dependencies() {
        let tree = sample_tree();
        tree.set_formula("sum", Some("a + + b".to_string())).unwrap();
        let collected = collect(&tree);
        let sum = &collected.fields["sum"];
        assert!(sum.raw_dependencies.is_empty());
        assert_eq!(sum.expression, "a + + b");
    }

    #[test]
    fn test_rebuild_reflects_structural_change() {
        let tree = sample_tree();
        tree.push_default_item("items").unwrap();
        let before = collect(&tree);
        assert_eq!(before.fields.len(), 2);

        tree.push_default_item("items").unwrap();
        let after = collect(&tree);
        assert_eq!(after.fields.len(), 3);
        assert!(after.fields.contains_key("items[1].total"));
    }
}
