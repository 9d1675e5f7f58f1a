//! End-to-end tests: schema -> value tree -> engine, observed through
//! cell values only.

use formcalc::{Engine, EngineOptions, Schema, ValueTree};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

fn tree_for(schema_json: &str) -> ValueTree {
    let schema = Schema::from_json(schema_json).expect("schema should parse");
    ValueTree::from_schema(&schema)
}

fn number_at(tree: &ValueTree, path: &str) -> f64 {
    tree.get_value(path)
        .unwrap_or_else(|| panic!("no value at {path}"))
        .as_f64()
        .unwrap_or_else(|| panic!("value at {path} is not a number"))
}

#[test]
fn test_simple_formula() {
    let tree = tree_for(
        r#"{
            "type": "object",
            "fields": [
                { "name": "a", "type": "number", "default": 10 },
                { "name": "b", "type": "number", "default": 20 },
                { "name": "sum", "type": "number", "formula": "a + b" }
            ]
        }"#,
    );
    let _engine = Engine::new(&tree, EngineOptions::default());

    assert_eq!(number_at(&tree, "sum"), 30.0);

    tree.set_value("a", json!(50)).unwrap();
    assert_eq!(number_at(&tree, "sum"), 70.0);
}

#[test]
fn test_chained_formulas_respect_topological_order() {
    let tree = tree_for(
        r#"{
            "type": "object",
            "fields": [
                { "name": "a", "type": "number", "default": 5 },
                { "name": "c", "type": "number", "formula": "b + 10" },
                { "name": "b", "type": "number", "formula": "a * 2" }
            ]
        }"#,
    );
    let _engine = Engine::new(&tree, EngineOptions::default());

    assert_eq!(number_at(&tree, "b"), 10.0);
    assert_eq!(number_at(&tree, "c"), 20.0);

    tree.set_value("a", json!(10)).unwrap();
    assert_eq!(number_at(&tree, "b"), 20.0);
    assert_eq!(number_at(&tree, "c"), 30.0);
}

#[test]
fn test_nested_object_with_absolute_path() {
    let tree = tree_for(
        r#"{
            "type": "object",
            "fields": [
                { "name": "multiplier", "type": "number", "default": 10 },
                { "name": "nested", "type": "object", "fields": [
                    { "name": "value", "type": "number", "default": 5 },
                    { "name": "result", "type": "number",
                      "formula": "value * /multiplier" }
                ]}
            ]
        }"#,
    );
    let _engine = Engine::new(&tree, EngineOptions::default());

    assert_eq!(number_at(&tree, "nested.result"), 50.0);

    tree.set_value("multiplier", json!(3)).unwrap();
    assert_eq!(number_at(&tree, "nested.result"), 15.0);
}

const LINE_ITEMS_SCHEMA: &str = r#"{
    "type": "object",
    "fields": [
        { "name": "items", "type": "array", "items": {
            "type": "object",
            "fields": [
                { "name": "price", "type": "number" },
                { "name": "quantity", "type": "number" },
                { "name": "total", "type": "number",
                  "formula": "price * quantity" }
            ]
        }}
    ]
}"#;

fn push_item(tree: &ValueTree, price: f64, quantity: f64) -> usize {
    let index = tree.push_default_item("items").unwrap();
    tree.set_value(&format!("items[{index}].price"), json!(price))
        .unwrap();
    tree.set_value(&format!("items[{index}].quantity"), json!(quantity))
        .unwrap();
    index
}

#[test]
fn test_array_item_formulas_stay_per_item() {
    let tree = tree_for(LINE_ITEMS_SCHEMA);
    push_item(&tree, 10.0, 2.0);
    push_item(&tree, 20.0, 3.0);
    let _engine = Engine::new(&tree, EngineOptions::default());

    assert_eq!(number_at(&tree, "items[0].total"), 20.0);
    assert_eq!(number_at(&tree, "items[1].total"), 60.0);

    tree.set_value("items[0].price", json!(50)).unwrap();
    assert_eq!(number_at(&tree, "items[0].total"), 100.0);
    // The sibling item is untouched
    assert_eq!(number_at(&tree, "items[1].total"), 60.0);
}

#[test]
fn test_structural_rebuild_covers_new_items() {
    let tree = tree_for(LINE_ITEMS_SCHEMA);
    push_item(&tree, 10.0, 2.0);
    let _engine = Engine::new(&tree, EngineOptions::default());
    assert_eq!(number_at(&tree, "items[0].total"), 20.0);

    // Appending re-collects fields, so the new item's own computed sibling
    // is live immediately
    let index = tree.push_default_item("items").unwrap();
    tree.set_value(&format!("items[{index}].quantity"), json!(4))
        .unwrap();
    tree.set_value(&format!("items[{index}].price"), json!(7))
        .unwrap();
    assert_eq!(number_at(&tree, "items[1].total"), 28.0);
    assert_eq!(number_at(&tree, "items[0].total"), 20.0);
}

#[test]
fn test_removal_rebuilds_shifted_paths() {
    let tree = tree_for(LINE_ITEMS_SCHEMA);
    push_item(&tree, 10.0, 2.0);
    push_item(&tree, 20.0, 3.0);
    let _engine = Engine::new(&tree, EngineOptions::default());

    tree.remove_item("items", 0).unwrap();
    // The surviving item now lives at index 0 and its formula still tracks
    // its own siblings
    assert_eq!(number_at(&tree, "items[0].total"), 60.0);
    tree.set_value("items[0].price", json!(5)).unwrap();
    assert_eq!(number_at(&tree, "items[0].total"), 15.0);
}

#[test]
fn test_context_tokens_across_items() {
    let tree = tree_for(
        r##"{
            "type": "object",
            "fields": [
                { "name": "items", "type": "array", "items": {
                    "type": "object",
                    "fields": [
                        { "name": "value", "type": "number" },
                        { "name": "position", "type": "number",
                          "formula": "#index + 1" },
                        { "name": "count", "type": "number",
                          "formula": "#length" },
                        { "name": "prev_value", "type": "number",
                          "formula": "if(isnull(@prev), 0, @prev.value)" },
                        { "name": "is_first", "type": "boolean",
                          "formula": "#first" },
                        { "name": "is_last", "type": "boolean",
                          "formula": "#last" }
                    ]
                }}
            ]
        }"##,
    );
    for value in [10, 20, 30] {
        let index = tree.push_default_item("items").unwrap();
        tree.set_value(&format!("items[{index}].value"), json!(value))
            .unwrap();
    }
    let _engine = Engine::new(&tree, EngineOptions::default());

    for index in 0..3 {
        assert_eq!(
            number_at(&tree, &format!("items[{index}].position")),
            (index + 1) as f64
        );
        assert_eq!(number_at(&tree, &format!("items[{index}].count")), 3.0);
    }

    assert_eq!(number_at(&tree, "items[0].prev_value"), 0.0);
    assert_eq!(number_at(&tree, "items[1].prev_value"), 10.0);
    assert_eq!(number_at(&tree, "items[2].prev_value"), 20.0);

    assert_eq!(tree.get_value("items[0].is_first"), Some(json!(true)));
    assert_eq!(tree.get_value("items[1].is_first"), Some(json!(false)));
    assert_eq!(tree.get_value("items[2].is_first"), Some(json!(false)));
    assert_eq!(tree.get_value("items[0].is_last"), Some(json!(false)));
    assert_eq!(tree.get_value("items[1].is_last"), Some(json!(false)));
    assert_eq!(tree.get_value("items[2].is_last"), Some(json!(true)));
}

#[test]
fn test_cycle_freezes_until_formula_edit() {
    let tree = tree_for(
        r#"{
            "type": "object",
            "fields": [
                { "name": "a", "type": "number", "default": 1 },
                { "name": "x", "type": "number", "default": 100,
                  "formula": "y + a" },
                { "name": "y", "type": "number", "default": 200,
                  "formula": "x + a" }
            ]
        }"#,
    );
    let engine = Engine::new(&tree, EngineOptions::default());

    // Cycle: empty order, nothing evaluates; values stay as they were
    assert_eq!(number_at(&tree, "x"), 100.0);
    assert_eq!(number_at(&tree, "y"), 200.0);

    tree.set_value("a", json!(5)).unwrap();
    assert_eq!(number_at(&tree, "x"), 100.0);
    assert_eq!(number_at(&tree, "y"), 200.0);

    // Breaking the cycle and rebuilding restores normal evaluation
    tree.set_formula("y", Some("41".to_string())).unwrap();
    engine.reinitialize();
    assert_eq!(number_at(&tree, "y"), 41.0);
    assert_eq!(number_at(&tree, "x"), 46.0);

    tree.set_value("a", json!(9)).unwrap();
    assert_eq!(number_at(&tree, "x"), 50.0);
}

#[test]
fn test_reinitialize_is_idempotent() {
    let tree = tree_for(LINE_ITEMS_SCHEMA);
    push_item(&tree, 10.0, 2.0);
    push_item(&tree, 20.0, 3.0);
    let engine = Engine::new(&tree, EngineOptions::default());

    tree.set_value("items[1].quantity", json!(7)).unwrap();
    let before = tree.snapshot();
    engine.reinitialize();
    assert_eq!(tree.snapshot(), before);
    engine.reinitialize();
    assert_eq!(tree.snapshot(), before);
}

#[test]
fn test_dispose_makes_engine_inert() {
    let tree = tree_for(
        r#"{
            "type": "object",
            "fields": [
                { "name": "a", "type": "number", "default": 10 },
                { "name": "double", "type": "number", "formula": "a * 2" }
            ]
        }"#,
    );
    let engine = Engine::new(&tree, EngineOptions::default());
    assert_eq!(number_at(&tree, "double"), 20.0);

    engine.dispose();
    tree.set_value("a", json!(99)).unwrap();
    assert_eq!(number_at(&tree, "double"), 20.0);

    tree.push_default_item("items").unwrap_err();
}

#[test]
fn test_failing_formula_resets_and_reports_without_blocking_others() {
    let tree = tree_for(
        r#"{
            "type": "object",
            "fields": [
                { "name": "a", "type": "number", "default": 3 },
                { "name": "broken", "type": "number", "default": -1,
                  "formula": "explode(a)" },
                { "name": "fine", "type": "number", "formula": "a * 2" }
            ]
        }"#,
    );

    let errors: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let errors_handle = errors.clone();
    let _engine = Engine::new(
        &tree,
        EngineOptions {
            on_error: Some(Box::new(move |path, error| {
                errors_handle.borrow_mut().push(format!("{path}: {error}"));
            })),
        },
    );

    // The bad formula resets to its default; the good one still ran
    assert_eq!(number_at(&tree, "broken"), -1.0);
    assert_eq!(number_at(&tree, "fine"), 6.0);
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].starts_with("broken: "));
}

#[test]
fn test_string_and_boolean_targets_coerce() {
    let tree = tree_for(
        r#"{
            "type": "object",
            "fields": [
                { "name": "first", "type": "string", "default": "Ada" },
                { "name": "last", "type": "string", "default": "Lovelace" },
                { "name": "full", "type": "string",
                  "formula": "concat(first, \" \", last)" },
                { "name": "count", "type": "number", "default": 2 },
                { "name": "label", "type": "string", "formula": "count + 1" },
                { "name": "has_items", "type": "boolean",
                  "formula": "count > 0" }
            ]
        }"#,
    );
    let _engine = Engine::new(&tree, EngineOptions::default());

    assert_eq!(tree.get_value("full"), Some(json!("Ada Lovelace")));
    // Number result coerced into the string target
    assert_eq!(tree.get_value("label"), Some(json!("3")));
    assert_eq!(tree.get_value("has_items"), Some(json!(true)));

    tree.set_value("count", json!(0)).unwrap();
    assert_eq!(tree.get_value("has_items"), Some(json!(false)));
}

#[test]
fn test_parent_relative_dependency() {
    let tree = tree_for(
        r#"{
            "type": "object",
            "fields": [
                { "name": "rate", "type": "number", "default": 2 },
                { "name": "order", "type": "object", "fields": [
                    { "name": "net", "type": "number", "default": 100 },
                    { "name": "gross", "type": "number",
                      "formula": "net * ../rate" }
                ]}
            ]
        }"#,
    );
    let _engine = Engine::new(&tree, EngineOptions::default());

    assert_eq!(number_at(&tree, "order.gross"), 200.0);
    tree.set_value("rate", json!(3)).unwrap();
    assert_eq!(number_at(&tree, "order.gross"), 300.0);
}
