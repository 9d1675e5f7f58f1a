//! The live value tree - typed containers, canonical-path addressing and
//! change notification
//!
//! Nodes form an arena addressed by canonical path; "parent" is a string
//! operation on the path, never a stored back-pointer, so the node graph
//! stays acyclic. Mutations commit first, then subscribed callbacks run
//! synchronously before control returns to the mutator. Callbacks fire
//! after the tree's own borrow is released, so a callback may freely read
//! and write the tree again.
//!
//! One tree instance backs one edited record; trees are handles
//! (`Clone` shares the underlying state).

use crate::error::FormcalcError;
use crate::path::{self, Segment};
use crate::schema::{PrimitiveKind, Schema};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A node in the value tree - the closed set of container kinds
#[derive(Debug, Clone)]
pub enum Node {
    /// Ordered, named children
    Object { children: Vec<(String, Node)> },
    /// Ordered items, all shaped by the same item schema
    Array { items: Vec<Node>, item_schema: Schema },
    /// A mutable leaf value with its schema metadata
    Primitive(PrimitiveCell),
}

/// A primitive cell: current value, declared type, schema default and the
/// optional formula that makes it a computed field
#[derive(Debug, Clone)]
pub struct PrimitiveCell {
    pub value: Value,
    pub kind: PrimitiveKind,
    pub default: Value,
    pub formula: Option<String>,
}

/// Opaque handle to one primitive cell.
///
/// The tree owns cell lifetime; a ref only names a cell and is invalidated,
/// like any canonical path, by structural changes to ancestor arrays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellRef {
    path: String,
}

impl CellRef {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Handle for a registered watch callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchId(u64);

/// Watch callback; receives the canonical path that changed
pub type WatchCallback = Rc<dyn Fn(&str)>;

#[derive(Default)]
struct Watchers {
    /// cell path -> value-change callbacks
    value: HashMap<String, Vec<(u64, WatchCallback)>>,
    /// array path -> length-change callbacks
    length: HashMap<String, Vec<(u64, WatchCallback)>>,
}

struct TreeInner {
    root: Node,
    watchers: Watchers,
    next_watch_id: u64,
}

/// Shared handle to a live value tree
#[derive(Clone)]
pub struct ValueTree {
    inner: Rc<RefCell<TreeInner>>,
}

impl ValueTree {
    /// Build the default tree for a schema
    pub fn from_schema(schema: &Schema) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TreeInner {
                root: schema.instantiate(),
                watchers: Watchers::default(),
                next_watch_id: 0,
            })),
        }
    }

    /// Read one primitive cell's current value
    pub fn get_value(&self, path: &str) -> Option<Value> {
        let inner = self.inner.borrow();
        match node_at(&inner.root, path)? {
            Node::Primitive(cell) => Some(cell.value.clone()),
            _ => None,
        }
    }

    /// Write one primitive cell, then notify its value watchers
    pub fn set_value(&self, path: &str, value: Value) -> Result<(), FormcalcError> {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            let node = node_at_mut(&mut inner.root, path)
                .ok_or_else(|| FormcalcError::PathNotFound(path.to_string()))?;
            match node {
                Node::Primitive(cell) => cell.value = value,
                _ => {
                    return Err(FormcalcError::KindMismatch {
                        path: path.to_string(),
                        expected: "a primitive cell",
                    })
                }
            }
            inner.watchers.value.get(path).cloned().unwrap_or_default()
        };
        for (_, callback) in callbacks {
            callback(path);
        }
        Ok(())
    }

    /// Write through a cell handle (same commit-then-notify semantics)
    pub fn write_cell(&self, cell: &CellRef, value: Value) -> Result<(), FormcalcError> {
        self.set_value(cell.path(), value)
    }

    /// Declared type and schema default of a cell
    pub fn cell_schema(&self, cell: &CellRef) -> Option<(PrimitiveKind, Value)> {
        let inner = self.inner.borrow();
        match node_at(&inner.root, cell.path())? {
            Node::Primitive(p) => Some((p.kind, p.default.clone())),
            _ => None,
        }
    }

    /// Replace a primitive cell's formula declaration.
    ///
    /// Editors use this; the engine only notices on its next rebuild, so
    /// callers follow up with `reinitialize`.
    pub fn set_formula(&self, path: &str, formula: Option<String>) -> Result<(), FormcalcError> {
        let mut inner = self.inner.borrow_mut();
        let node = node_at_mut(&mut inner.root, path)
            .ok_or_else(|| FormcalcError::PathNotFound(path.to_string()))?;
        match node {
            Node::Primitive(cell) => {
                cell.formula = formula;
                Ok(())
            }
            _ => Err(FormcalcError::KindMismatch {
                path: path.to_string(),
                expected: "a primitive cell",
            }),
        }
    }

    /// Append a default-valued item to an array, then notify the array's
    /// length watchers. Returns the new item's index.
    pub fn push_default_item(&self, array_path: &str) -> Result<usize, FormcalcError> {
        let (index, callbacks) = {
            let mut inner = self.inner.borrow_mut();
            let node = node_at_mut(&mut inner.root, array_path)
                .ok_or_else(|| FormcalcError::PathNotFound(array_path.to_string()))?;
            let index = match node {
                Node::Array { items, item_schema } => {
                    items.push(item_schema.instantiate());
                    items.len() - 1
                }
                _ => {
                    return Err(FormcalcError::KindMismatch {
                        path: array_path.to_string(),
                        expected: "an array",
                    })
                }
            };
            (
                index,
                inner
                    .watchers
                    .length
                    .get(array_path)
                    .cloned()
                    .unwrap_or_default(),
            )
        };
        for (_, callback) in callbacks {
            callback(array_path);
        }
        Ok(index)
    }

    /// Remove one item from an array, then notify the array's length
    /// watchers. Canonical paths below the array shift meaning.
    pub fn remove_item(&self, array_path: &str, index: usize) -> Result<(), FormcalcError> {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            let node = node_at_mut(&mut inner.root, array_path)
                .ok_or_else(|| FormcalcError::PathNotFound(array_path.to_string()))?;
            match node {
                Node::Array { items, .. } => {
                    if index >= items.len() {
                        return Err(FormcalcError::PathNotFound(format!(
                            "{array_path}[{index}]"
                        )));
                    }
                    items.remove(index);
                }
                _ => {
                    return Err(FormcalcError::KindMismatch {
                        path: array_path.to_string(),
                        expected: "an array",
                    })
                }
            }
            inner
                .watchers
                .length
                .get(array_path)
                .cloned()
                .unwrap_or_default()
        };
        for (_, callback) in callbacks {
            callback(array_path);
        }
        Ok(())
    }

    /// Current item count of an array
    pub fn array_len(&self, array_path: &str) -> Option<usize> {
        let inner = self.inner.borrow();
        match node_at(&inner.root, array_path)? {
            Node::Array { items, .. } => Some(items.len()),
            _ => None,
        }
    }

    /// Deep plain-value snapshot of the whole tree, detached from the
    /// live cells
    pub fn snapshot(&self) -> Value {
        let inner = self.inner.borrow();
        node_to_value(&inner.root)
    }

    /// Subscribe to value changes of one cell path
    pub fn watch_value(&self, path: &str, callback: WatchCallback) -> WatchId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_watch_id;
        inner.next_watch_id += 1;
        inner
            .watchers
            .value
            .entry(path.to_string())
            .or_default()
            .push((id, callback));
        WatchId(id)
    }

    /// Subscribe to length changes of one array path
    pub fn watch_length(&self, array_path: &str, callback: WatchCallback) -> WatchId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_watch_id;
        inner.next_watch_id += 1;
        inner
            .watchers
            .length
            .entry(array_path.to_string())
            .or_default()
            .push((id, callback));
        WatchId(id)
    }

    /// Drop a subscription; unknown ids are a no-op
    pub fn unwatch(&self, id: WatchId) {
        let mut inner = self.inner.borrow_mut();
        for list in inner.watchers.value.values_mut() {
            list.retain(|(wid, _)| *wid != id.0);
        }
        for list in inner.watchers.length.values_mut() {
            list.retain(|(wid, _)| *wid != id.0);
        }
    }

    /// Run a closure against the live root node (collection walks)
    pub(crate) fn with_root<R>(&self, f: impl FnOnce(&Node) -> R) -> R {
        let inner = self.inner.borrow();
        f(&inner.root)
    }
}

fn node_at<'a>(root: &'a Node, path: &str) -> Option<&'a Node> {
    let mut current = root;
    for segment in path::parse(path) {
        current = match (current, segment) {
            (Node::Object { children }, Segment::Field(name)) => children
                .iter()
                .find(|(child_name, _)| *child_name == name)
                .map(|(_, child)| child)?,
            (Node::Array { items, .. }, Segment::Index(n)) => items.get(n)?,
            _ => return None,
        };
    }
    Some(current)
}

fn node_at_mut<'a>(root: &'a mut Node, path: &str) -> Option<&'a mut Node> {
    let mut current = root;
    for segment in path::parse(path) {
        current = match (current, segment) {
            (Node::Object { children }, Segment::Field(name)) => children
                .iter_mut()
                .find(|(child_name, _)| *child_name == name)
                .map(|(_, child)| child)?,
            (Node::Array { items, .. }, Segment::Index(n)) => items.get_mut(n)?,
            _ => return None,
        };
    }
    Some(current)
}

fn node_to_value(node: &Node) -> Value {
    match node {
        Node::Object { children } => Value::Object(
            children
                .iter()
                .map(|(name, child)| (name.clone(), node_to_value(child)))
                .collect(),
        ),
        Node::Array { items, .. } => Value::Array(items.iter().map(node_to_value).collect()),
        Node::Primitive(cell) => cell.value.clone(),
    }
}
