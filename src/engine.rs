//! The engine - lifecycle orchestration over the four stateless services
//!
//! States: `Uninitialized -> Ready <-> Evaluating -> Disposed`. The engine
//! owns the collected artifacts, one value listener per distinct
//! dependency cell, and one structural listener per array discovered at
//! construction. A value change runs the transitively affected subset in
//! topological order; any array-length change anywhere discards and
//! rebuilds everything, because index-based paths change meaning when
//! array contents change.
//!
//! Passes are synchronous and non-reentrant. A value listener firing
//! while a pass runs (a computed field's own write waking another field's
//! watcher) is ignored: the triggering pass's precomputed affected set
//! already contains every transitively dependent field in order. A
//! structural listener firing mid-pass (a tree subscriber appending an
//! item in reaction to a computed write) is deferred: the rebuild runs
//! once, right after the current pass finishes.

use crate::collector::{self, Collected, ComputedField};
use crate::evaluator::{self, ErrorHook};
use crate::graph;
use crate::tree::{ValueTree, WatchId};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};

/// Engine construction options
#[derive(Default)]
pub struct EngineOptions {
    /// Invoked with the field's canonical path when a formula fails to
    /// evaluate
    pub on_error: Option<ErrorHook>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Ready,
    Evaluating,
    Disposed,
}

/// Artifacts rebuilt together, atomically - never partially stale
/// relative to each other
#[derive(Default)]
struct Artifacts {
    collected: Collected,
    order: Vec<String>,
    reverse_index: HashMap<String, BTreeSet<String>>,
}

struct EngineInner {
    tree: ValueTree,
    on_error: Option<ErrorHook>,
    state: Cell<State>,
    /// Structural trigger arrived while a pass was running
    pending_reinit: Cell<bool>,
    artifacts: RefCell<Artifacts>,
    value_watches: RefCell<Vec<WatchId>>,
    structural_watches: RefCell<Vec<WatchId>>,
}

/// A formula dependency engine bound to one value tree.
///
/// Construction runs a full ordered pass; afterwards the engine reacts to
/// tree changes on its own. Dropping the engine disposes it.
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Engine {
    /// Discover computed fields, wire listeners and run the initial full
    /// pass
    pub fn new(tree: &ValueTree, options: EngineOptions) -> Self {
        let inner = Rc::new(EngineInner {
            tree: tree.clone(),
            on_error: options.on_error,
            state: Cell::new(State::Uninitialized),
            pending_reinit: Cell::new(false),
            artifacts: RefCell::new(Artifacts::default()),
            value_watches: RefCell::new(Vec::new()),
            structural_watches: RefCell::new(Vec::new()),
        });

        EngineInner::rebuild_artifacts(&inner);
        EngineInner::attach_structural_listeners(&inner);
        EngineInner::attach_value_listeners(&inner);
        inner.run_full_pass();
        inner.state.set(State::Ready);
        if inner.pending_reinit.take() {
            EngineInner::reinitialize(&inner);
        }

        Self { inner }
    }

    /// Discard and rebuild fields, graph and value listeners, then run a
    /// full pass. Also invoked automatically on any structural change.
    pub fn reinitialize(&self) {
        EngineInner::reinitialize(&self.inner);
    }

    /// Tear down all listeners and artifacts. Terminal: a disposed engine
    /// never reacts to the tree again.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// True once `dispose` has run
    pub fn is_disposed(&self) -> bool {
        self.inner.state.get() == State::Disposed
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.inner.state.get() != State::Disposed {
            self.inner.dispose();
        }
    }
}

impl EngineInner {
    /// Collect fields and rebuild order + reverse index as one atomic
    /// replacement
    fn rebuild_artifacts(inner: &Rc<Self>) {
        let collected = collector::collect(&inner.tree);
        let order = graph::build_evaluation_order(&collected.fields);
        let reverse_index = graph::build_reverse_index(&collected.fields);
        tracing::debug!(
            fields = collected.fields.len(),
            ordered = order.len(),
            "engine artifacts rebuilt"
        );
        *inner.artifacts.borrow_mut() = Artifacts {
            collected,
            order,
            reverse_index,
        };
    }

    /// One structural listener per array discovered at construction; a
    /// trigger tears the engine's view down and rebuilds it
    fn attach_structural_listeners(inner: &Rc<Self>) {
        let arrays = inner.artifacts.borrow().collected.arrays.clone();
        let mut watches = inner.structural_watches.borrow_mut();
        for array_path in arrays {
            let weak = Rc::downgrade(inner);
            let id = inner.tree.watch_length(
                &array_path,
                Rc::new(move |_| {
                    if let Some(inner) = weak.upgrade() {
                        EngineInner::reinitialize(&inner);
                    }
                }),
            );
            watches.push(id);
        }
    }

    /// One value listener per distinct dependency cell, regardless of
    /// fan-out; the reverse index supplies the key set
    fn attach_value_listeners(inner: &Rc<Self>) {
        let mut paths: Vec<String> = inner
            .artifacts
            .borrow()
            .reverse_index
            .keys()
            .cloned()
            .collect();
        paths.sort();

        let mut watches = inner.value_watches.borrow_mut();
        for path in paths {
            let weak: Weak<EngineInner> = Rc::downgrade(inner);
            let id = inner.tree.watch_value(
                &path,
                Rc::new(move |changed| {
                    if let Some(inner) = weak.upgrade() {
                        EngineInner::on_cell_changed(&inner, changed);
                    }
                }),
            );
            watches.push(id);
        }
    }

    fn detach_value_listeners(&self) {
        for id in self.value_watches.borrow_mut().drain(..) {
            self.tree.unwatch(id);
        }
    }

    /// A watched cell changed. Ignored unless Ready: during a pass the
    /// precomputed affected set already covers every dependent field, and
    /// before initialization the construction pass is about to run anyway.
    ///
    /// The batch is cloned out of the artifacts before any field runs, so
    /// the artifacts are never borrowed while listeners can fire.
    fn on_cell_changed(inner: &Rc<Self>, changed_path: &str) {
        if inner.state.get() != State::Ready {
            return;
        }
        inner.state.set(State::Evaluating);
        let batch: Vec<ComputedField> = {
            let artifacts = inner.artifacts.borrow();
            graph::affected(
                &[changed_path.to_string()],
                &artifacts.order,
                &artifacts.collected.fields,
            )
            .iter()
            .filter_map(|path| artifacts.collected.fields.get(path).cloned())
            .collect()
        };
        tracing::debug!(
            changed = changed_path,
            affected = batch.len(),
            "running incremental pass"
        );
        for field in &batch {
            evaluator::evaluate_field(&inner.tree, field, inner.on_error.as_ref());
        }
        inner.state.set(State::Ready);
        if inner.pending_reinit.take() {
            EngineInner::reinitialize(inner);
        }
    }

    /// Evaluate every computed field in topological order under the
    /// evaluating guard
    fn run_full_pass(&self) {
        let previous = self.state.get();
        self.state.set(State::Evaluating);
        let batch: Vec<ComputedField> = {
            let artifacts = self.artifacts.borrow();
            artifacts
                .order
                .iter()
                .filter_map(|path| artifacts.collected.fields.get(path).cloned())
                .collect()
        };
        for field in &batch {
            evaluator::evaluate_field(&self.tree, field, self.on_error.as_ref());
        }
        self.state.set(previous);
    }

    /// Structural listeners and the arrays they watch are left as-is:
    /// every way a new array can appear goes through an already-watched
    /// ancestor array, whose trigger lands here.
    ///
    /// A trigger that arrives while a pass is running is deferred; the
    /// pass that is holding the Evaluating state runs the rebuild as soon
    /// as it finishes.
    fn reinitialize(inner: &Rc<Self>) {
        loop {
            match inner.state.get() {
                State::Disposed => return,
                State::Evaluating => {
                    inner.pending_reinit.set(true);
                    return;
                }
                State::Uninitialized | State::Ready => {}
            }
            inner.detach_value_listeners();
            EngineInner::rebuild_artifacts(inner);
            EngineInner::attach_value_listeners(inner);
            inner.run_full_pass();
            inner.state.set(State::Ready);
            // The rebuild's own pass may have triggered another structural
            // change; rebuild again until the tree shape settles
            if !inner.pending_reinit.take() {
                return;
            }
        }
    }

    fn dispose(&self) {
        self.detach_value_listeners();
        for id in self.structural_watches.borrow_mut().drain(..) {
            self.tree.unwatch(id);
        }
        *self.artifacts.borrow_mut() = Artifacts::default();
        self.pending_reinit.set(false);
        self.state.set(State::Disposed);
    }
}
