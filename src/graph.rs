//! Dependency resolver - forward graph, topological evaluation order,
//! reverse index and the affected-set computation
//!
//! Edges connect computed fields only; a dependency on a plain field is a
//! leaf and is always "ready". The reverse index is the one place plain
//! dependencies survive, because a plain cell changing must still trigger
//! the fields that read it.

use crate::collector::ComputedField;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{BTreeSet, HashMap};

/// Forward adjacency: computed field -> resolved dependency paths that are
/// themselves computed fields
pub fn build_forward_graph(
    fields: &HashMap<String, ComputedField>,
) -> HashMap<String, Vec<String>> {
    fields
        .iter()
        .map(|(field_path, field)| {
            let deps = field
                .resolved_dependencies()
                .into_iter()
                .filter(|dep| fields.contains_key(dep))
                .collect();
            (field_path.clone(), deps)
        })
        .collect()
}

/// Topological evaluation order over the forward graph.
///
/// Dependencies come before dependents. A cycle yields an empty order -
/// all or nothing, never a partial schedule - and every formula freezes
/// until the next rebuild.
pub fn build_evaluation_order(fields: &HashMap<String, ComputedField>) -> Vec<String> {
    let forward = build_forward_graph(fields);

    // Deterministic node insertion so replays of the same tree produce the
    // same order
    let mut paths: Vec<&String> = fields.keys().collect();
    paths.sort();

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices = HashMap::new();
    for path in &paths {
        indices.insert(path.as_str(), graph.add_node(path.as_str()));
    }
    for path in &paths {
        if let Some(deps) = forward.get(path.as_str()) {
            for dep in deps {
                // Edge from dependency to dependent
                graph.add_edge(indices[dep.as_str()], indices[path.as_str()], ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => order
            .into_iter()
            .map(|idx| graph[idx].to_string())
            .collect(),
        Err(cycle) => {
            tracing::warn!(
                field = %graph[cycle.node_id()],
                "circular dependency among computed fields; freezing evaluation"
            );
            Vec::new()
        }
    }
}

/// Reverse index: canonical path of any referenced cell -> computed fields
/// that directly read it. Not filtered to computed-only; plain cells get
/// entries so value listeners can be wired to them.
pub fn build_reverse_index(
    fields: &HashMap<String, ComputedField>,
) -> HashMap<String, BTreeSet<String>> {
    let mut index: HashMap<String, BTreeSet<String>> = HashMap::new();
    for (field_path, field) in fields {
        for dep in field.resolved_dependencies() {
            index.entry(dep).or_default().insert(field_path.clone());
        }
    }
    index
}

/// The minimal, correctly ordered subset of computed fields transitively
/// affected by a set of changed cells.
///
/// One forward scan of the topological order suffices: by the time a field
/// is scanned, every field it depends on has already been classified.
pub fn affected(
    changed_paths: &[String],
    order: &[String],
    fields: &HashMap<String, ComputedField>,
) -> Vec<String> {
    let mut dirty: BTreeSet<&str> = changed_paths.iter().map(String::as_str).collect();
    let mut result = Vec::new();

    for field_path in order {
        let Some(field) = fields.get(field_path) else {
            continue;
        };
        let hit = dirty.contains(field_path.as_str())
            || field
                .resolved_dependencies()
                .iter()
                .any(|dep| dirty.contains(dep.as_str()));
        if hit {
            dirty.insert(field_path.as_str());
            result.push(field_path.clone());
        }
    }

    result
}
