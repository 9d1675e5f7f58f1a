//! Canonical path handling - the addressing scheme for cells in a value tree
//!
//! A canonical path is a dot-separated list of field names with `[n]`
//! suffixes for array indices, e.g. `items[2].price`. The empty string
//! addresses the tree root. Paths are only meaningful for the current tree
//! shape: any structural change to an ancestor array invalidates them.

use serde_json::Value;

/// One segment of a parsed canonical path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

/// Resolve a raw dependency token against the declaring field's
/// enclosing-container path.
///
/// Three forms are supported:
/// - `/x.y` - absolute from the root; the leading `/` is stripped and the
///   remainder is already canonical
/// - `../x` - parent-relative; each `../` climbs the container path one
///   segment. Climbing past the root clamps: leftover `../` prefixes are
///   dropped and the remainder resolves from the root
/// - `x.y` - sibling-relative; concatenated onto the container path
pub fn resolve_dependency(token: &str, container_path: &str) -> String {
    if let Some(rest) = token.strip_prefix('/') {
        return rest.to_string();
    }

    let mut rest = token;
    let mut container = container_path;
    while let Some(stripped) = rest.strip_prefix("../") {
        rest = stripped;
        container = parent_path(container);
    }

    if rest.is_empty() {
        container.to_string()
    } else if container.is_empty() {
        rest.to_string()
    } else {
        format!("{container}.{rest}")
    }
}

/// Truncate a canonical path at its last segment boundary (`.` or `[`).
/// The root's parent is the root itself (empty path).
pub fn parent_path(path: &str) -> &str {
    match path.rfind(['.', '[']) {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Tokenize a canonical path into field/index segments.
///
/// Malformed bracket contents degrade to field segments so that a later
/// lookup misses instead of panicking.
pub fn parse(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = path;

    while !rest.is_empty() {
        if let Some(inner) = rest.strip_prefix('[') {
            match inner.find(']') {
                Some(end) => {
                    let raw = &inner[..end];
                    match raw.parse::<usize>() {
                        Ok(n) => segments.push(Segment::Index(n)),
                        Err(_) => segments.push(Segment::Field(format!("[{raw}]"))),
                    }
                    rest = &inner[end + 1..];
                }
                None => {
                    segments.push(Segment::Field(rest.to_string()));
                    break;
                }
            }
        } else {
            let rest_trimmed = rest.strip_prefix('.').unwrap_or(rest);
            let end = rest_trimmed
                .find(['.', '['])
                .unwrap_or(rest_trimmed.len());
            if end > 0 {
                segments.push(Segment::Field(rest_trimmed[..end].to_string()));
            }
            rest = &rest_trimmed[end..];
        }
    }

    segments
}

/// Walk a plain snapshot value by canonical path.
///
/// Returns `None` on any missing key, non-container intermediate, or
/// out-of-range index - never panics.
pub fn lookup<'a>(snapshot: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = snapshot;
    for segment in parse(path) {
        current = match segment {
            Segment::Field(name) => current.as_object()?.get(&name)?,
            Segment::Index(n) => current.as_array()?.get(n)?,
        };
    }
    Some(current)
}
