//! Path operations on a JSON tree.
//!
//! The tree follows realtime-database conventions: `null` and empty objects
//! are "no value", deleting a leaf prunes parents left empty, and writing a
//! path replaces the whole subtree below it.

use serde_json::{Map, Value};

use super::CONNECTED_PATH;

/// Non-empty segments of `path`.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Canonical form of `path` (no leading, trailing or doubled slashes).
pub fn normalize(path: &str) -> String {
    segments(path).join("/")
}

/// Paths under `.info` are owned by the transport and cannot be written.
pub fn is_reserved(path: &str) -> bool {
    segments(path).first().is_some_and(|s| *s == ".info")
}

pub fn is_connected_path(path: &str) -> bool {
    normalize(path) == CONNECTED_PATH
}

/// Check that `path` can be written.
pub fn validate_write_path(path: &str) -> Result<(), String> {
    let segs = segments(path);
    if segs.is_empty() {
        return Err("Refusing to overwrite the tree root".to_string());
    }
    if is_reserved(path) {
        return Err(format!("Path '{}' is reserved", path));
    }
    if segs.iter().any(|s| *s == "." || *s == "..") {
        return Err(format!("Path '{}' contains a relative segment", path));
    }
    Ok(())
}

/// Whether a write at one path can change the value seen at the other:
/// true when either is a segment prefix of the other.
pub fn overlaps(a: &str, b: &str) -> bool {
    let a = segments(a);
    let b = segments(b);
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Value at `path`, or `None` when absent.
pub fn get_at(root: &Value, path: &str) -> Option<Value> {
    let mut node = root;
    for segment in segments(path) {
        node = node.as_object()?.get(segment)?;
    }
    if is_empty(node) {
        None
    } else {
        Some(node.clone())
    }
}

/// Replace the subtree at `path` with `value`. Writing `null` (or an empty
/// object) deletes the subtree and prunes emptied parents.
pub fn set_at(root: &mut Value, path: &str, value: Value) {
    let value = prune(value);
    let segs = segments(path);
    set_segments(root, &segs, value);
    if is_empty(root) {
        *root = Value::Null;
    }
}

fn set_segments(node: &mut Value, segs: &[&str], value: Value) {
    let Some((first, rest)) = segs.split_first() else {
        *node = value;
        return;
    };

    if value.is_null() {
        if let Value::Object(map) = node {
            if rest.is_empty() {
                map.remove(*first);
            } else if let Some(child) = map.get_mut(*first) {
                set_segments(child, rest, Value::Null);
                if is_empty(child) {
                    map.remove(*first);
                }
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        set_segments(child, rest, value);
    }
}

/// Drop `null` members and empty objects, recursively.
pub fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if pruned.is_empty() {
                Value::Null
            } else {
                Value::Object(pruned)
            }
        }
        other => other,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
