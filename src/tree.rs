// Pure helpers over JSON document trees
//
// The tree never stores empty objects or nulls: setting null removes a node,
// and a mapping whose last child is removed disappears with it.

use serde_json::{Map, Value};

/// Value at `rel` below `root`, `Value::Null` when absent
pub fn get_at(root: &Value, rel: &[String]) -> Value {
    let mut node = root;
    for key in rel {
        match node.get(key.as_str()) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

/// Overwrite the value at `rel` wholesale; `null` deletes
pub fn set_at(root: &mut Value, rel: &[String], value: Value) {
    let value = normalize(value);
    let Some((head, rest)) = rel.split_first() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove_at(root, rel);
        return;
    }

    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    if let Value::Object(map) = root {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

/// Delete the node at `rel`, pruning mappings left empty
pub fn remove_at(root: &mut Value, rel: &[String]) {
    let Some((head, rest)) = rel.split_first() else {
        *root = Value::Null;
        return;
    };

    let Value::Object(map) = &mut *root else {
        return;
    };

    if rest.is_empty() {
        map.remove(head.as_str());
    } else if let Some(child) = map.get_mut(head.as_str()) {
        remove_at(child, rest);
        if child.is_null() {
            map.remove(head.as_str());
        }
    }

    if map.is_empty() {
        *root = Value::Null;
    }
}

/// Merge `children` into the mapping at `rel`, one child at a time
pub fn merge_at(root: &mut Value, rel: &[String], children: Map<String, Value>) {
    for (key, child) in children {
        let mut path = rel.to_vec();
        path.extend(key.split('/').filter(|s| !s.is_empty()).map(str::to_string));
        set_at(root, &path, child);
    }
}

/// Drop nulls and empty mappings recursively
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other,
    }
}
