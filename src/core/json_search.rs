use serde_json::Value;

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
    }
}

/// Depth-first search for the first truthy value stored under `key`, visiting
/// object members and array elements in document order.
pub fn find_first<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key).filter(|v| is_truthy(v)) {
                return Some(found);
            }
            map.values().find_map(|child| find_first(child, key))
        }
        Value::Array(items) => items.iter().find_map(|child| find_first(child, key)),
        _ => None,
    }
}

/// First non-empty string found for any of `keys`, tried in order.
pub fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        find_first(value, key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    })
}
