use serde_json::Value;

/// Walks a dotted path (`a.b.c`) through nested objects. String values that hold
/// a JSON document are decoded before descending.
pub fn lookup_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root.clone();
    for component in path.split('.') {
        let next = match current {
            Value::Object(mut map) => map.remove(component),
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(mut map)) => map.remove(component),
                _ => None,
            },
            _ => None,
        };
        match next {
            None | Some(Value::Null) => return None,
            Some(value) => current = value,
        }
    }
    Some(current)
}

/// Renders a scalar as a lookup key: strings as-is, booleans as `true`/`false`,
/// numbers without quotes. Null has no key.
pub fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        other => Some(other.to_string()),
    }
}
