//! Input/Output Sanitisation
//!
//! Tool call events carry shallow copies of the arguments and results that
//! crossed a monitored tool boundary. Payloads can be arbitrarily large (file
//! contents, generated scripts, whole references), so everything is run
//! through a bounded recursive serialisation before it reaches an event:
//!
//! - recursion stops at [`MAX_DEPTH`],
//! - strings longer than [`MAX_STRING_LEN`] are truncated with a
//!   `"… [truncated, total N chars]"` suffix,
//! - arrays keep at most [`MAX_ARRAY_ITEMS`] items,
//! - objects keep at most [`MAX_MAP_KEYS`] keys,
//! - byte payloads are replaced by a `"<bytes: N bytes>"` size marker.
//!
//! The goal is loss-free-enough diagnostics without unbounded memory.

use serde_json::{Map, Value};

/// Maximum recursion depth before a value is replaced with a marker.
pub const MAX_DEPTH: usize = 10;
/// Maximum retained string length.
pub const MAX_STRING_LEN: usize = 50_000;
/// Maximum retained array items.
pub const MAX_ARRAY_ITEMS: usize = 100;
/// Maximum retained object keys.
pub const MAX_MAP_KEYS: usize = 50;

/// Sanitise a JSON value with the default bounds.
pub fn sanitize(value: &Value) -> Value {
    sanitize_at(value, 0)
}

fn sanitize_at(value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String("<max depth exceeded>".to_string());
    }
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(s) => sanitize_text(s),
        Value::Array(items) => {
            let mut kept: Vec<Value> = items
                .iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|item| sanitize_at(item, depth + 1))
                .collect();
            if items.len() > MAX_ARRAY_ITEMS {
                kept.push(Value::String(format!(
                    "... and {} more items",
                    items.len() - MAX_ARRAY_ITEMS
                )));
            }
            Value::Array(kept)
        }
        Value::Object(entries) => {
            let mut kept = Map::new();
            for (i, (key, item)) in entries.iter().enumerate() {
                if i >= MAX_MAP_KEYS {
                    kept.insert(
                        "...".to_string(),
                        Value::String(format!("{} more keys", entries.len() - MAX_MAP_KEYS)),
                    );
                    break;
                }
                kept.insert(key.clone(), sanitize_at(item, depth + 1));
            }
            Value::Object(kept)
        }
    }
}

/// Sanitise a string, truncating with the total-length suffix.
pub fn sanitize_text(text: &str) -> Value {
    if text.chars().count() > MAX_STRING_LEN {
        let kept: String = text.chars().take(MAX_STRING_LEN).collect();
        Value::String(format!(
            "{}... [truncated, total {} chars]",
            kept,
            text.chars().count()
        ))
    } else {
        Value::String(text.to_string())
    }
}

/// Size marker standing in for a byte payload.
pub fn bytes_marker(len: usize) -> Value {
    Value::String(format!("<bytes: {} bytes>", len))
}

/// Sanitise a typed object: the value's fields under a `_type` tag.
pub fn sanitize_typed(type_name: &str, value: &Value) -> Value {
    match sanitize(value) {
        Value::Object(mut entries) => {
            let mut tagged = Map::new();
            tagged.insert("_type".to_string(), Value::String(type_name.to_string()));
            tagged.append(&mut entries);
            Value::Object(tagged)
        }
        other => {
            let mut tagged = Map::new();
            tagged.insert("_type".to_string(), Value::String(type_name.to_string()));
            tagged.insert("_value".to_string(), other);
            Value::Object(tagged)
        }
    }
}

/// Sanitise a named-argument list into one object, the shape tool events use
/// for their `inputs` field.
pub fn sanitize_inputs(arguments: &[(&str, Value)]) -> Value {
    let mut entries = Map::new();
    for (name, value) in arguments {
        entries.insert((*name).to_string(), sanitize(value));
    }
    Value::Object(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_pass_through() {
        assert_eq!(sanitize(&json!(true)), json!(true));
        assert_eq!(sanitize(&json!(42)), json!(42));
        assert_eq!(sanitize(&json!("short")), json!("short"));
    }

    #[test]
    fn long_strings_are_truncated_with_total() {
        let long = "x".repeat(MAX_STRING_LEN + 5);
        let out = sanitize(&json!(long));
        let text = out.as_str().unwrap();
        assert!(text.ends_with(&format!("[truncated, total {} chars]", MAX_STRING_LEN + 5)));
        assert!(text.len() < long.len() + 64);
    }

    #[test]
    fn wide_arrays_and_maps_are_truncated() {
        let wide: Vec<u32> = (0..150).collect();
        let out = sanitize(&json!(wide));
        let items = out.as_array().unwrap();
        assert_eq!(items.len(), MAX_ARRAY_ITEMS + 1);
        assert_eq!(items[MAX_ARRAY_ITEMS], json!("... and 50 more items"));

        let mut map = Map::new();
        for i in 0..60 {
            map.insert(format!("k{:02}", i), json!(i));
        }
        let out = sanitize(&Value::Object(map));
        let entries = out.as_object().unwrap();
        assert_eq!(entries.len(), MAX_MAP_KEYS + 1);
        assert_eq!(entries["..."], json!("10 more keys"));
    }

    #[test]
    fn depth_is_bounded() {
        let mut value = json!("leaf");
        for _ in 0..(MAX_DEPTH + 3) {
            value = json!([value]);
        }
        let mut cursor = &sanitize(&value);
        let mut depth = 0;
        while let Some(items) = cursor.as_array() {
            cursor = &items[0];
            depth += 1;
        }
        assert!(depth <= MAX_DEPTH + 1);
        assert_eq!(cursor, &json!("<max depth exceeded>"));
    }

    #[test]
    fn typed_objects_carry_a_type_tag() {
        let out = sanitize_typed("Reference", &json!({"axes": ["a"]}));
        assert_eq!(out["_type"], json!("Reference"));
        assert_eq!(out["axes"], json!(["a"]));

        let scalar = sanitize_typed("Weird", &json!(3));
        assert_eq!(scalar["_value"], json!(3));
    }

    #[test]
    fn bytes_render_as_size_marker() {
        assert_eq!(bytes_marker(1024), json!("<bytes: 1024 bytes>"));
    }
}
