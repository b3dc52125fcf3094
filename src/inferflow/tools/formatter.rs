//! Formatter Tool
//!
//! Pure text-shaping helpers shared by actuation steps: template functions,
//! `key: value` block parsing of model responses, and the element wrapper
//! notation used inside references (`%(element)`, optionally typed as
//! `%{tag}(element)`).

use crate::inferflow::tools::{substitute_placeholders, Formatter, ToolFn};

/// Stateless formatter.
#[derive(Clone, Default)]
pub struct FormatterTool;

impl FormatterTool {
    pub fn new() -> Self {
        Self
    }
}

impl Formatter for FormatterTool {
    fn create_template_function(&self, template: &str) -> ToolFn {
        let template = template.to_string();
        ToolFn::new("template_function", move |params| {
            let template = template.clone();
            Box::pin(async move {
                Ok(serde_json::Value::String(substitute_placeholders(
                    &template, &params,
                )))
            })
        })
    }

    /// Parse a `key: value` block response.
    ///
    /// A line like `name: text` starts a new entry; subsequent lines without
    /// a key continue the previous value. Lines before the first key are
    /// ignored.
    fn parse(&self, raw: &str) -> serde_json::Value {
        let mut entries = serde_json::Map::new();
        let mut current_key: Option<String> = None;
        let mut current_value = String::new();

        let commit =
            |entries: &mut serde_json::Map<String, serde_json::Value>,
             key: &Option<String>,
             value: &str| {
                if let Some(key) = key {
                    entries.insert(
                        key.clone(),
                        serde_json::Value::String(value.trim().to_string()),
                    );
                }
            };

        for line in raw.lines() {
            let looks_like_key = line
                .split_once(':')
                .map(|(head, _)| {
                    !head.trim().is_empty()
                        && head
                            .trim()
                            .chars()
                            .all(|c| c.is_alphanumeric() || c == '_' || c == ' ' || c == '-')
                })
                .unwrap_or(false);
            if looks_like_key {
                commit(&mut entries, &current_key, &current_value);
                let (head, tail) = line.split_once(':').unwrap();
                current_key = Some(head.trim().to_string());
                current_value = tail.trim().to_string();
            } else if current_key.is_some() {
                if !current_value.is_empty() {
                    current_value.push('\n');
                }
                current_value.push_str(line.trim_end());
            }
        }
        commit(&mut entries, &current_key, &current_value);
        serde_json::Value::Object(entries)
    }

    fn wrap(&self, data: &serde_json::Value, type_tag: Option<&str>) -> String {
        let text = match data {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match type_tag {
            Some(tag) => format!("%{{{}}}({})", tag, text),
            None => format!("%({})", text),
        }
    }

    fn strip(&self, element: &str) -> String {
        if element.starts_with("%(") && element.ends_with(')') {
            return element[2..element.len() - 1].to_string();
        }
        // Typed wrapper: %{tag}(data)
        if element.starts_with("%{") && element.ends_with(')') {
            if let Some(open) = element.find("}(") {
                return element[open + 2..element.len() - 1].to_string();
            }
        }
        element.to_string()
    }

    fn get(
        &self,
        dictionary: &serde_json::Value,
        key: &str,
        default: serde_json::Value,
    ) -> serde_json::Value {
        dictionary.get(key).cloned().unwrap_or(default)
    }
}
