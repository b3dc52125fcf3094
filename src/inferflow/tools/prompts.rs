//! Prompt Template Tool
//!
//! Loads prompt templates from a flat template directory, caches them, and
//! renders them with ``{name}`` placeholder substitution. Template names map
//! to files: `"instruction"` resolves to `instruction.txt` (or the bare file
//! name when it already has an extension).
//!
//! Rendering functions built with `create_template_function` are second-order
//! tools, so monitored agents see each render as its own event.

use crate::inferflow::tools::{substitute_placeholders, PromptTemplates, ToolError, ToolFn};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

struct PromptStoreInner {
    template_dir: PathBuf,
    cache: RwLock<HashMap<String, String>>,
    hits: RwLock<u64>,
    misses: RwLock<u64>,
}

/// Directory-backed prompt template store with a read-through cache.
#[derive(Clone)]
pub struct PromptStoreTool {
    inner: Arc<PromptStoreInner>,
}

impl PromptStoreTool {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(PromptStoreInner {
                template_dir: template_dir.into(),
                cache: RwLock::new(HashMap::new()),
                hits: RwLock::new(0),
                misses: RwLock::new(0),
            }),
        }
    }

    fn template_path(&self, template_name: &str) -> PathBuf {
        let mut path = self.inner.template_dir.join(template_name);
        if path.extension().is_none() {
            path.set_extension("txt");
        }
        path
    }
}

#[async_trait]
impl PromptTemplates for PromptStoreTool {
    async fn read(&self, template_name: &str) -> Result<String, ToolError> {
        if let Some(content) = self.inner.cache.read().await.get(template_name) {
            *self.inner.hits.write().await += 1;
            return Ok(content.clone());
        }
        *self.inner.misses.write().await += 1;
        let path = self.template_path(template_name);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound(format!("template '{}'", template_name))
            } else {
                ToolError::Io(format!("cannot read template '{}': {}", template_name, e))
            }
        })?;
        self.inner
            .cache
            .write()
            .await
            .insert(template_name.to_string(), content.clone());
        Ok(content)
    }

    async fn render(
        &self,
        template_name: &str,
        variables: &serde_json::Value,
    ) -> Result<String, ToolError> {
        let template = self.read(template_name).await?;
        Ok(substitute_placeholders(&template, variables))
    }

    fn create_template_function(&self, template: &str) -> Result<ToolFn, ToolError> {
        let template = template.to_string();
        Ok(ToolFn::new("template_function", move |params| {
            let template = template.clone();
            Box::pin(async move {
                Ok(serde_json::Value::String(substitute_placeholders(
                    &template, &params,
                )))
            })
        }))
    }

    async fn drop_cached(&self, template_name: &str) {
        self.inner.cache.write().await.remove(template_name);
    }

    async fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "template_dir": self.inner.template_dir.display().to_string(),
            "cached_templates": self.inner.cache.read().await.len(),
            "hits": *self.inner.hits.read().await,
            "misses": *self.inner.misses.read().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(templates: &[(&str, &str)]) -> (tempfile::TempDir, PromptStoreTool) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in templates {
            std::fs::write(dir.path().join(format!("{}.txt", name)), content).unwrap();
        }
        let store = PromptStoreTool::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn reads_and_caches_templates() {
        let (_dir, store) = store_with(&[("greet", "Hello {name}!")]);
        assert_eq!(store.read("greet").await.unwrap(), "Hello {name}!");
        assert_eq!(store.read("greet").await.unwrap(), "Hello {name}!");
        let stats = store.stats().await;
        assert_eq!(stats["hits"], serde_json::json!(1));
        assert_eq!(stats["misses"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn renders_with_substitution() {
        let (_dir, store) = store_with(&[("greet", "Hello {name}!")]);
        let out = store
            .render("greet", &serde_json::json!({"name": "World"}))
            .await
            .unwrap();
        assert_eq!(out, "Hello World!");
    }

    #[tokio::test]
    async fn missing_templates_are_not_found() {
        let (_dir, store) = store_with(&[]);
        assert!(matches!(
            store.read("absent").await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn drop_cached_forces_a_reload() {
        let (dir, store) = store_with(&[("t", "one")]);
        assert_eq!(store.read("t").await.unwrap(), "one");
        std::fs::write(dir.path().join("t.txt"), "two").unwrap();
        // Cached copy still served until dropped.
        assert_eq!(store.read("t").await.unwrap(), "one");
        store.drop_cached("t").await;
        assert_eq!(store.read("t").await.unwrap(), "two");
    }

    #[tokio::test]
    async fn template_functions_render_their_parameters() {
        let (_dir, store) = store_with(&[]);
        let function = store.create_template_function("sum of {a} and {b}").unwrap();
        let out = function
            .invoke(serde_json::json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("sum of 1 and 2"));
    }
}
