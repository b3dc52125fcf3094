//! Language Model Tool
//!
//! The language-model leaf that perception/actuation steps invoke. The tool
//! speaks the chat-completions wire shape over HTTP (any OpenAI-compatible
//! endpoint works, which covers the hosted providers and local gateways), and
//! falls back to a **mock mode** when no provider is configured: canned
//! responses keyed by prompt substring, so sequences stay runnable offline
//! and in tests.
//!
//! Besides the one-shot [`generate`](crate::inferflow::tools::LanguageModel::generate),
//! the tool builds *generation functions*: reusable callables over a prompt
//! template that actuator steps store inside references and later apply cell
//! by cell. Those callables are second-order tools; the monitored decorator
//! re-wraps them so each application emits its own events.
//!
//! # Example
//!
//! ```rust,no_run
//! use inferflow::tools::{LanguageModel, LanguageModelTool, ProviderConfig};
//!
//! # async {
//! let tool = LanguageModelTool::new(
//!     "gpt-4o-mini",
//!     Some(ProviderConfig {
//!         endpoint: "https://api.openai.com/v1".to_string(),
//!         api_key: std::env::var("OPEN_AI_SECRET").unwrap(),
//!     }),
//! );
//! let answer = tool.generate("capital of France?", None).await?;
//! # Ok::<(), inferflow::tools::ToolError>(())
//! # };
//! ```

use crate::inferflow::tools::{substitute_placeholders, LanguageModel, ToolError, ToolFn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Provider binding: endpoint base URL plus credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible API, without the trailing
    /// `/chat/completions`.
    pub endpoint: String,
    pub api_key: String,
}

#[derive(Default)]
struct UsageStats {
    generate_calls: u64,
    prompt_chars: u64,
    response_chars: u64,
}

struct LanguageModelInner {
    model_name: String,
    provider: Option<ProviderConfig>,
    http: reqwest::Client,
    /// Mock responses, matched by substring against the prompt.
    mock_responses: Mutex<HashMap<String, String>>,
    stats: Mutex<UsageStats>,
}

/// Chat-completion language model with mock fallback.
#[derive(Clone)]
pub struct LanguageModelTool {
    inner: Arc<LanguageModelInner>,
}

impl LanguageModelTool {
    /// Create a tool bound to `model_name`. Without a provider the tool runs
    /// in mock mode.
    pub fn new(model_name: impl Into<String>, provider: Option<ProviderConfig>) -> Self {
        Self {
            inner: Arc::new(LanguageModelInner {
                model_name: model_name.into(),
                provider,
                http: reqwest::Client::new(),
                mock_responses: Mutex::new(HashMap::new()),
                stats: Mutex::new(UsageStats::default()),
            }),
        }
    }

    /// Create a mock tool preloaded with prompt-substring → response pairs.
    pub fn mock(model_name: impl Into<String>, responses: &[(&str, &str)]) -> Self {
        let tool = Self::new(model_name, None);
        {
            let mut mock = tool.inner.mock_responses.lock().unwrap();
            for (needle, response) in responses {
                mock.insert((*needle).to_string(), (*response).to_string());
            }
        }
        tool
    }

    /// Register one more mock response.
    pub fn add_mock_response(&self, needle: &str, response: &str) {
        self.inner
            .mock_responses
            .lock()
            .unwrap()
            .insert(needle.to_string(), response.to_string());
    }

    /// True when no provider is configured.
    pub fn mock_mode(&self) -> bool {
        self.inner.provider.is_none()
    }

    fn mock_generate(&self, prompt: &str) -> String {
        let responses = self.inner.mock_responses.lock().unwrap();
        for (needle, response) in responses.iter() {
            if prompt.contains(needle.as_str()) {
                return response.clone();
            }
        }
        format!("[mock:{}] {}", self.inner.model_name, prompt)
    }

    async fn http_generate(
        &self,
        provider: &ProviderConfig,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, ToolError> {
        let mut messages = Vec::new();
        if let Some(system) = system_message {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));
        let body = serde_json::json!({
            "model": self.inner.model_name,
            "messages": messages,
        });

        let url = format!("{}/chat/completions", provider.endpoint.trim_end_matches('/'));
        let response = self
            .inner
            .http
            .post(&url)
            .bearer_auth(&provider.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("chat request failed: {}", e)))?;

        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("chat response unreadable: {}", e)))?;
        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown provider error");
            log::error!(
                "LanguageModelTool::generate: provider returned {}: {}",
                status,
                message
            );
            return Err(ToolError::ExecutionFailed(format!(
                "provider returned {}: {}",
                status, message
            )));
        }
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ToolError::ExecutionFailed("provider response had no message content".to_string())
            })
    }
}

#[async_trait]
impl LanguageModel for LanguageModelTool {
    fn model_name(&self) -> String {
        self.inner.model_name.clone()
    }

    async fn generate(
        &self,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, ToolError> {
        let response = match &self.inner.provider {
            None => self.mock_generate(prompt),
            Some(provider) => self.http_generate(provider, prompt, system_message).await?,
        };
        let mut stats = self.inner.stats.lock().unwrap();
        stats.generate_calls += 1;
        stats.prompt_chars += prompt.chars().count() as u64;
        stats.response_chars += response.chars().count() as u64;
        Ok(response)
    }

    async fn run_prompt(
        &self,
        template: &str,
        variables: &serde_json::Value,
    ) -> Result<String, ToolError> {
        let prompt = substitute_placeholders(template, variables);
        self.generate(&prompt, None).await
    }

    fn create_generation_function(&self, template: &str) -> Result<ToolFn, ToolError> {
        let tool = self.clone();
        let template = template.to_string();
        Ok(ToolFn::new("generation_function", move |params| {
            let tool = tool.clone();
            let template = template.clone();
            Box::pin(async move {
                let prompt = substitute_placeholders(&template, &params);
                let response = tool.generate(&prompt, None).await?;
                Ok(serde_json::Value::String(response))
            })
        }))
    }

    fn stats(&self) -> serde_json::Value {
        let stats = self.inner.stats.lock().unwrap();
        serde_json::json!({
            "model": self.inner.model_name,
            "mock_mode": self.mock_mode(),
            "generate_calls": stats.generate_calls,
            "prompt_chars": stats.prompt_chars,
            "response_chars": stats.response_chars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_mode_matches_by_substring() {
        let tool = LanguageModelTool::mock("test-model", &[("capital of France", "PARIS")]);
        assert!(tool.mock_mode());
        assert_eq!(
            tool.generate("capital of France?", None).await.unwrap(),
            "PARIS"
        );
    }

    #[tokio::test]
    async fn mock_mode_echoes_unknown_prompts() {
        let tool = LanguageModelTool::mock("test-model", &[]);
        let out = tool.generate("anything", None).await.unwrap();
        assert!(out.starts_with("[mock:test-model]"));
    }

    #[tokio::test]
    async fn run_prompt_substitutes_variables() {
        let tool = LanguageModelTool::mock("m", &[("capital of France", "PARIS")]);
        let out = tool
            .run_prompt(
                "capital of {country}?",
                &serde_json::json!({"country": "France"}),
            )
            .await
            .unwrap();
        assert_eq!(out, "PARIS");
    }

    #[tokio::test]
    async fn generation_functions_render_then_generate() {
        let tool = LanguageModelTool::mock("m", &[("capital of Japan", "TOKYO")]);
        let function = tool
            .create_generation_function("capital of {country}?")
            .unwrap();
        let out = function
            .invoke(serde_json::json!({"country": "Japan"}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("TOKYO"));
    }

    #[tokio::test]
    async fn stats_count_calls() {
        let tool = LanguageModelTool::mock("m", &[]);
        tool.generate("a", None).await.unwrap();
        tool.generate("bb", None).await.unwrap();
        let stats = tool.stats();
        assert_eq!(stats["generate_calls"], serde_json::json!(2));
    }
}
