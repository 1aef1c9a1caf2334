//! LLM client: provider abstraction and ordered failover chain.
//!
//! Providers are stateless from the caller's view. The failover client
//! walks the configured chain in order and treats timeouts, non-2xx
//! responses, and empty output as failure; the whole chain shares one
//! wall-clock deadline. When every provider fails, the caller receives a
//! [`GenerationError`] and the orchestrator turns it into a structured
//! refusal.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{LlmConfig, LlmProviderConfig};
use crate::error::GenerationError;

/// A generation request: prompts plus sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Trait for chat LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Provider name for logging and error summaries.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible provider
// ---------------------------------------------------------------------------

/// Provider for any endpoint following the OpenAI chat-completions shape:
/// OpenAI itself, OpenRouter, Ollama, vLLM, LM Studio.
pub struct OpenAiCompatProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    label: String,
}

impl OpenAiCompatProvider {
    pub fn new(config: &LlmProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let is_local = base_url.contains("localhost") || base_url.contains("127.0.0.1");
        let api_key = std::env::var(&config.api_key_env).unwrap_or_else(|_| {
            if is_local {
                // Local endpoints accept any bearer token.
                "local".to_string()
            } else {
                String::new()
            }
        });
        Self {
            client: Client::new(),
            base_url,
            api_key,
            label: format!("openai-compat:{}", config.model),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        if self.api_key.is_empty() {
            return Err(GenerationError::AuthFailed {
                provider: self.label.clone(),
            });
        }
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::ProviderFailed {
                provider: self.label.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(GenerationError::ProviderFailed {
                provider: self.label.clone(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::ProviderFailed {
                provider: self.label.clone(),
                message: format!("bad response body: {e}"),
            })?;
        let text = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(GenerationError::EmptyOutput {
                provider: self.label.clone(),
            });
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

// ---------------------------------------------------------------------------
// Gemini provider
// ---------------------------------------------------------------------------

/// Provider for the Google Gemini `generateContent` API. Auth rides in a
/// `?key=` query parameter and the system prompt is a top-level
/// `system_instruction`.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    label: String,
}

impl GeminiProvider {
    pub fn new(config: &LlmProviderConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            api_key: std::env::var(&config.api_key_env).unwrap_or_default(),
            label: format!("gemini:{}", config.model),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        if self.api_key.is_empty() {
            return Err(GenerationError::AuthFailed {
                provider: self.label.clone(),
            });
        }
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = json!({
            "system_instruction": {"parts": [{"text": request.system_prompt}]},
            "contents": [{"parts": [{"text": request.user_prompt}]}],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::ProviderFailed {
                provider: self.label.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(GenerationError::ProviderFailed {
                provider: self.label.clone(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::ProviderFailed {
                provider: self.label.clone(),
                message: format!("bad response body: {e}"),
            })?;
        let text = parsed["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(GenerationError::EmptyOutput {
                provider: self.label.clone(),
            });
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

// ---------------------------------------------------------------------------
// Mock provider
// ---------------------------------------------------------------------------

/// A mock LLM provider for tests: returns queued responses in order and
/// records the requests it saw.
pub struct MockLlmProvider {
    responses: std::sync::Mutex<Vec<String>>,
    requests: std::sync::Mutex<Vec<GenerationRequest>>,
    fail: bool,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(Vec::new()),
            requests: std::sync::Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A provider that fails every call.
    pub fn failing() -> Self {
        Self {
            responses: std::sync::Mutex::new(Vec::new()),
            requests: std::sync::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn queue_response(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push(text.into());
    }

    /// Requests seen so far, for prompt assertions.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(GenerationError::ProviderFailed {
                provider: "mock".into(),
                message: "mock provider configured to fail".into(),
            });
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("Mock answer grounded in [1].".to_string())
        } else {
            Ok(responses.remove(0))
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Failover client
// ---------------------------------------------------------------------------

/// Walks an ordered provider chain under one wall-clock deadline.
pub struct FailoverLlmClient {
    providers: Vec<Arc<dyn LlmProvider>>,
    deadline: Duration,
}

impl FailoverLlmClient {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, deadline: Duration) -> Self {
        Self {
            providers,
            deadline,
        }
    }

    /// Build the chain named in the configuration.
    pub fn from_config(config: &LlmConfig) -> Self {
        let providers: Vec<Arc<dyn LlmProvider>> = config
            .providers
            .iter()
            .map(|p| match p.kind.as_str() {
                "gemini" => Arc::new(GeminiProvider::new(p)) as Arc<dyn LlmProvider>,
                _ => Arc::new(OpenAiCompatProvider::new(p)) as Arc<dyn LlmProvider>,
            })
            .collect();
        Self::new(providers, Duration::from_millis(config.deadline_ms))
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Try providers in order until one produces non-empty text.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let deadline_ms = self.deadline.as_millis() as u64;
        let chain = async {
            let mut failures: Vec<String> = Vec::new();
            for provider in &self.providers {
                match provider.generate(request).await {
                    Ok(text) => {
                        debug!(provider = provider.name(), "Generation succeeded");
                        return Ok(text);
                    }
                    Err(e) => {
                        warn!(provider = provider.name(), error = %e, "Provider failed, trying next");
                        failures.push(format!("{}: {e}", provider.name()));
                    }
                }
            }
            Err(GenerationError::AllProvidersFailed {
                summary: if failures.is_empty() {
                    "no providers configured".to_string()
                } else {
                    failures.join(" | ")
                },
            })
        };

        match tokio::time::timeout(self.deadline, chain).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::DeadlineExceeded { deadline_ms }),
        }
    }
}
