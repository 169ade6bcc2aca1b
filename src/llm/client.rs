use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{ChatRequest, ChatResponse, Generated, GenerationRequest};
use crate::config::{LlmConfig, RequestConfig};
use crate::error::{GenerationError, GenerationResult};

/// Anything that can produce an agent reply.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<Generated>;

    /// Upper bound for one `generate` call including retries and backoff.
    fn budget(&self) -> Duration;
}

/// Client for OpenAI-compatible chat completion endpoints
#[derive(Clone)]
pub struct GenerationClient {
    client: Client,
    base_url: String,
    api_key: String,
    config: LlmConfig,
    request_config: RequestConfig,
}

impl GenerationClient {
    /// Create a new client. Requires an API key.
    pub fn new(config: &LlmConfig, request_config: RequestConfig) -> GenerationResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| GenerationError::Disabled {
                reason: "no API key configured".to_string(),
            })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(GenerationError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            config: config.clone(),
            request_config,
        })
    }

    /// Model for a given attempt: primary first, fallback on every retry.
    fn model_for(&self, attempt: u32) -> &str {
        if attempt == 0 {
            &self.config.primary_model
        } else {
            &self.config.fallback_model
        }
    }

    /// Execute a single request (internal)
    async fn execute_request(&self, url: &str, request: &ChatRequest) -> GenerationResult<String> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Calling chat completion endpoint"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    GenerationError::Http(e)
                }
            })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::RateLimited { message: body });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let chat: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| GenerationError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        chat.content()
            .map(str::to_string)
            .ok_or_else(|| GenerationError::InvalidResponse {
                message: "Response has no message content".to_string(),
            })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Generator for GenerationClient {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<Generated> {
        let url = format!("{}/chat/completions", self.base_url);
        let messages = request.to_messages();

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    session_id = %request.session_id,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying generation request"
                );
                tokio::time::sleep(delay).await;
            }

            let model = self.model_for(retries).to_string();
            let chat = ChatRequest {
                model: model.clone(),
                messages: messages.clone(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            };
            let start = Instant::now();

            match self.execute_request(&url, &chat).await {
                Ok(text) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    info!(
                        session_id = %request.session_id,
                        round = request.round,
                        model = %model,
                        latency_ms,
                        "Generation succeeded"
                    );
                    return Ok(Generated {
                        text,
                        model,
                        latency_ms,
                    });
                }
                Err(e) => {
                    error!(
                        session_id = %request.session_id,
                        model = %model,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Generation failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(GenerationError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    fn budget(&self) -> Duration {
        let attempts = u64::from(self.request_config.max_retries) + 1;
        let backoff: u64 = (1..=self.request_config.max_retries)
            .map(|r| self.request_config.retry_delay_ms * 2_u64.pow(r - 1))
            .sum();
        Duration::from_millis(self.request_config.timeout_ms * attempts + backoff)
    }
}

/// Stand-in used when no backend is configured; every call fails fast.
#[derive(Debug, Clone)]
pub struct DisabledGenerator {
    reason: String,
}

impl DisabledGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for DisabledGenerator {
    fn default() -> Self {
        Self::new("generation disabled")
    }
}

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> GenerationResult<Generated> {
        Err(GenerationError::Disabled {
            reason: self.reason.clone(),
        })
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(1)
    }
}

/// Build the backend for a configuration. A missing key or a client build
/// failure yields a [`DisabledGenerator`] so sessions still run on fallbacks.
pub fn generator_from_config(
    config: &LlmConfig,
    request_config: RequestConfig,
) -> Arc<dyn Generator> {
    match GenerationClient::new(config, request_config) {
        Ok(client) => {
            info!(
                base_url = %client.base_url(),
                primary_model = %config.primary_model,
                fallback_model = %config.fallback_model,
                "Generative backend configured"
            );
            Arc::new(client)
        }
        Err(GenerationError::Disabled { reason }) => {
            warn!(reason = %reason, "Generative backend disabled, using fallback prompts");
            Arc::new(DisabledGenerator::new(reason))
        }
        Err(e) => {
            warn!(error = %e, "Failed to build generation client, using fallback prompts");
            Arc::new(DisabledGenerator::new(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_config(api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            api_key: api_key.map(str::to_string),
            base_url: "https://api.example.com/v1/".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_client_creation() {
        let client = GenerationClient::new(&llm_config(Some("test_key")), RequestConfig::default());
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url(), "https://api.example.com/v1");
    }

    #[test]
    fn test_client_requires_key() {
        let result = GenerationClient::new(&llm_config(None), RequestConfig::default());
        assert!(matches!(result, Err(GenerationError::Disabled { .. })));
    }

    #[test]
    fn test_model_per_attempt() {
        let client =
            GenerationClient::new(&llm_config(Some("k")), RequestConfig::default()).unwrap();
        assert_eq!(client.model_for(0), "gpt-4o");
        assert_eq!(client.model_for(1), "gpt-4o-mini");
        assert_eq!(client.model_for(3), "gpt-4o-mini");
    }

    #[test]
    fn test_budget_covers_retries_and_backoff() {
        let request_config = RequestConfig {
            timeout_ms: 100,
            max_retries: 2,
            retry_delay_ms: 10,
        };
        let client = GenerationClient::new(&llm_config(Some("k")), request_config).unwrap();
        // 3 attempts * 100ms + 10ms + 20ms backoff
        assert_eq!(client.budget(), Duration::from_millis(330));
    }

    #[tokio::test]
    async fn test_disabled_generator_fails_fast() {
        let generator = DisabledGenerator::default();
        let request = GenerationRequest {
            session_id: "s".into(),
            round: 1,
            system: String::new(),
            scaffolding_type: crate::agents::ScaffoldingType::Conceptual,
            seed_template: None,
            map_description: String::new(),
            turns: vec![],
        };
        let err = generator.generate(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "Generation disabled: generation disabled");
    }

    #[tokio::test]
    async fn test_generator_from_config_without_key_is_disabled() {
        let generator = generator_from_config(&llm_config(None), RequestConfig::default());
        assert_eq!(generator.budget(), Duration::from_secs(1));
    }

    #[test]
    fn test_generator_from_config_with_key_uses_client_budget() {
        let request_config = RequestConfig {
            timeout_ms: 100,
            max_retries: 0,
            retry_delay_ms: 10,
        };
        let generator = generator_from_config(&llm_config(Some("k")), request_config);
        assert_eq!(generator.budget(), Duration::from_millis(100));
    }
}
