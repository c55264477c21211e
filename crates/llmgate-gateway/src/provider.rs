//! Upstream completion providers.
//!
//! The pipeline treats the provider call as opaque: `(model, messages,
//! max_tokens)` in, a completion out. Two adapters implement the seam — a
//! deterministic stub for development and tests, and an HTTP adapter for an
//! OpenAI-compatible chat-completions upstream.

use llmgate_core::{
    ChatMessage, Completion, CompletionProvider, GatewayError, ProviderConfig, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default completion budget when the caller does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 512;

// ---------------------------------------------------------------------------
// Stub
// ---------------------------------------------------------------------------

/// Deterministic echo provider. Answers with the last user message so tests
/// can assert the full pipeline end to end without a network.
pub struct StubProvider;

#[async_trait::async_trait]
impl CompletionProvider for StubProvider {
    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _max_tokens: u32,
    ) -> Result<Completion> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(Completion {
            answer: format!("[stub] {last_user}"),
            citations: Vec::new(),
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct UpstreamRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct UpstreamChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct UpstreamResponse {
    choices: Vec<UpstreamChoice>,
}

/// Adapter for an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// Build the adapter from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when no API key is configured or the
    /// HTTP client cannot be built.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| GatewayError::Config("provider API key is not set".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Config(format!("provider http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.upstream_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl CompletionProvider for HttpProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<Completion> {
        // Model ids are namespaced as `provider:model`; the upstream only
        // sees its own half.
        let upstream_model = model.strip_prefix("openai:").unwrap_or(model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&UpstreamRequest {
                model: upstream_model,
                messages,
                max_tokens,
            })
            .send()
            .await
            .map_err(|e| GatewayError::Provider(format!("upstream unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Provider(format!(
                "upstream returned {status}"
            )));
        }

        let body: UpstreamResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Provider(format!("malformed upstream response: {e}")))?;

        let answer = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::Provider("upstream returned no choices".to_string()))?;

        Ok(Completion {
            answer,
            citations: Vec::new(),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Pick the provider adapter: the HTTP upstream when an API key is
/// configured, the stub otherwise. The pipeline additionally routes the
/// `stub` model id to the stub regardless of configuration, so it stays
/// usable for smoke tests in any deployment.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn CompletionProvider>> {
    if config.api_key.is_some() {
        Ok(Arc::new(HttpProvider::new(config)?))
    } else {
        Ok(Arc::new(StubProvider))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_stub_echoes_last_user_message() {
        let completion = StubProvider
            .complete(
                "stub",
                &[
                    msg("user", "first"),
                    msg("assistant", "reply"),
                    msg("user", "second"),
                ],
                DEFAULT_MAX_TOKENS,
            )
            .await
            .unwrap();
        assert_eq!(completion.answer, "[stub] second");
    }

    #[tokio::test]
    async fn test_stub_without_user_message() {
        let completion = StubProvider
            .complete("stub", &[msg("system", "rules")], DEFAULT_MAX_TOKENS)
            .await
            .unwrap();
        assert_eq!(completion.answer, "[stub] (no input)");
    }

    #[tokio::test]
    async fn test_builder_routes_on_api_key_presence() {
        let mut config = ProviderConfig::default();
        config.api_key = None;
        assert_eq!(build_provider(&config).unwrap().name(), "stub");

        config.api_key = Some("sk-test".to_string());
        assert_eq!(build_provider(&config).unwrap().name(), "openai");
    }

    async fn spawn_upstream(body: serde_json::Value) -> String {
        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn http_config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            upstream_url: base_url,
            api_key: Some("sk-test".to_string()),
            timeout_ms: 2000,
        }
    }

    #[tokio::test]
    async fn test_http_provider_parses_first_choice() {
        let url = spawn_upstream(json!({
            "choices": [{"message": {"role": "assistant", "content": "hello there"}}]
        }))
        .await;
        let provider = HttpProvider::new(&http_config(url)).unwrap();
        let completion = provider
            .complete("openai:gpt-4o-mini", &[msg("user", "hi")], 128)
            .await
            .unwrap();
        assert_eq!(completion.answer, "hello there");
    }

    #[tokio::test]
    async fn test_http_provider_empty_choices_is_provider_error() {
        let url = spawn_upstream(json!({"choices": []})).await;
        let provider = HttpProvider::new(&http_config(url)).unwrap();
        let result = provider.complete("openai:gpt-4o", &[msg("user", "hi")], 128).await;
        assert!(matches!(result, Err(GatewayError::Provider(_))));
    }

    #[tokio::test]
    async fn test_http_provider_unreachable_is_provider_error() {
        let provider = HttpProvider::new(&http_config("http://127.0.0.1:9".to_string())).unwrap();
        let result = provider.complete("openai:gpt-4o", &[msg("user", "hi")], 128).await;
        assert!(matches!(result, Err(GatewayError::Provider(_))));
    }

    #[tokio::test]
    async fn test_http_provider_requires_api_key() {
        let config = ProviderConfig {
            api_key: None,
            ..ProviderConfig::default()
        };
        assert!(matches!(
            HttpProvider::new(&config),
            Err(GatewayError::Config(_))
        ));
    }
}
