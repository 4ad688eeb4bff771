//! HTTP gateway for OpenAI-compatible and Anthropic endpoints

use crate::error::GatewayError;
use crate::{ChatGateway, ChatMessage, ChatResponse, ChatRole, Usage};
use async_trait::async_trait;
use bard_core::{LlmConfig, LlmSettings, Provider};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_ERROR_BODY: usize = 512;

/// Chat gateway speaking to provider HTTP APIs
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    settings: LlmSettings,
    openai_key: Option<String>,
    anthropic_key: Option<String>,
}

impl HttpGateway {
    /// Create a gateway, resolving API keys from the environment variables
    /// named in `settings`.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        let openai_key = std::env::var(&settings.openai_api_key_env).ok();
        let anthropic_key = std::env::var(&settings.anthropic_api_key_env).ok();
        Self::with_keys(settings, openai_key, anthropic_key)
    }

    /// Create a gateway with explicit keys
    #[must_use]
    pub fn with_keys(
        settings: LlmSettings,
        openai_key: Option<String>,
        anthropic_key: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            settings,
            openai_key: openai_key.filter(|k| !k.trim().is_empty()),
            anthropic_key: anthropic_key.filter(|k| !k.trim().is_empty()),
        }
    }

    async fn openai_compatible(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, GatewayError> {
        let (base, key) = match config.provider {
            Provider::Ollama => (&self.settings.ollama_base_url, None),
            _ => {
                let key = self.openai_key.as_deref().ok_or_else(|| {
                    GatewayError::MissingCredentials {
                        provider: "openai".into(),
                    }
                })?;
                (&self.settings.openai_base_url, Some(key))
            }
        };
        let url = format!("{}/chat/completions", base.trim_end_matches('/'));
        let mut request = self
            .client
            .post(url)
            .timeout(config.timeout())
            .json(&openai_body(messages, config));
        if let Some(key) = key {
            request = request.bearer_auth(key);
        }
        let text = send(request, provider_name(config.provider), config.timeout_ms).await?;
        parse_openai_response(&text)
    }

    async fn anthropic(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, GatewayError> {
        let key = self
            .anthropic_key
            .as_deref()
            .ok_or_else(|| GatewayError::MissingCredentials {
                provider: "anthropic".into(),
            })?;
        let url = format!("{}/messages", self.settings.anthropic_base_url.trim_end_matches('/'));
        let request = self
            .client
            .post(url)
            .timeout(config.timeout())
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&anthropic_body(messages, config));
        let text = send(request, "anthropic", config.timeout_ms).await?;
        parse_anthropic_response(&text)
    }
}

#[async_trait]
impl ChatGateway for HttpGateway {
    async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, GatewayError> {
        tracing::debug!(
            provider = provider_name(config.provider),
            model = %config.model,
            messages = messages.len(),
            "generate_chat"
        );
        match config.provider {
            Provider::OpenAi | Provider::Ollama => self.openai_compatible(messages, config).await,
            Provider::Anthropic => self.anthropic(messages, config).await,
        }
    }
}

fn provider_name(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "openai",
        Provider::Ollama => "ollama",
        Provider::Anthropic => "anthropic",
    }
}

async fn send(
    request: reqwest::RequestBuilder,
    provider: &str,
    timeout_ms: u64,
) -> Result<String, GatewayError> {
    let response = request.send().await.map_err(|e| transport_error(&e, timeout_ms))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(&e, timeout_ms))?;
    classify_status(status, provider, &body)?;
    Ok(body)
}

fn transport_error(error: &reqwest::Error, timeout_ms: u64) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout { timeout_ms }
    } else {
        GatewayError::Network(error.to_string())
    }
}

pub(crate) fn classify_status(
    status: StatusCode,
    provider: &str,
    body: &str,
) -> Result<(), GatewayError> {
    if status.is_success() {
        return Ok(());
    }
    let truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Auth {
            provider: provider.to_string(),
            message: truncated,
        },
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited {
            provider: provider.to_string(),
        },
        other => GatewayError::Upstream {
            status: other.as_u16(),
            body: truncated,
        },
    })
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

fn openai_body<'a>(messages: &'a [ChatMessage], config: &'a LlmConfig) -> OpenAiRequest<'a> {
    OpenAiRequest {
        model: &config.model,
        messages,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

pub(crate) fn parse_openai_response(body: &str) -> Result<ChatResponse, GatewayError> {
    let parsed: OpenAiResponse =
        serde_json::from_str(body).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::MalformedResponse("no choices in response".into()))?;
    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        usage: parsed.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
        finish_reason: choice.finish_reason,
    })
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

fn anthropic_body<'a>(messages: &'a [ChatMessage], config: &'a LlmConfig) -> AnthropicRequest<'a> {
    // Anthropic takes system text out of band
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();
    AnthropicRequest {
        model: &config.model,
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        messages: messages.iter().filter(|m| m.role != ChatRole::System).collect(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

pub(crate) fn parse_anthropic_response(body: &str) -> Result<ChatResponse, GatewayError> {
    let parsed: AnthropicResponse =
        serde_json::from_str(body).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
    let content: String = parsed
        .content
        .iter()
        .filter(|b| b.kind == "text")
        .map(|b| b.text.as_str())
        .collect();
    Ok(ChatResponse {
        content,
        usage: parsed.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
        }),
        finish_reason: parsed.stop_reason,
    })
}
