//! Silent Bard LLM gateway
//!
//! A single capability, `generate_chat(messages, config)`, uniform across
//! providers. [`HttpGateway`] talks to OpenAI-compatible endpoints (OpenAI,
//! Ollama) and the Anthropic messages API. Tests substitute scripted gateways.

#![warn(unreachable_pub)]

pub mod error;
pub mod http;

pub use error::GatewayError;
pub use http::HttpGateway;

use async_trait::async_trait;
use bard_core::LlmConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions
    System,
    /// Prompt
    User,
    /// Model reply
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker
    pub role: ChatRole,
    /// Text
    pub content: String,
}

impl ChatMessage {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens
    pub completion_tokens: u32,
}

/// Completed chat response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// Reply text
    pub content: String,
    /// Token usage, when reported
    pub usage: Option<Usage>,
    /// Why generation stopped, when reported
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    /// Response carrying only text
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
            finish_reason: None,
        }
    }
}

/// Uniform chat-completion capability
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Generate a reply for an ordered conversation
    async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, GatewayError>;
}

#[async_trait]
impl<T: ChatGateway + ?Sized> ChatGateway for Arc<T> {
    async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, GatewayError> {
        (**self).generate_chat(messages, config).await
    }
}
