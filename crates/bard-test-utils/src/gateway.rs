//! Scripted chat gateway

use async_trait::async_trait;
use bard_core::LlmConfig;
use bard_llm::{ChatGateway, ChatMessage, ChatResponse, GatewayError, Usage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// One recorded gateway call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub model: String,
}

/// Gateway that answers from a script, then repeats a fallback reply
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<String, GatewayError>>>,
    fallback: Result<String, GatewayError>,
    delay: Option<Duration>,
    usage: Option<Usage>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    /// Always answers `reply`
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(reply.into()),
            delay: None,
            usage: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers each reply once, in order, then repeats the last one
    pub fn sequence<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies: VecDeque<Result<String, GatewayError>> =
            replies.into_iter().map(|r| Ok(r.into())).collect();
        let fallback = replies
            .back()
            .cloned()
            .unwrap_or_else(|| Ok(String::new()));
        Self {
            script: Mutex::new(replies),
            fallback,
            delay: None,
            usage: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always fails with `error`
    pub fn failing(error: GatewayError) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(error),
            delay: None,
            usage: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue an explicit result ahead of the fallback
    pub fn then(self, result: Result<&str, GatewayError>) -> Self {
        self.script.lock().push_back(result.map(str::to_string));
        self
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report this usage on every reply
    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = Some(Usage {
            prompt_tokens,
            completion_tokens,
        });
        self
    }

    /// Calls made so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ChatGateway for ScriptedGateway {
    async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, GatewayError> {
        self.calls.lock().push(RecordedCall {
            messages: messages.to_vec(),
            model: config.model.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        let reply = next.unwrap_or_else(|| self.fallback.clone())?;
        Ok(ChatResponse {
            content: reply,
            usage: self.usage,
            finish_reason: Some("stop".into()),
        })
    }
}
