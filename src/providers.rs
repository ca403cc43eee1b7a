//! Model-provider collaborators: wire types and streaming/non-streaming
//! chat calls for OpenAI and Anthropic, plus a scripted in-process provider
//! that replays a fixed chunk script for tests.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::env;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::{ChatMessage, DemoError, Result};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Openai => write!(f, "openai"),
            Provider::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl Provider {
    pub fn env_key(&self) -> &'static str {
        match self {
            Provider::Openai => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Openai => "gpt-4o-mini",
            Provider::Anthropic => "claude-sonnet-4-20250514",
        }
    }
}

// -- OpenAI wire types ------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct OpenAIChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIDelta {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChoice {
    pub delta: OpenAIDelta,
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChunk {
    pub choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAICompletionChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct OpenAICompletion {
    pub choices: Vec<OpenAICompletionChoice>,
}

// -- Anthropic wire types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub stream: bool,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicContentDelta {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub delta: Option<AnthropicContentDelta>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicContentBlock {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicCompletion {
    pub content: Vec<AnthropicContentBlock>,
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Explicitly constructed provider client. Built once in `main` and handed
/// to the orchestrator; a missing API key is an error at construction time,
/// not a nullable global discovered mid-request.
#[derive(Clone)]
pub struct ModelClient {
    client: reqwest::Client,
    api_key: String,
    pub provider: Provider,
}

impl ModelClient {
    pub fn new(provider: Provider) -> Result<Self> {
        let api_key = env::var(provider.env_key())
            .map_err(|_| DemoError::MissingApiKey(provider.env_key()))?;
        Ok(ModelClient::with_key(provider, api_key))
    }

    pub fn with_key(provider: Provider, api_key: String) -> Self {
        ModelClient {
            client: reqwest::Client::new(),
            api_key,
            provider,
        }
    }

    /// Stream a chat completion, relaying each delta text chunk through `tx`
    /// in arrival order. A dropped receiver stops the relay without error.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        match self.provider {
            Provider::Openai => self.stream_openai(messages, model, tx).await,
            Provider::Anthropic => self.stream_anthropic(messages, model, tx).await,
        }
    }

    /// Non-streaming chat completion, used by the repair loop.
    pub async fn complete(&self, messages: &[ChatMessage], model: &str) -> Result<String> {
        match self.provider {
            Provider::Openai => self.complete_openai(messages, model).await,
            Provider::Anthropic => self.complete_anthropic(messages, model).await,
        }
    }

    async fn stream_openai(
        &self,
        messages: &[ChatMessage],
        model: &str,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        let request = OpenAIChatRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            stream: true,
            temperature: 0.7,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(DemoError::Provider(format!("OpenAI API error: {}", error_text)));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer.drain(..=line_end);

                if line.starts_with("data: ") && line != "data: [DONE]" {
                    let json_str = line.strip_prefix("data: ").unwrap_or(&line);
                    if let Ok(parsed) = serde_json::from_str::<OpenAIChunk>(json_str) {
                        if let Some(choice) = parsed.choices.first() {
                            if let Some(content) = &choice.delta.content {
                                if tx.send(content.clone()).is_err() {
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn stream_anthropic(
        &self,
        messages: &[ChatMessage],
        model: &str,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        let (system, chat) = split_system(messages);
        let request = AnthropicRequest {
            model: model.to_string(),
            messages: chat,
            max_tokens: 8192,
            stream: true,
            temperature: 0.7,
            system,
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(DemoError::Provider(format!("Anthropic API error: {}", error_text)));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer.drain(..=line_end);

                if line.starts_with("data: ") {
                    let json_str = line.strip_prefix("data: ").unwrap_or(&line);
                    if let Ok(event) = serde_json::from_str::<AnthropicStreamEvent>(json_str) {
                        if event.event_type == "content_block_delta" {
                            if let Some(text) = event.delta.and_then(|d| d.text) {
                                if tx.send(text).is_err() {
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn complete_openai(&self, messages: &[ChatMessage], model: &str) -> Result<String> {
        let request = OpenAIChatRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            stream: false,
            temperature: 0.2,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(DemoError::Provider(format!("OpenAI API error: {}", error_text)));
        }

        let parsed: OpenAICompletion = response.json().await?;
        parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| DemoError::Provider("OpenAI returned no choices".to_string()))
    }

    async fn complete_anthropic(&self, messages: &[ChatMessage], model: &str) -> Result<String> {
        let (system, chat) = split_system(messages);
        let request = AnthropicRequest {
            model: model.to_string(),
            messages: chat,
            max_tokens: 8192,
            stream: false,
            temperature: 0.2,
            system,
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(DemoError::Provider(format!("Anthropic API error: {}", error_text)));
        }

        let parsed: AnthropicCompletion = response.json().await?;
        parsed
            .content
            .iter()
            .find_map(|b| b.text.clone())
            .ok_or_else(|| DemoError::Provider("Anthropic returned no text content".to_string()))
    }
}

/// Anthropic takes the system prompt as a dedicated field, not a message
/// role. Multiple system messages are joined in order.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<ChatMessage>) {
    let mut system_parts = Vec::new();
    let mut chat = Vec::new();
    for message in messages {
        if message.role == "system" {
            system_parts.push(message.content.clone());
        } else {
            chat.push(message.clone());
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, chat)
}

// ---------------------------------------------------------------------------
// Scripted client
// ---------------------------------------------------------------------------

/// Replays a fixed chunk script instead of calling a real provider.
#[derive(Debug, Clone, Default)]
pub struct ScriptedClient {
    chunks: Vec<String>,
    replies: Arc<Mutex<VecDeque<String>>>,
    fail_after: Option<usize>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        ScriptedClient::default()
    }

    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut queue = self.replies.lock().expect("replies lock");
            queue.extend(replies.into_iter().map(Into::into));
        }
        self
    }

    /// Fail with a provider error before emitting the chunk at `index`.
    pub fn failing_after(mut self, index: usize) -> Self {
        self.fail_after = Some(index);
        self
    }
}

// ---------------------------------------------------------------------------
// Injected handle
// ---------------------------------------------------------------------------

/// The provider handle the orchestrator is constructed with: a real HTTP
/// client or a scripted stand-in. Cloneable so streaming can run in a
/// spawned task.
#[derive(Clone)]
pub enum ProviderHandle {
    Http(ModelClient),
    Scripted(ScriptedClient),
}

impl ProviderHandle {
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        match self {
            ProviderHandle::Http(client) => client.stream_chat(messages, model, tx).await,
            ProviderHandle::Scripted(script) => {
                for (index, chunk) in script.chunks.iter().enumerate() {
                    if script.fail_after == Some(index) {
                        return Err(DemoError::Provider(
                            "scripted provider failure".to_string(),
                        ));
                    }
                    if tx.send(chunk.clone()).is_err() {
                        return Ok(());
                    }
                    tokio::task::yield_now().await;
                }
                Ok(())
            }
        }
    }

    pub async fn complete(&self, messages: &[ChatMessage], model: &str) -> Result<String> {
        match self {
            ProviderHandle::Http(client) => client.complete(messages, model).await,
            ProviderHandle::Scripted(script) => {
                let mut queue = script.replies.lock().expect("replies lock");
                queue.pop_front().ok_or_else(|| {
                    DemoError::Provider("scripted reply queue exhausted".to_string())
                })
            }
        }
    }
}
