use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::LlmConfig;

const SYSTEM_INSTRUCTION: &str = "You extract structured data from website text.";

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response format from model: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A chat-completion capable model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the text of the first completion choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExtractionError>;
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChat {
    client: Client,
    api_key: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(client: Client, config: &LlmConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExtractionError> {
        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let reply: ChatResponse = res.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExtractionError::MalformedResponse("no message content in first choice".to_string()))
    }
}

/// What the model produced for a scrape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtractionResult {
    /// The reply decoded as a JSON object.
    Structured(Map<String, Value>),
    /// The reply as-is when it is not a JSON object.
    RawText(String),
}

impl ExtractionResult {
    /// Classifies a model reply. Never fails: anything that is not a JSON
    /// object comes back as [`ExtractionResult::RawText`].
    pub fn from_reply(reply: &str) -> Self {
        let trimmed = reply.trim();
        let candidate = strip_code_fence(trimmed).unwrap_or(trimmed);

        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => ExtractionResult::Structured(map),
            _ => ExtractionResult::RawText(trimmed.to_string()),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, ExtractionResult::Structured(_))
    }
}

/// Inner text of a fenced block. The language tag on the opening line
/// (```` ```json ````, ```` ```JSON ````) is dropped.
fn strip_code_fence(text: &str) -> Option<&str> {
    let body = text.strip_prefix("```")?.strip_suffix("```")?;
    let body = match body.split_once('\n') {
        Some((tag, rest)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => rest,
        _ => match body.get(..4) {
            Some(tag) if tag.eq_ignore_ascii_case("json") => &body[4..],
            _ => body,
        },
    };
    Some(body.trim())
}

/// Builds the extraction instruction and interprets the reply.
pub struct ExtractionClient {
    model: Arc<dyn LanguageModel>,
    model_name: String,
    max_tokens: u32,
    char_budget: usize,
}

impl ExtractionClient {
    pub fn new(model: Arc<dyn LanguageModel>, config: &LlmConfig) -> Self {
        Self {
            model,
            model_name: config.model.clone(),
            max_tokens: config.max_tokens,
            char_budget: config.char_budget,
        }
    }

    pub fn build_request(&self, text: &str, prompt: &str) -> CompletionRequest {
        let excerpt = truncate_chars(text, self.char_budget);

        let mut user = String::with_capacity(prompt.len() + excerpt.len() + 16);
        user.push_str(prompt);
        user.push_str("\n\n---\n");
        user.push_str(excerpt);
        user.push_str("...\n");

        CompletionRequest {
            model: self.model_name.clone(),
            messages: vec![
                Message {
                    role: Role::System,
                    content: SYSTEM_INSTRUCTION.to_string(),
                },
                Message {
                    role: Role::User,
                    content: user,
                },
            ],
            temperature: 0.0,
            max_tokens: self.max_tokens,
        }
    }

    pub async fn extract(&self, text: &str, prompt: &str) -> Result<ExtractionResult, ExtractionError> {
        let request = self.build_request(text, prompt);
        debug!(
            model = %request.model,
            text_chars = text.chars().count(),
            budget = self.char_budget,
            "Calling model"
        );

        let started = Instant::now();
        let reply = self.model.complete(&request).await?;
        let result = ExtractionResult::from_reply(&reply);

        info!(
            elapsed = ?started.elapsed(),
            reply_len = reply.len(),
            structured = result.is_structured(),
            "Model replied"
        );
        Ok(result)
    }
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
