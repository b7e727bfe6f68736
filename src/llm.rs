//! Text-generation client behind the generative search fallback.
//!
//! [`LlmClient`] is a single-shot seam: one system prompt and one user
//! message in, one block of text out. No conversation state is kept.
//!
//! - [`AnthropicClient`]: production client for the Anthropic Messages API
//! - `MockLlmClient`: scripted test double that records prompts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-haiku-4-5";

// Generated entries are a handful of short bilingual paragraphs.
const DEFAULT_MAX_TOKENS: u32 = 2048;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during a completion request.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("ANTHROPIC_API_KEY environment variable not set")]
    MissingApiKey,

    /// Transport failure or a non-success status.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// The model answered without any text.
    #[error("Model returned empty response")]
    EmptyResponse,
}

// ============================================================================
// LlmClient Trait
// ============================================================================

/// The text of a successful completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for one `user` message under `system`
    /// instructions.
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, LlmError>;
}

// ============================================================================
// Anthropic API Implementation
// ============================================================================

pub struct AnthropicClient {
    api_key: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

/// Only text blocks carry output; other block kinds are skipped.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl AnthropicClient {
    /// Create a client from the environment.
    ///
    /// Reads `ANTHROPIC_API_KEY` (required) and `SHEBA_LLM_MODEL` (optional
    /// model override).
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::MissingApiKey`] if the key is not set.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
        let client = Self::new(api_key);
        Ok(match std::env::var("SHEBA_LLM_MODEL") {
            Ok(model) if !model.trim().is_empty() => client.with_model(model),
            _ => client,
        })
    }

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            endpoint: ANTHROPIC_MESSAGES_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Send requests to a different messages endpoint, e.g. a proxy.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body<'a>(&'a self, system: &'a str, user: &'a str) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: [UserMessage {
                role: "user",
                content: user,
            }],
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(system, user))
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Http(describe_failure(status, &body)));
        }

        let text = response_text(&body)?;
        Ok(Completion { text })
    }
}

/// `"<status>: <api message>"`, falling back to the raw body.
fn describe_failure(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => format!("{status}: {}", envelope.error.message),
        Err(_) => format!("{status}: {}", body.trim()),
    }
}

/// Concatenated text blocks of a messages response.
fn response_text(body: &str) -> Result<String, LlmError> {
    let response: MessagesResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Parse(e.to_string()))?;

    let text: String = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect();

    if text.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text)
}

// ============================================================================
// Mock Implementation (Test Only)
// ============================================================================

/// Scripted LLM client. Outcomes are consumed in FIFO order.
///
/// A `None` entry simulates a failed request. Once the script is exhausted
/// every call fails with [`LlmError::EmptyResponse`].
#[cfg(test)]
pub(crate) struct MockLlmClient {
    pub responses: std::sync::Mutex<std::collections::VecDeque<Option<String>>>,
    pub calls: std::sync::atomic::AtomicUsize,
    /// User prompts received, in call order.
    pub prompts: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockLlmClient {
    /// A mock whose calls all succeed with `responses`, in order.
    pub fn new(responses: Vec<String>) -> Self {
        Self::with_outcomes(responses.into_iter().map(Some).collect())
    }

    pub fn with_outcomes(outcomes: Vec<Option<String>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(outcomes.into()),
            calls: std::sync::atomic::AtomicUsize::new(0),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _system: &str, user: &str) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user.to_string());

        match self.responses.lock().unwrap().pop_front() {
            Some(Some(text)) => Ok(Completion { text }),
            Some(None) => Err(LlmError::Http("simulated failure".into())),
            None => Err(LlmError::EmptyResponse),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
