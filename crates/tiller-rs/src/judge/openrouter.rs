//! [`SecondaryJudge`] backed by the OpenRouter chat completions API.

use super::{JudgeError, JudgeFuture, SecondaryJudge};
use crate::governor::config::ConfigError;
use crate::{ChatRequest, DEFAULT_MODEL, Message, OPENROUTER_URL, RawChatResponse};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENROUTER_KEY";

/// Judges answer with a handful of tags; this is plenty.
const JUDGE_MAX_TOKENS: u32 = 2048;

/// A one-shot judge: system prompt + user prompt in, first choice content out.
pub struct OpenRouterJudge {
    client: reqwest::Client,
    api_key: String,
    model: String,
    system_prompt: Option<String>,
    temperature: Option<f32>,
}

impl std::fmt::Debug for OpenRouterJudge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterJudge")
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt.is_some())
            .finish()
    }
}

impl OpenRouterJudge {
    /// Build a judge. An empty key is a configuration error.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey(API_KEY_ENV));
        }
        let client = reqwest::Client::builder()
            .user_agent("tiller-rs/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            system_prompt: None,
            temperature: Some(0.0),
        })
    }

    /// Build a judge on [`DEFAULT_MODEL`].
    pub fn from_key(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(api_key, DEFAULT_MODEL)
    }

    /// Build a judge with the key from `OPENROUTER_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ConfigError> {
        let key = std::env::var(API_KEY_ENV).map_err(|_| ConfigError::MissingApiKey(API_KEY_ENV))?;
        Self::new(key, model)
    }

    /// Instructions sent as the system message of every call.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, prompt: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.as_str()));
        }
        messages.push(Message::user(prompt));
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: JUDGE_MAX_TOKENS,
            temperature: self.temperature,
        }
    }

    async fn complete(&self, prompt: String) -> Result<String, JudgeError> {
        let body = self.request(&prompt);
        debug!(
            "Judge request: model={}, prompt={} chars",
            self.model,
            prompt.len()
        );
        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| JudgeError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| JudgeError::Request(format!("failed to read response: {e}")))?;
        debug!(
            "Judge response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(JudgeError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        parse_completion(&text)
    }
}

/// Extract the first choice's text from a raw completion body.
fn parse_completion(text: &str) -> Result<String, JudgeError> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| JudgeError::Decode(e.to_string()))?;
    if let Some(err) = parsed.error {
        return Err(JudgeError::Api(err.message));
    }
    if let Some(usage) = &parsed.usage {
        trace!(
            "Judge token usage: prompt={}, completion={}, total={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
        );
    }
    parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(JudgeError::Empty)
}

impl SecondaryJudge for OpenRouterJudge {
    fn run(&self, prompt: &str) -> JudgeFuture<'_> {
        let prompt = prompt.to_string();
        Box::pin(self.complete(prompt))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
