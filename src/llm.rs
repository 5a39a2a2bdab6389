//! Generative-text collaborators.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::{GenerationConfig, ModelConfig, SafetyConfig};
use crate::error::{BotError, Result};

/// Single-prompt text generation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> BotError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return BotError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    BotError::LanguageModel(format!("{provider} request failed with {}: {body}", status))
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
    generation: GenerationConfig,
    safety: SafetyConfig,
}

impl GeminiClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            BotError::LanguageModel("missing Gemini API key in model config".into())
        })?;
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.timeout_secs))
                .build()
                .map_err(|err| BotError::LanguageModel(format!("http client error: {err}")))?,
            model: cfg.model.clone(),
            api_key,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            generation: cfg.generation.clone(),
            safety: cfg.safety.clone(),
        })
    }

    fn payload(&self, prompt: &str) -> serde_json::Value {
        let safety_settings: Vec<GeminiSafetySetting> = self
            .safety
            .categories()
            .into_iter()
            .map(|(category, threshold)| GeminiSafetySetting {
                category: category.to_string(),
                threshold,
            })
            .collect();

        let contents = vec![GeminiMessage {
            role: "user".into(),
            parts: vec![GeminiPart {
                text: prompt.to_string(),
            }],
        }];

        json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.generation.temperature,
                "topP": self.generation.top_p,
                "topK": self.generation.top_k,
                "maxOutputTokens": self.generation.max_output_tokens,
            },
            "safetySettings": safety_settings,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_len = prompt.len(), "calling gemini");
        let resp = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.endpoint, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&self.payload(prompt))
            .send()
            .await
            .map_err(|err| BotError::LanguageModel(format!("Gemini request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "gemini"));
        }

        let parsed: GeminiResponse = resp.json().await.map_err(|err| {
            BotError::LanguageModel(format!("Gemini response parse error: {err}"))
        })?;

        parsed.into_text()
    }
}

/// A deterministic model used for tests and demos. Records every prompt it
/// receives.
pub struct StubModel {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Responses may include failures, returned in order.
    pub fn scripted(responses: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut locked = self
            .responses
            .lock()
            .map_err(|_| BotError::LanguageModel("stub model poisoned".into()))?;
        locked.pop_front().unwrap_or_else(|| {
            Err(BotError::LanguageModel(
                "StubModel ran out of scripted responses".into(),
            ))
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiMessage {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiSafetySetting {
    category: String,
    threshold: crate::config::HarmBlockThreshold,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(default, rename = "blockReason")]
    block_reason: Option<String>,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate. Blocked or empty answers
    /// become errors.
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|fb| fb.block_reason) {
            return Err(BotError::LanguageModel(format!("prompt blocked: {reason}")));
        }
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| BotError::LanguageModel("Gemini returned no candidates".into()))?;

        let text: String = candidate
            .content
            .map(|content| content.parts.into_iter().map(|part| part.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".into());
            return Err(BotError::LanguageModel(format!(
                "Gemini returned an empty answer (finish reason {reason})"
            )));
        }
        Ok(text)
    }
}
