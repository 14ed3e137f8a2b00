//! Semantic layer: external language-understanding service
//!
//! The production implementation talks to an OpenAI-compatible
//! `/chat/completions` endpoint. Both the safety judgment and the emotion
//! tag come from the same service, so `LlmRiskService` implements both
//! `SemanticRiskService` and `EmotionDetector`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::emotion::{Emotion, EmotionDetector};
use super::RiskLevel;

/// Failure of an external classification call.
///
/// Never escapes the classifier: every variant degrades to an
/// inconclusive assessment.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Semantic service unavailable: {0}")]
    Unavailable(String),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Service returned HTTP {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Structured risk judgment returned by the semantic service
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticJudgment {
    pub is_safe: bool,
    pub concern_level: RiskLevel,
    pub reason: String,
    pub parent_alert: bool,
    pub recommended_response: Option<String>,
}

/// Wire shape of the judgment; lenient about missing fields
#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(default = "default_true")]
    is_safe: bool,
    #[serde(default)]
    concern_level: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    parent_alert: bool,
    #[serde(default)]
    recommended_response: Option<String>,
}

fn default_true() -> bool {
    true
}

impl From<RawJudgment> for SemanticJudgment {
    fn from(raw: RawJudgment) -> Self {
        Self {
            is_safe: raw.is_safe,
            concern_level: RiskLevel::parse_lenient(&raw.concern_level),
            reason: raw.reason,
            parent_alert: raw.parent_alert,
            recommended_response: raw.recommended_response.filter(|r| !r.trim().is_empty()),
        }
    }
}

/// External semantic risk judgment
#[async_trait]
pub trait SemanticRiskService: Send + Sync {
    async fn assess(&self, message: &str, child_age: u32)
        -> Result<SemanticJudgment, ClassifierError>;
}

/// Stand-in used when no API key is configured
pub struct DisabledSemanticService;

#[async_trait]
impl SemanticRiskService for DisabledSemanticService {
    async fn assess(&self, _message: &str, _child_age: u32) -> Result<SemanticJudgment, ClassifierError> {
        Err(ClassifierError::Unavailable("no API key configured".into()))
    }
}

#[async_trait]
impl EmotionDetector for DisabledSemanticService {
    async fn detect(&self, _message: &str) -> Result<Emotion, ClassifierError> {
        Err(ClassifierError::Unavailable("no API key configured".into()))
    }
}

// ============================================================================
// Chat completions client
// ============================================================================

const SAFETY_SYSTEM_PROMPT: &str = "You are a safety analysis system. Respond only with valid JSON.";
const EMOTION_SYSTEM_PROMPT: &str =
    "You are an emotion detection system. Respond with only one emotion word.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Semantic risk and emotion service backed by a chat completions API
pub struct LlmRiskService {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmRiskService {
    /// Build a client; `timeout` bounds every HTTP exchange
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    async fn complete(&self, system: &str, prompt: String, max_tokens: u32) -> Result<String, ClassifierError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: system.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: prompt,
                },
            ],
            temperature: 0.1,
            max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Status(status.as_u16()));
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClassifierError::Malformed("no choices in response".into()))
    }
}

#[async_trait]
impl SemanticRiskService for LlmRiskService {
    async fn assess(&self, message: &str, child_age: u32) -> Result<SemanticJudgment, ClassifierError> {
        let content = self
            .complete(SAFETY_SYSTEM_PROMPT, safety_prompt(message, child_age), 512)
            .await?;
        debug!("Semantic judgment raw response: {}", content);
        parse_judgment(&content)
    }
}

#[async_trait]
impl EmotionDetector for LlmRiskService {
    async fn detect(&self, message: &str) -> Result<Emotion, ClassifierError> {
        let content = self
            .complete(EMOTION_SYSTEM_PROMPT, emotion_prompt(message), 8)
            .await?;
        Ok(Emotion::from_word(&content))
    }
}

fn safety_prompt(message: &str, child_age: u32) -> String {
    format!(
        r#"Analyze this message from a {child_age}-year-old child for safety concerns:

Child's message: "{message}"

Flag as a concern if the message mentions or implies injury or pain, illness,
fear or emotional distress, being alone or unsupervised, strangers, unsafe
activities, requests to do something harmful, or a need for immediate help.

Return your analysis in JSON format:
{{
    "is_safe": true/false,
    "concern_level": "none/low/medium/high/critical",
    "reason": "brief explanation of any concerns",
    "parent_alert": true/false,
    "recommended_response": "how to respond to the child"
}}

Be cautious but not overly alarmed. Children often use dramatic language."#
    )
}

fn emotion_prompt(message: &str) -> String {
    format!(
        "Analyze the emotional tone of this child's message:\n\n\"{message}\"\n\n\
         Choose ONE of: happy, sad, angry, scared, frustrated, excited, neutral, concerned.\n\
         Respond with only the emotion word."
    )
}

/// Pull the JSON object out of a model answer that may be wrapped in
/// Markdown code fences or surrounded by prose.
pub(crate) fn extract_json_block(text: &str) -> &str {
    if let Some((_, rest)) = text.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    if let Some((_, rest)) = text.split_once("```") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text.trim(),
    }
}

pub(crate) fn parse_judgment(content: &str) -> Result<SemanticJudgment, ClassifierError> {
    let raw: RawJudgment = serde_json::from_str(extract_json_block(content))
        .map_err(|e| ClassifierError::Malformed(e.to_string()))?;
    Ok(raw.into())
}
