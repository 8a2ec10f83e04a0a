//! # LLM Classifier
//!
//! `IntentClassifier` backed by an OpenAI-compatible chat completions
//! endpoint. Each operation fails soft: transport errors, timeouts, an open
//! circuit breaker or an unparseable answer all resolve to that operation's
//! safe default and a `warn!` line.

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{InstitutionSettings, LlmSettings, RecoveryConfig};
use crate::errors::ServiceError;
use crate::localization::Language;
use crate::services::{Classification, IntentAnalysis, IntentClassifier, IntentSignal};

const INTENT_PROMPT: &str = "You are the intake assistant of {institution_name}. \
Read the user's message and decide what they want. Answer with one JSON object only: \
{\"signal\": S, \"reply\": R, \"critical\": C}. \
S is one of GREETING_START, COMPLAINT_NORMAL, COMPLAINT_CRITICAL, SUGGESTION_RECEIVED, \
CLARIFICATION_NEEDED, OFF_TOPIC_REPLY. \
Use COMPLAINT_CRITICAL when the message describes a threat to life, safety, abuse, \
exploitation or a medical emergency. \
R is a short, polite reply in {language}; you may use {user_first_name} and {institution_name} placeholders. \
C is true only for COMPLAINT_CRITICAL.";

const CRITICALITY_PROMPT: &str = "Decide whether this complaint is critical. A critical complaint \
describes an immediate threat to life or safety, violence, sexual abuse or exploitation, \
or a medical emergency. Answer with exactly one word: CRITICAL or NORMAL.";

const SUMMARY_PROMPT: &str = "Translate the following complaint into English and condense it to \
at most three sentences. Keep names of places and amounts. Answer with the summary only.";

const CATEGORY_PROMPT: &str = "Categorise the complaint. Answer with one JSON object only: \
{\"type\": T, \"category\": C, \"sensitivity\": S}. \
T is a short label such as Service Delivery, Staff Conduct, Eligibility, Payment, General. \
C is one of Water, Food, Health, Shelter, Education, Cash Assistance, Protection, Other. \
S is one of Normal, Sensitive, Highly Sensitive.";

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex is valid"));

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIntent {
    signal: String,
    #[serde(default)]
    reply: String,
    #[serde(default)]
    critical: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(rename = "type")]
    complaint_type: Option<String>,
    category: Option<String>,
    sensitivity: Option<String>,
}

pub struct LlmClassifier {
    http: reqwest::Client,
    settings: LlmSettings,
    institution: InstitutionSettings,
    breaker: CircuitBreaker,
}

impl LlmClassifier {
    pub fn new(settings: LlmSettings, institution: InstitutionSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.recovery.operation_timeout_secs))
            .build()?;
        let breaker = CircuitBreaker::new(&settings.recovery);
        Ok(Self {
            http,
            settings,
            institution,
            breaker,
        })
    }

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, ServiceError> {
        if !self.breaker.try_acquire() {
            return Err(ServiceError::CircuitOpen);
        }

        let mut attempt = 0;
        loop {
            match self.send_once(system, user, max_tokens).await {
                Ok(content) => {
                    self.breaker.record_success();
                    return Ok(content);
                }
                Err(err) if err.is_retryable() && attempt < self.settings.recovery.max_retries => {
                    let delay = retry_delay(&self.settings.recovery, attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %err, "LLM call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.breaker.record_failure();
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: 0.2,
            max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.settings.api_url))
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("status {status}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                ServiceError::Http(message)
            } else {
                ServiceError::InvalidResponse(message)
            });
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ServiceError::InvalidResponse("empty completion".to_string()))
    }
}

/// Exponential backoff with jitter, capped at `max_retry_delay_ms`
fn retry_delay(config: &RecoveryConfig, attempt: u32) -> Duration {
    let exponential = config
        .base_retry_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_retry_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=config.base_retry_delay_ms / 2);
    Duration::from_millis(exponential.saturating_add(jitter).min(config.max_retry_delay_ms))
}

fn extract_json(raw: &str) -> Option<&str> {
    JSON_OBJECT.find(raw).map(|m| m.as_str())
}

/// Map the model's answer onto an `IntentAnalysis`
pub fn parse_intent_response(raw: &str) -> Option<IntentAnalysis> {
    let parsed: RawIntent = serde_json::from_str(extract_json(raw)?).ok()?;
    let (signal, critical) = match parsed.signal.trim().to_uppercase().as_str() {
        "COMPLAINT_NORMAL" => (IntentSignal::Complaint, Some(false)),
        "COMPLAINT_CRITICAL" => (IntentSignal::Complaint, Some(true)),
        "COMPLAINT" => (IntentSignal::Complaint, parsed.critical),
        "SUGGESTION_RECEIVED" | "SUGGESTION" => (IntentSignal::Suggestion, None),
        "GREETING_START" | "CLARIFICATION_NEEDED" | "GENERAL_INQUIRY" => (IntentSignal::GeneralInquiry, None),
        "OFF_TOPIC_REPLY" | "IRRELEVANT" => (IntentSignal::Irrelevant, None),
        _ => return None,
    };
    Some(IntentAnalysis {
        signal,
        reply_text: parsed.reply.trim().to_string(),
        critical,
    })
}

pub fn parse_criticality_response(raw: &str) -> Option<bool> {
    let answer = raw.trim().trim_matches(|c: char| !c.is_alphabetic()).to_uppercase();
    match answer.as_str() {
        "CRITICAL" => Some(true),
        "NORMAL" => Some(false),
        _ => None,
    }
}

pub fn parse_classification_response(raw: &str) -> Option<Classification> {
    let parsed: RawClassification = serde_json::from_str(extract_json(raw)?).ok()?;
    let defaults = Classification::default();
    let pick = |value: Option<String>, default: String| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
    };
    Some(Classification {
        complaint_type: pick(parsed.complaint_type, defaults.complaint_type),
        category: pick(parsed.category, defaults.category),
        sensitivity: pick(parsed.sensitivity, defaults.sensitivity),
    })
}

/// Fill the placeholders the intent prompt allows the model to use
pub fn render_reply(template: &str, display_name: &str, institution_name: &str) -> String {
    template
        .replace("{user_first_name}", display_name)
        .replace("{institution_name}", institution_name)
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, text: &str, display_name: &str, language: Language) -> IntentAnalysis {
        let institution_name = self.institution.name(language);
        let language_name = match language {
            Language::English => "English",
            Language::Arabic => "Arabic",
        };
        let system = INTENT_PROMPT
            .replace("{language}", language_name)
            .replace("{institution_name}", institution_name);

        match self.complete(&system, text, 300).await {
            Ok(raw) => match parse_intent_response(&raw) {
                Some(mut analysis) => {
                    analysis.reply_text = render_reply(&analysis.reply_text, display_name, institution_name);
                    debug!(signal = ?analysis.signal, critical = ?analysis.critical, "Classified free text");
                    analysis
                }
                None => {
                    warn!(response_length = raw.len(), "Unparseable intent classification");
                    IntentAnalysis::fallback()
                }
            },
            Err(e) => {
                warn!(error = %e, "Intent classification failed, using fallback");
                IntentAnalysis::fallback()
            }
        }
    }

    async fn is_critical(&self, text: &str) -> bool {
        match self.complete(CRITICALITY_PROMPT, text, 5).await {
            Ok(raw) => parse_criticality_response(&raw).unwrap_or_else(|| {
                warn!(response = %raw, "Unexpected criticality answer, treating as normal");
                false
            }),
            Err(e) => {
                warn!(error = %e, "Criticality check failed, treating as normal");
                false
            }
        }
    }

    async fn summarize(&self, text: &str) -> Option<String> {
        match self.complete(SUMMARY_PROMPT, text, 400).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Summarization failed");
                None
            }
        }
    }

    async fn categorize(&self, text: &str) -> Classification {
        match self.complete(CATEGORY_PROMPT, text, 120).await {
            Ok(raw) => parse_classification_response(&raw).unwrap_or_else(|| {
                warn!(response_length = raw.len(), "Unparseable classification, using defaults");
                Classification::default()
            }),
            Err(e) => {
                warn!(error = %e, "Categorisation failed, using defaults");
                Classification::default()
            }
        }
    }
}
