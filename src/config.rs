//! # Configuration Module
//!
//! Environment-driven settings for the bot, the LLM client, the database
//! and the conversation rules. `AppConfig::from_env` is what `main` calls;
//! `AppConfig::from_lookup` takes any key lookup so parsing can be tested
//! without touching the process environment.

use anyhow::{anyhow, Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::localization::Language;

pub const DEFAULT_LLM_API_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_LLM_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_REFERENCE_PREFIX: &str = "CMP";

/// Recovery configuration for remote calls
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum number of retry attempts after the first call
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
    /// Timeout for a single request in seconds
    pub operation_timeout_secs: u64,
    /// Circuit breaker failure threshold
    pub circuit_breaker_threshold: u32,
    /// Circuit breaker reset timeout in seconds
    pub circuit_breaker_reset_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_retry_delay_ms: 500,
            max_retry_delay_ms: 5000,
            operation_timeout_secs: 20,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_secs: 60,
        }
    }
}

/// Connection settings for the OpenAI-compatible LLM endpoint
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub recovery: RecoveryConfig,
}

/// Who runs the desk; shown in /contact and substituted into LLM replies
#[derive(Debug, Clone)]
pub struct InstitutionSettings {
    pub name_en: String,
    pub name_ar: String,
    pub phone: String,
    pub email: String,
}

impl InstitutionSettings {
    pub fn name(&self, language: Language) -> &str {
        match language {
            Language::English => &self.name_en,
            Language::Arabic => &self.name_ar,
        }
    }
}

impl Default for InstitutionSettings {
    fn default() -> Self {
        Self {
            name_en: "Community Feedback Desk".to_string(),
            name_ar: "مكتب ملاحظات المجتمع".to_string(),
            phone: "-".to_string(),
            email: "-".to_string(),
        }
    }
}

/// Thresholds applied by the field validators
#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub min_name_words: usize,
    pub min_phone_digits: usize,
    pub min_complaint_length: usize,
    pub min_suggestion_length: usize,
    pub max_input_length: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            min_name_words: 2,
            min_phone_digits: 7,
            min_complaint_length: 20,
            min_suggestion_length: 15,
            max_input_length: 2000,
        }
    }
}

/// Everything the conversation engine needs to know besides its collaborators
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub validation: ValidationSettings,
    /// Characters of submission text shown on the review screen
    pub summary_preview_length: usize,
    /// Rows returned by the admin export view
    pub export_limit: i64,
    pub admin_user_ids: Vec<i64>,
    /// Upper bound on waiting for the critical-case notification
    pub notify_timeout: Duration,
    pub institution: InstitutionSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            validation: ValidationSettings::default(),
            summary_preview_length: 300,
            export_limit: 20,
            admin_user_ids: Vec::new(),
            notify_timeout: Duration::from_secs(10),
            institution: InstitutionSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

/// Process-wide configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub llm: LlmSettings,
    /// Chats that receive critical-case alerts
    pub alert_chat_ids: Vec<i64>,
    pub reference_prefix: String,
    pub engine: EngineSettings,
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).ok_or_else(|| anyhow!("{key} must be set"));

        let recovery_defaults = RecoveryConfig::default();
        let recovery = RecoveryConfig {
            max_retries: parse_or(get("LLM_MAX_RETRIES"), "LLM_MAX_RETRIES", recovery_defaults.max_retries)?,
            operation_timeout_secs: parse_or(
                get("LLM_TIMEOUT_SECS"),
                "LLM_TIMEOUT_SECS",
                recovery_defaults.operation_timeout_secs,
            )?,
            circuit_breaker_threshold: parse_or(
                get("LLM_BREAKER_THRESHOLD"),
                "LLM_BREAKER_THRESHOLD",
                recovery_defaults.circuit_breaker_threshold,
            )?,
            circuit_breaker_reset_secs: parse_or(
                get("LLM_BREAKER_RESET_SECS"),
                "LLM_BREAKER_RESET_SECS",
                recovery_defaults.circuit_breaker_reset_secs,
            )?,
            ..recovery_defaults
        };

        let llm = LlmSettings {
            api_url: get("LLM_API_URL")
                .unwrap_or_else(|| DEFAULT_LLM_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: required("LLM_API_KEY")?,
            model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            recovery,
        };

        let validation_defaults = ValidationSettings::default();
        let validation = ValidationSettings {
            min_name_words: parse_or(get("MIN_NAME_WORDS"), "MIN_NAME_WORDS", validation_defaults.min_name_words)?,
            min_phone_digits: parse_or(
                get("MIN_PHONE_DIGITS"),
                "MIN_PHONE_DIGITS",
                validation_defaults.min_phone_digits,
            )?,
            min_complaint_length: parse_or(
                get("MIN_COMPLAINT_LENGTH"),
                "MIN_COMPLAINT_LENGTH",
                validation_defaults.min_complaint_length,
            )?,
            min_suggestion_length: parse_or(
                get("MIN_SUGGESTION_LENGTH"),
                "MIN_SUGGESTION_LENGTH",
                validation_defaults.min_suggestion_length,
            )?,
            max_input_length: parse_or(
                get("MAX_INPUT_LENGTH"),
                "MAX_INPUT_LENGTH",
                validation_defaults.max_input_length,
            )?,
        };

        let institution_defaults = InstitutionSettings::default();
        let institution = InstitutionSettings {
            name_en: get("INSTITUTION_NAME_EN").unwrap_or(institution_defaults.name_en),
            name_ar: get("INSTITUTION_NAME_AR").unwrap_or(institution_defaults.name_ar),
            phone: get("INSTITUTION_PHONE").unwrap_or(institution_defaults.phone),
            email: get("INSTITUTION_EMAIL").unwrap_or(institution_defaults.email),
        };

        let engine_defaults = EngineSettings::default();
        let admin_user_ids = parse_id_list(get("ADMIN_USER_IDS"), "ADMIN_USER_IDS")?;
        let alert_chat_ids = match get("CRITICAL_ALERT_CHAT_IDS") {
            Some(raw) => parse_id_list(Some(raw), "CRITICAL_ALERT_CHAT_IDS")?,
            None => admin_user_ids.clone(),
        };
        let notify_timeout_secs: u64 = parse_or(get("NOTIFY_TIMEOUT_SECS"), "NOTIFY_TIMEOUT_SECS", 10)?;

        let engine = EngineSettings {
            validation,
            summary_preview_length: parse_or(
                get("SUMMARY_PREVIEW_LENGTH"),
                "SUMMARY_PREVIEW_LENGTH",
                engine_defaults.summary_preview_length,
            )?,
            export_limit: parse_or(get("EXPORT_LIMIT"), "EXPORT_LIMIT", engine_defaults.export_limit)?,
            admin_user_ids,
            notify_timeout: Duration::from_secs(notify_timeout_secs),
            institution,
        };

        Ok(Self {
            bot_token: required("TELEGRAM_BOT_TOKEN")?,
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_or(get("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", 5)?,
            llm,
            alert_chat_ids,
            reference_prefix: get("REFERENCE_PREFIX").unwrap_or_else(|| DEFAULT_REFERENCE_PREFIX.to_string()),
            engine,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {value}")),
        None => Ok(default),
    }
}

/// Parse a comma-separated list of Telegram ids
fn parse_id_list(raw: Option<String>, key: &str) -> Result<Vec<i64>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .with_context(|| format!("{key} contains an invalid id: {part}"))
        })
        .collect()
}
