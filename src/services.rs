//! Collaborator contracts consumed by the conversation engine.
//!
//! The engine only ever talks to these traits; the Postgres store, the LLM
//! client and the Telegram notifier are the production implementations and
//! the integration tests plug in in-memory ones.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dialogue::{ResidenceStatus, Sex, SubmissionKind, SubmissionRecord};
use crate::localization::Language;

/// Coarse routing signal for free text sent while idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentSignal {
    Complaint,
    Suggestion,
    GeneralInquiry,
    Irrelevant,
}

/// Result of classifying free text
#[derive(Debug, Clone, PartialEq)]
pub struct IntentAnalysis {
    pub signal: IntentSignal,
    /// Reply to show the user; may be empty
    pub reply_text: String,
    /// Criticality, when the classifier already judged it
    pub critical: Option<bool>,
}

impl IntentAnalysis {
    /// Safe default used whenever classification fails
    pub fn fallback() -> Self {
        Self {
            signal: IntentSignal::GeneralInquiry,
            reply_text: String::new(),
            critical: None,
        }
    }
}

/// Categorisation stored alongside a complaint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub complaint_type: String,
    pub category: String,
    pub sensitivity: String,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            complaint_type: "General".to_string(),
            category: "Other".to_string(),
            sensitivity: "Normal".to_string(),
        }
    }
}

/// Persisted identity and location of a beneficiary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: i64,
    pub name: String,
    pub sex: Option<Sex>,
    pub phone: Option<String>,
    pub residence_status: Option<ResidenceStatus>,
    pub governorate: Option<String>,
    pub directorate: Option<String>,
    pub village: Option<String>,
}

impl Profile {
    /// Worth offering for reuse: we know at least who and how to reach them
    pub fn is_reusable(&self) -> bool {
        !self.name.trim().is_empty() && self.phone.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

/// One stored submission as listed back to users or admins
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionOverview {
    pub id: i64,
    pub reference: String,
    pub kind: SubmissionKind,
    pub is_critical: bool,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
    pub snippet: String,
}

/// Aggregate counters for the admin statistics view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionStats {
    pub total: i64,
    pub critical: i64,
    pub complaints: i64,
    pub suggestions: i64,
    pub feedback: i64,
    pub pending: i64,
}

/// LLM-backed text understanding; every method fails soft
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str, display_name: &str, language: Language) -> IntentAnalysis;

    /// Defaults to `false` on failure
    async fn is_critical(&self, text: &str) -> bool;

    /// English summary of non-English text; `None` on failure
    async fn summarize(&self, text: &str) -> Option<String>;

    /// Defaults to `Classification::default()` on failure
    async fn categorize(&self, text: &str) -> Classification;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: i64) -> Result<Option<Profile>>;

    /// Merge non-empty fields over the stored profile
    async fn save_profile(&self, profile: &Profile) -> Result<bool>;
}

#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// Persist a finalized record and return its reference id
    async fn log_submission(&self, record: &SubmissionRecord) -> Result<String>;

    /// Most recent first, capped to a handful
    async fn previous_submissions(&self, user_id: i64) -> Result<Vec<SubmissionOverview>>;

    /// Every complaint the user ever filed, not just the listed ones
    async fn complaint_count(&self, user_id: i64) -> Result<i64>;

    async fn log_reminder(&self, user_id: i64, submission_id: i64) -> Result<()>;

    async fn statistics(&self) -> Result<SubmissionStats>;

    async fn export_recent(&self, limit: i64) -> Result<Vec<SubmissionOverview>>;
}

#[async_trait]
pub trait CriticalNotifier: Send + Sync {
    async fn notify_critical(&self, reference: &str, record: &SubmissionRecord) -> Result<()>;
}
