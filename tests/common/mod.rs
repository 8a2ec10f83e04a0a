//! In-memory collaborators and a small driver for the conversation engine.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use complaint_desk::bot::{Command, ConversationEngine, EventKind, InboundEvent, Reply, Services};
use complaint_desk::config::EngineSettings;
use complaint_desk::dialogue::{CallbackAction, Conversation, FlowState, SubmissionKind, SubmissionRecord};
use complaint_desk::localization::Language;
use complaint_desk::services::{
    Classification, CriticalNotifier, IntentAnalysis, IntentClassifier, IntentSignal, Profile, ProfileStore,
    SubmissionOverview, SubmissionSink, SubmissionStats,
};
use complaint_desk::session_store::Session;

pub const USER: i64 = 1001;
pub const ADMIN: i64 = 9000;

// Update ids grow with every event built, like Telegram's
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub fn timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
}

/// Pauses `is_critical` until the test releases it
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

pub struct FakeClassifier {
    intent: Mutex<IntentAnalysis>,
    critical: AtomicBool,
    summary: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Gate>>>,
    pub classify_calls: AtomicUsize,
    pub is_critical_calls: AtomicUsize,
    pub summarize_calls: AtomicUsize,
    pub categorize_calls: AtomicUsize,
}

impl Default for FakeClassifier {
    fn default() -> Self {
        Self {
            intent: Mutex::new(IntentAnalysis::fallback()),
            critical: AtomicBool::new(false),
            summary: Mutex::new(Some("Water has been cut for two weeks.".to_string())),
            gate: Mutex::new(None),
            classify_calls: AtomicUsize::new(0),
            is_critical_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
            categorize_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeClassifier {
    pub fn set_intent(&self, signal: IntentSignal, reply: &str, critical: Option<bool>) {
        *self.intent.lock().unwrap() = IntentAnalysis {
            signal,
            reply_text: reply.to_string(),
            critical,
        };
    }

    pub fn set_critical(&self, critical: bool) {
        self.critical.store(critical, Ordering::SeqCst);
    }

    pub fn set_gate(&self, gate: Arc<Gate>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentClassifier for FakeClassifier {
    async fn classify(&self, _text: &str, _display_name: &str, _language: Language) -> IntentAnalysis {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.intent.lock().unwrap().clone()
    }

    async fn is_critical(&self, _text: &str) -> bool {
        self.is_critical_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.critical.load(Ordering::SeqCst)
    }

    async fn summarize(&self, _text: &str) -> Option<String> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        self.summary.lock().unwrap().clone()
    }

    async fn categorize(&self, _text: &str) -> Classification {
        self.categorize_calls.fetch_add(1, Ordering::SeqCst);
        Classification {
            complaint_type: "Service Delivery".to_string(),
            category: "Water".to_string(),
            sensitivity: "Normal".to_string(),
        }
    }
}

#[derive(Default)]
pub struct MemoryProfiles {
    pub profiles: Mutex<HashMap<i64, Profile>>,
    pub saved: Mutex<Vec<Profile>>,
    pub fail_lookups: AtomicBool,
}

impl MemoryProfiles {
    pub fn insert(&self, profile: Profile) {
        self.profiles.lock().unwrap().insert(profile.user_id, profile);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfiles {
    async fn get_profile(&self, user_id: i64) -> Result<Option<Profile>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            bail!("profile store unavailable");
        }
        Ok(self.profiles.lock().unwrap().get(&user_id).cloned())
    }

    async fn save_profile(&self, profile: &Profile) -> Result<bool> {
        self.saved.lock().unwrap().push(profile.clone());
        self.profiles.lock().unwrap().insert(profile.user_id, profile.clone());
        Ok(true)
    }
}

pub struct MemorySink {
    pub submissions: Mutex<Vec<SubmissionRecord>>,
    pub prior: Mutex<HashMap<i64, Vec<SubmissionOverview>>>,
    pub reminders: Mutex<Vec<(i64, i64)>>,
    pub fail_writes: AtomicBool,
    /// Complaint total reported instead of the length of `prior`
    pub total_complaints: Mutex<Option<i64>>,
    next_id: AtomicI64,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            prior: Mutex::new(HashMap::new()),
            reminders: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            total_complaints: Mutex::new(None),
            next_id: AtomicI64::new(1),
        }
    }
}

impl MemorySink {
    pub fn add_prior(&self, user_id: i64, id: i64) {
        self.prior.lock().unwrap().entry(user_id).or_default().push(SubmissionOverview {
            id,
            reference: format!("CMP-{id:06}"),
            kind: SubmissionKind::Complaint,
            is_critical: false,
            status: "PENDING".to_string(),
            submitted_at: timestamp(),
            snippet: "Earlier complaint".to_string(),
        });
    }

    pub fn submitted(&self) -> Vec<SubmissionRecord> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionSink for MemorySink {
    async fn log_submission(&self, record: &SubmissionRecord) -> Result<String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("database unavailable");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.submissions.lock().unwrap().push(record.clone());
        Ok(format!("CMP-{id:06}"))
    }

    async fn previous_submissions(&self, user_id: i64) -> Result<Vec<SubmissionOverview>> {
        Ok(self.prior.lock().unwrap().get(&user_id).cloned().unwrap_or_default())
    }

    async fn complaint_count(&self, user_id: i64) -> Result<i64> {
        if let Some(total) = *self.total_complaints.lock().unwrap() {
            return Ok(total);
        }
        Ok(self.prior.lock().unwrap().get(&user_id).map_or(0, |p| p.len() as i64))
    }

    async fn log_reminder(&self, user_id: i64, submission_id: i64) -> Result<()> {
        self.reminders.lock().unwrap().push((user_id, submission_id));
        Ok(())
    }

    async fn statistics(&self) -> Result<SubmissionStats> {
        let submissions = self.submissions.lock().unwrap();
        let count = |kind: SubmissionKind| submissions.iter().filter(|r| r.kind == kind).count() as i64;
        Ok(SubmissionStats {
            total: submissions.len() as i64,
            critical: submissions.iter().filter(|r| r.is_critical()).count() as i64,
            complaints: count(SubmissionKind::Complaint),
            suggestions: count(SubmissionKind::Suggestion),
            feedback: count(SubmissionKind::Feedback),
            pending: submissions.len() as i64,
        })
    }

    async fn export_recent(&self, limit: i64) -> Result<Vec<SubmissionOverview>> {
        let submissions = self.submissions.lock().unwrap();
        Ok(submissions
            .iter()
            .rev()
            .take(limit as usize)
            .enumerate()
            .map(|(i, record)| SubmissionOverview {
                id: i as i64 + 1,
                reference: format!("CMP-{:06}", i + 1),
                kind: record.kind,
                is_critical: record.is_critical(),
                status: "PENDING".to_string(),
                submitted_at: timestamp(),
                snippet: record.original_text.clone().unwrap_or_default(),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<(String, SubmissionRecord)>>,
    pub fail: AtomicBool,
    /// Never return, so the engine's timeout has to fire
    pub hang: AtomicBool,
}

#[async_trait]
impl CriticalNotifier for RecordingNotifier {
    async fn notify_critical(&self, reference: &str, record: &SubmissionRecord) -> Result<()> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("alert chat unreachable");
        }
        self.alerts.lock().unwrap().push((reference.to_string(), record.clone()));
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<ConversationEngine>,
    pub classifier: Arc<FakeClassifier>,
    pub profiles: Arc<MemoryProfiles>,
    pub sink: Arc<MemorySink>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        admin_user_ids: vec![ADMIN],
        ..EngineSettings::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let classifier = Arc::new(FakeClassifier::default());
        let profiles = Arc::new(MemoryProfiles::default());
        let sink = Arc::new(MemorySink::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let services = Services {
            classifier: classifier.clone(),
            profiles: profiles.clone(),
            sink: sink.clone(),
            notifier: notifier.clone(),
        };
        Self {
            engine: Arc::new(ConversationEngine::new(services, settings)),
            classifier,
            profiles,
            sink,
            notifier,
        }
    }

    pub async fn send(&self, user_id: i64, kind: EventKind) -> Reply {
        self.engine.handle(event(user_id, kind)).await
    }

    pub async fn text(&self, user_id: i64, text: &str) -> Reply {
        self.send(user_id, EventKind::Text(text.to_string())).await
    }

    pub async fn press(&self, user_id: i64, action: CallbackAction) -> Reply {
        self.send(user_id, EventKind::Button(action.encode())).await
    }

    pub async fn command(&self, user_id: i64, command: Command) -> Reply {
        self.send(user_id, EventKind::Command(command)).await
    }

    pub async fn state(&self, user_id: i64) -> Option<FlowState> {
        self.engine
            .store()
            .session(user_id)
            .await
            .and_then(|s| s.conversation.flow_state())
    }

    pub async fn record(&self, user_id: i64) -> Option<SubmissionRecord> {
        self.engine
            .store()
            .session(user_id)
            .await
            .and_then(|s| s.conversation.record().cloned())
    }

    pub fn reminders(&self) -> Vec<(i64, i64)> {
        self.sink.reminders.lock().unwrap().clone()
    }

    pub async fn is_idle(&self, user_id: i64) -> bool {
        self.engine.store().session(user_id).await.is_none()
    }

    /// Put the user directly into `state` with `record`
    pub async fn seed(&self, state: FlowState, record: SubmissionRecord) {
        self.seed_conversation(record.user_id, Conversation::Submission { state, record }).await;
    }

    pub async fn seed_conversation(&self, user_id: i64, conversation: Conversation) {
        let store = self.engine.store();
        let snapshot = store.snapshot(user_id).await;
        let session = Session {
            user_id,
            language: Language::English,
            conversation,
        };
        assert!(store.compare_and_set(user_id, snapshot.generation, Some(session)).await);
    }
}

pub fn event(user_id: i64, kind: EventKind) -> InboundEvent {
    InboundEvent {
        sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::SeqCst),
        user_id,
        display_name: "Ahmed".to_string(),
        language: Language::English,
        timestamp: timestamp(),
        kind,
    }
}

pub fn complaint_record(user_id: i64) -> SubmissionRecord {
    SubmissionRecord::new(user_id, SubmissionKind::Complaint, timestamp())
}

pub fn stored_profile(user_id: i64) -> Profile {
    Profile {
        user_id,
        name: "Fatima Hassan".to_string(),
        sex: Some(complaint_desk::dialogue::Sex::Female),
        phone: Some("0733333333".to_string()),
        residence_status: Some(complaint_desk::dialogue::ResidenceStatus::Returnee),
        governorate: Some("Taiz".to_string()),
        directorate: Some("Al-Qahirah".to_string()),
        village: Some("Old City".to_string()),
    }
}

/// Text of every message in the reply, joined
pub fn all_text(reply: &Reply) -> String {
    reply
        .messages
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
