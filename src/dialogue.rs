//! # Dialogue Model
//!
//! The one and only definition of where a user can be in a conversation,
//! the draft submission carried through it, the field validators, and the
//! parsed form of inline-button payloads.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::localization::{all_translations, Language};
use crate::services::{Classification, Profile};

/// What the user is submitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionKind {
    Complaint,
    Suggestion,
    Feedback,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::Complaint => "complaint",
            SubmissionKind::Suggestion => "suggestion",
            SubmissionKind::Feedback => "feedback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "complaint" => Some(SubmissionKind::Complaint),
            "suggestion" => Some(SubmissionKind::Suggestion),
            "feedback" => Some(SubmissionKind::Feedback),
            _ => None,
        }
    }
}

/// What kind of input a state waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Text,
    Choice,
    TextOrChoice,
}

/// Position inside a submission flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    AskNewOrReminder,
    ConfirmExistingProfile,
    CollectingName,
    CollectingSex,
    CollectingPhone,
    CollectingResidence,
    CollectingGovernorate,
    CollectingDirectorate,
    CollectingVillage,
    CollectingComplaintText,
    ConfirmSubmission,
    CriticalCollectingName,
    CriticalCollectingPhone,
    CollectingSuggestionText,
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            FlowState::AskNewOrReminder => "ASK_NEW_OR_REMINDER",
            FlowState::ConfirmExistingProfile => "CONFIRM_EXISTING_PROFILE",
            FlowState::CollectingName => "COLLECTING_NAME",
            FlowState::CollectingSex => "COLLECTING_SEX",
            FlowState::CollectingPhone => "COLLECTING_PHONE",
            FlowState::CollectingResidence => "COLLECTING_RESIDENCE",
            FlowState::CollectingGovernorate => "COLLECTING_GOVERNORATE",
            FlowState::CollectingDirectorate => "COLLECTING_DIRECTORATE",
            FlowState::CollectingVillage => "COLLECTING_VILLAGE",
            FlowState::CollectingComplaintText => "COLLECTING_COMPLAINT_TEXT",
            FlowState::ConfirmSubmission => "CONFIRM_SUBMISSION",
            FlowState::CriticalCollectingName => "CRITICAL_COLLECTING_NAME",
            FlowState::CriticalCollectingPhone => "CRITICAL_COLLECTING_PHONE",
            FlowState::CollectingSuggestionText => "COLLECTING_SUGGESTION_TEXT",
        }
    }

    pub fn expected_input(&self) -> InputKind {
        match self {
            FlowState::AskNewOrReminder | FlowState::ConfirmSubmission => InputKind::Choice,
            FlowState::ConfirmExistingProfile
            | FlowState::CollectingSex
            | FlowState::CollectingResidence
            | FlowState::CollectingGovernorate => InputKind::TextOrChoice,
            _ => InputKind::Text,
        }
    }

    /// Successor inside the profile field chain; `None` once the chain ends
    pub fn next_profile_field(&self) -> Option<FlowState> {
        match self {
            FlowState::CollectingName => Some(FlowState::CollectingSex),
            FlowState::CollectingSex => Some(FlowState::CollectingPhone),
            FlowState::CollectingPhone => Some(FlowState::CollectingResidence),
            FlowState::CollectingResidence => Some(FlowState::CollectingGovernorate),
            FlowState::CollectingGovernorate => Some(FlowState::CollectingDirectorate),
            FlowState::CollectingDirectorate => Some(FlowState::CollectingVillage),
            _ => None,
        }
    }
}

/// Position inside the admin menu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminState {
    Menu,
    ViewingStats,
    ViewingExport,
}

impl AdminState {
    pub fn name(&self) -> &'static str {
        match self {
            AdminState::Menu => "ADMIN_MENU",
            AdminState::ViewingStats => "ADMIN_VIEW_STATS",
            AdminState::ViewingExport => "ADMIN_EXPORT",
        }
    }
}

/// A user's active conversation; absence means the user is idle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Conversation {
    Submission { state: FlowState, record: SubmissionRecord },
    Admin { state: AdminState },
}

impl Conversation {
    pub fn state_name(&self) -> &'static str {
        match self {
            Conversation::Submission { state, .. } => state.name(),
            Conversation::Admin { state } => state.name(),
        }
    }

    pub fn flow_state(&self) -> Option<FlowState> {
        match self {
            Conversation::Submission { state, .. } => Some(*state),
            Conversation::Admin { .. } => None,
        }
    }

    pub fn record(&self) -> Option<&SubmissionRecord> {
        match self {
            Conversation::Submission { record, .. } => Some(record),
            Conversation::Admin { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    PreferNotToSay,
}

impl Sex {
    pub const ALL: [Sex; 3] = [Sex::Male, Sex::Female, Sex::PreferNotToSay];

    pub fn code(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
            Sex::PreferNotToSay => "prefer_not_say",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|sex| sex.code() == code)
    }

    pub fn label_key(&self) -> &'static str {
        match self {
            Sex::Male => "sex-male",
            Sex::Female => "sex-female",
            Sex::PreferNotToSay => "sex-prefer-not-say",
        }
    }

    fn abbreviations(&self) -> &'static [&'static str] {
        match self {
            Sex::Male => &["m", "male"],
            Sex::Female => &["f", "female"],
            Sex::PreferNotToSay => &["prefer not to say", "prefer not", "none"],
        }
    }

    /// Match a typed answer against every language's label and the English short forms
    pub fn parse_answer(input: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|sex| matches_choice(input, sex.label_key(), sex.abbreviations()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidenceStatus {
    Resident,
    InternallyDisplaced,
    Returnee,
}

impl ResidenceStatus {
    pub const ALL: [ResidenceStatus; 3] = [
        ResidenceStatus::Resident,
        ResidenceStatus::InternallyDisplaced,
        ResidenceStatus::Returnee,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ResidenceStatus::Resident => "resident",
            ResidenceStatus::InternallyDisplaced => "idp",
            ResidenceStatus::Returnee => "returnee",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    pub fn label_key(&self) -> &'static str {
        match self {
            ResidenceStatus::Resident => "residence-resident",
            ResidenceStatus::InternallyDisplaced => "residence-idp",
            ResidenceStatus::Returnee => "residence-returnee",
        }
    }

    fn abbreviations(&self) -> &'static [&'static str] {
        match self {
            ResidenceStatus::Resident => &["resident"],
            ResidenceStatus::InternallyDisplaced => &["idp", "displaced", "internally displaced"],
            ResidenceStatus::Returnee => &["returnee", "returned"],
        }
    }

    pub fn parse_answer(input: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| matches_choice(input, status.label_key(), status.abbreviations()))
    }
}

fn matches_choice(input: &str, label_key: &str, abbreviations: &[&str]) -> bool {
    let answer = input.trim().to_lowercase();
    if answer.is_empty() {
        return false;
    }
    abbreviations.iter().any(|abbr| *abbr == answer)
        || all_translations(label_key)
            .iter()
            .any(|label| label.trim().to_lowercase() == answer)
}

/// Governorates offered as buttons, English and Arabic names
pub const GOVERNORATES: [(&str, &str); 13] = [
    ("Sana'a", "صنعاء"),
    ("Aden", "عدن"),
    ("Taiz", "تعز"),
    ("Al-Hudaydah", "الحديدة"),
    ("Ibb", "إب"),
    ("Dhamar", "ذمار"),
    ("Marib", "مأرب"),
    ("Lahij", "لحج"),
    ("Abyan", "أبين"),
    ("Shabwah", "شبوة"),
    ("Hadramawt", "حضرموت"),
    ("Al-Mahrah", "المهرة"),
    ("Soqotra", "سقطرى"),
];

pub fn governorate_label(index: usize, language: Language) -> Option<&'static str> {
    GOVERNORATES.get(index).map(|(en, ar)| match language {
        Language::English => *en,
        Language::Arabic => *ar,
    })
}

/// Draft of one in-progress submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub user_id: i64,
    pub kind: SubmissionKind,
    pub name: Option<String>,
    pub sex: Option<Sex>,
    pub phone: Option<String>,
    pub residence_status: Option<ResidenceStatus>,
    pub governorate: Option<String>,
    pub directorate: Option<String>,
    pub village: Option<String>,
    pub original_text: Option<String>,
    pub derived_summary: Option<String>,
    /// `None` until the first text capture decides it
    criticality: Option<bool>,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub classification: Option<Classification>,
    pub created_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn new(user_id: i64, kind: SubmissionKind, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            kind,
            name: None,
            sex: None,
            phone: None,
            residence_status: None,
            governorate: None,
            directorate: None,
            village: None,
            original_text: None,
            derived_summary: None,
            criticality: None,
            source_timestamp: None,
            classification: None,
            created_at,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.criticality.unwrap_or(false)
    }

    pub fn criticality_decided(&self) -> bool {
        self.criticality.is_some()
    }

    /// Set criticality if not decided yet; returns the value in effect afterwards
    pub fn decide_criticality(&mut self, critical: bool) -> bool {
        *self.criticality.get_or_insert(critical)
    }

    pub fn capture_text(&mut self, text: String, timestamp: DateTime<Utc>) {
        self.original_text = Some(text);
        self.source_timestamp = Some(timestamp);
    }

    pub fn apply_profile(&mut self, profile: &Profile) {
        self.name = Some(profile.name.clone());
        self.sex = profile.sex;
        self.phone = profile.phone.clone();
        self.residence_status = profile.residence_status;
        self.governorate = profile.governorate.clone();
        self.directorate = profile.directorate.clone();
        self.village = profile.village.clone();
    }

    pub fn clear_profile_fields(&mut self) {
        self.name = None;
        self.sex = None;
        self.phone = None;
        self.residence_status = None;
        self.governorate = None;
        self.directorate = None;
        self.village = None;
    }

    /// Partial reset used by the review screen's restart button.
    /// Keeps what the user told us about the problem, drops who and where.
    /// The English summary is derived from the kept text, so it stays too.
    pub fn reset_for_restart(&mut self) {
        self.clear_profile_fields();
        self.classification = None;
    }

    pub fn has_all_profile_fields(&self) -> bool {
        self.name.is_some()
            && self.sex.is_some()
            && self.phone.is_some()
            && self.residence_status.is_some()
            && self.governorate.is_some()
            && self.directorate.is_some()
            && self.village.is_some()
    }

    /// Profile to write back after submission; requires a name
    pub fn to_profile(&self) -> Option<Profile> {
        let name = self.name.clone()?;
        Some(Profile {
            user_id: self.user_id,
            name,
            sex: self.sex,
            phone: self.phone.clone(),
            residence_status: self.residence_status,
            governorate: self.governorate.clone(),
            directorate: self.directorate.clone(),
            village: self.village.clone(),
        })
    }
}

/// Parsed inline-button payload (`action:value`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    StartFlow(SubmissionKind),
    NewComplaint,
    Reminder,
    ReuseProfile(bool),
    Sex(Sex),
    Residence(ResidenceStatus),
    Governorate(usize),
    GovernorateOther,
    ConfirmSubmission,
    RestartSubmission,
    Admin(AdminAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Stats,
    Export,
    Back,
    Exit,
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let (action, value) = data.split_once(':')?;
        match (action, value) {
            ("start", kind) => SubmissionKind::parse(kind).map(CallbackAction::StartFlow),
            ("flow", "new") => Some(CallbackAction::NewComplaint),
            ("flow", "reminder") => Some(CallbackAction::Reminder),
            ("profile", "yes") => Some(CallbackAction::ReuseProfile(true)),
            ("profile", "no") => Some(CallbackAction::ReuseProfile(false)),
            ("sex", code) => Sex::from_code(code).map(CallbackAction::Sex),
            ("residence", code) => ResidenceStatus::from_code(code).map(CallbackAction::Residence),
            ("gov", "other") => Some(CallbackAction::GovernorateOther),
            ("gov", index) => index
                .parse::<usize>()
                .ok()
                .filter(|i| *i < GOVERNORATES.len())
                .map(CallbackAction::Governorate),
            ("submit", "confirm") => Some(CallbackAction::ConfirmSubmission),
            ("submit", "restart") => Some(CallbackAction::RestartSubmission),
            ("admin", "stats") => Some(CallbackAction::Admin(AdminAction::Stats)),
            ("admin", "export") => Some(CallbackAction::Admin(AdminAction::Export)),
            ("admin", "back") => Some(CallbackAction::Admin(AdminAction::Back)),
            ("admin", "exit") => Some(CallbackAction::Admin(AdminAction::Exit)),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            CallbackAction::StartFlow(kind) => format!("start:{}", kind.as_str()),
            CallbackAction::NewComplaint => "flow:new".to_string(),
            CallbackAction::Reminder => "flow:reminder".to_string(),
            CallbackAction::ReuseProfile(true) => "profile:yes".to_string(),
            CallbackAction::ReuseProfile(false) => "profile:no".to_string(),
            CallbackAction::Sex(sex) => format!("sex:{}", sex.code()),
            CallbackAction::Residence(status) => format!("residence:{}", status.code()),
            CallbackAction::Governorate(index) => format!("gov:{index}"),
            CallbackAction::GovernorateOther => "gov:other".to_string(),
            CallbackAction::ConfirmSubmission => "submit:confirm".to_string(),
            CallbackAction::RestartSubmission => "submit:restart".to_string(),
            CallbackAction::Admin(AdminAction::Stats) => "admin:stats".to_string(),
            CallbackAction::Admin(AdminAction::Export) => "admin:export".to_string(),
            CallbackAction::Admin(AdminAction::Back) => "admin:back".to_string(),
            CallbackAction::Admin(AdminAction::Exit) => "admin:exit".to_string(),
        }
    }
}

static NON_ASCII_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9]").expect("static regex is valid"));

/// Replace Eastern Arabic and Persian digits with ASCII ones
pub fn normalize_digits(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
            '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
            _ => c,
        })
        .collect()
}

/// Validate a person's name: at least `min_words` whitespace-separated tokens
pub fn validate_name(input: &str, min_words: usize, max_length: usize) -> Result<String, &'static str> {
    let trimmed = input.trim();
    if trimmed.chars().count() > max_length {
        return Err("validation-too-long");
    }
    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if words.len() < min_words {
        return Err("validation-name");
    }
    Ok(words.join(" "))
}

/// Validate a phone number: at least `min_digits` digits once everything else is stripped
pub fn validate_phone(input: &str, min_digits: usize) -> Result<String, &'static str> {
    let normalized = normalize_digits(input.trim());
    let digits = NON_ASCII_DIGIT.replace_all(&normalized, "");
    if digits.len() < min_digits {
        return Err("validation-phone");
    }
    Ok(normalized)
}

/// Validate a free-form location field (governorate, directorate, village)
pub fn validate_location(input: &str, max_length: usize) -> Result<String, &'static str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("validation-location");
    }
    if trimmed.chars().count() > max_length {
        return Err("validation-too-long");
    }
    Ok(trimmed.to_string())
}

/// Validate submission text length in characters
pub fn validate_free_text(
    input: &str,
    min_length: usize,
    max_length: usize,
) -> Result<String, &'static str> {
    let trimmed = input.trim();
    let length = trimmed.chars().count();
    if length < min_length {
        return Err("validation-text-too-short");
    }
    if length > max_length {
        return Err("validation-too-long");
    }
    Ok(trimmed.to_string())
}

/// True when more than half of the letters are in the Arabic blocks
pub fn is_arabic_text(text: &str) -> bool {
    let mut letters = 0usize;
    let mut arabic = 0usize;
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if matches!(c, '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}') {
            arabic += 1;
        }
    }
    letters > 0 && arabic * 2 > letters
}

/// Cut `text` to at most `max_chars` characters, marking the cut
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(max_chars).collect();
    preview.push('…');
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_parse_matches_encode() {
        let actions = [
            CallbackAction::StartFlow(SubmissionKind::Feedback),
            CallbackAction::Reminder,
            CallbackAction::ReuseProfile(false),
            CallbackAction::Sex(Sex::PreferNotToSay),
            CallbackAction::Residence(ResidenceStatus::InternallyDisplaced),
            CallbackAction::Governorate(12),
            CallbackAction::GovernorateOther,
            CallbackAction::RestartSubmission,
            CallbackAction::Admin(AdminAction::Back),
        ];
        for action in actions {
            assert_eq!(CallbackAction::parse(&action.encode()), Some(action));
        }
    }

    #[test]
    fn test_callback_parse_rejects_unknown_payloads() {
        assert_eq!(CallbackAction::parse("confirm"), None);
        assert_eq!(CallbackAction::parse("sex:other"), None);
        assert_eq!(CallbackAction::parse("gov:13"), None);
        assert_eq!(CallbackAction::parse("gov:-1"), None);
        assert_eq!(CallbackAction::parse("start:recipe"), None);
    }

    #[test]
    fn test_normalize_eastern_digits() {
        assert_eq!(normalize_digits("٠٧٧١٢٣٤٥٦٧"), "0771234567");
        assert_eq!(normalize_digits("۰۹۱"), "091");
        assert_eq!(normalize_digits("+967 77"), "+967 77");
    }

    #[test]
    fn test_arabic_detection_uses_letter_majority() {
        assert!(is_arabic_text("انقطاع المياه منذ أسبوعين"));
        assert!(!is_arabic_text("water shortage for two weeks"));
        assert!(!is_arabic_text("1234 !!"));
        // Two Arabic words against three English ones
        assert!(!is_arabic_text("الماء مقطوع water is gone"));
    }

    #[test]
    fn test_truncate_preview_counts_characters() {
        assert_eq!(truncate_preview("short", 10), "short");
        assert_eq!(truncate_preview("abcdefghij", 4), "abcd…");
        assert_eq!(truncate_preview("مرحبا بكم", 5), "مرحبا…");
    }

    #[test]
    fn test_flow_state_chain_covers_profile_fields() {
        let mut state = FlowState::CollectingName;
        let mut visited = vec![state];
        while let Some(next) = state.next_profile_field() {
            visited.push(next);
            state = next;
        }
        assert_eq!(visited.len(), 7);
        assert_eq!(visited.last(), Some(&FlowState::CollectingVillage));
    }
}
