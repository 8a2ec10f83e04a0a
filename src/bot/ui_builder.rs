//! UI Builder module for creating keyboards and formatting messages

use chrono::{DateTime, Utc};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use super::events::Button;
use crate::dialogue::{
    governorate_label, truncate_preview, AdminAction, CallbackAction, ResidenceStatus, Sex, SubmissionKind,
    SubmissionRecord, GOVERNORATES,
};
use crate::localization::{t_args_lang, t_lang, Language};
use crate::services::{SubmissionOverview, SubmissionStats};

/// Convert button descriptors into a Telegram inline keyboard
pub fn to_inline_keyboard(rows: &[Vec<Button>]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows.iter().map(|row| {
        row.iter()
            .map(|button| InlineKeyboardButton::callback(button.label.clone(), button.action.encode()))
            .collect::<Vec<_>>()
    }))
}

fn button(key: &str, action: CallbackAction, language: Language) -> Button {
    Button::new(t_lang(key, language), action)
}

pub fn initial_action_buttons(language: Language) -> Vec<Vec<Button>> {
    vec![
        vec![button("btn-complaint", CallbackAction::StartFlow(SubmissionKind::Complaint), language)],
        vec![button("btn-suggestion", CallbackAction::StartFlow(SubmissionKind::Suggestion), language)],
        vec![button("btn-feedback", CallbackAction::StartFlow(SubmissionKind::Feedback), language)],
    ]
}

pub fn new_or_reminder_buttons(language: Language) -> Vec<Vec<Button>> {
    vec![vec![
        button("btn-new-complaint", CallbackAction::NewComplaint, language),
        button("btn-reminder", CallbackAction::Reminder, language),
    ]]
}

pub fn profile_reuse_buttons(language: Language) -> Vec<Vec<Button>> {
    vec![
        vec![button("btn-yes", CallbackAction::ReuseProfile(true), language)],
        vec![button("btn-no", CallbackAction::ReuseProfile(false), language)],
    ]
}

pub fn sex_buttons(language: Language) -> Vec<Vec<Button>> {
    vec![
        vec![
            button(Sex::Male.label_key(), CallbackAction::Sex(Sex::Male), language),
            button(Sex::Female.label_key(), CallbackAction::Sex(Sex::Female), language),
        ],
        vec![button(
            Sex::PreferNotToSay.label_key(),
            CallbackAction::Sex(Sex::PreferNotToSay),
            language,
        )],
    ]
}

pub fn residence_buttons(language: Language) -> Vec<Vec<Button>> {
    ResidenceStatus::ALL
        .into_iter()
        .map(|status| vec![button(status.label_key(), CallbackAction::Residence(status), language)])
        .collect()
}

/// Governorates two per row, then "Other"
pub fn governorate_buttons(language: Language) -> Vec<Vec<Button>> {
    let mut rows: Vec<Vec<Button>> = (0..GOVERNORATES.len())
        .filter_map(|index| {
            governorate_label(index, language).map(|label| Button::new(label, CallbackAction::Governorate(index)))
        })
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|chunk| chunk.to_vec())
        .collect();
    rows.push(vec![button("btn-governorate-other", CallbackAction::GovernorateOther, language)]);
    rows
}

pub fn confirm_buttons(language: Language) -> Vec<Vec<Button>> {
    vec![vec![
        button("btn-confirm-submit", CallbackAction::ConfirmSubmission, language),
        button("btn-restart", CallbackAction::RestartSubmission, language),
    ]]
}

pub fn admin_menu_buttons(language: Language) -> Vec<Vec<Button>> {
    vec![
        vec![
            button("btn-admin-stats", CallbackAction::Admin(AdminAction::Stats), language),
            button("btn-admin-export", CallbackAction::Admin(AdminAction::Export), language),
        ],
        vec![button("btn-admin-exit", CallbackAction::Admin(AdminAction::Exit), language)],
    ]
}

pub fn admin_view_buttons(language: Language) -> Vec<Vec<Button>> {
    vec![vec![
        button("btn-admin-back", CallbackAction::Admin(AdminAction::Back), language),
        button("btn-admin-exit", CallbackAction::Admin(AdminAction::Exit), language),
    ]]
}

pub fn sex_label(sex: Sex, language: Language) -> String {
    t_lang(sex.label_key(), language)
}

pub fn residence_label(status: ResidenceStatus, language: Language) -> String {
    t_lang(status.label_key(), language)
}

pub fn kind_label(kind: SubmissionKind, language: Language) -> String {
    let key = match kind {
        SubmissionKind::Complaint => "kind-complaint",
        SubmissionKind::Suggestion => "kind-suggestion",
        SubmissionKind::Feedback => "kind-feedback",
    };
    t_lang(key, language)
}

/// "label: value" lines for every populated profile field
pub fn format_profile_fields(record: &SubmissionRecord, language: Language) -> String {
    let fields = [
        ("label-name", record.name.clone()),
        ("label-sex", record.sex.map(|s| sex_label(s, language))),
        ("label-phone", record.phone.clone()),
        ("label-residence", record.residence_status.map(|r| residence_label(r, language))),
        ("label-governorate", record.governorate.clone()),
        ("label-directorate", record.directorate.clone()),
        ("label-village", record.village.clone()),
    ];

    fields
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| format!("• {}: {}", t_lang(key, language), v)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Review screen shown in CONFIRM_SUBMISSION
pub fn format_submission_summary(record: &SubmissionRecord, language: Language, preview_length: usize) -> String {
    let mut summary = format!("{}\n\n", t_lang("summary-title", language));

    let profile = format_profile_fields(record, language);
    if !profile.is_empty() {
        summary.push_str(&profile);
        summary.push('\n');
    }

    if let Some(text) = &record.original_text {
        summary.push_str(&format!(
            "• {}: {}\n",
            t_lang("label-text", language),
            truncate_preview(text, preview_length)
        ));
    }
    if let Some(derived) = &record.derived_summary {
        summary.push_str(&format!(
            "• {}: {}\n",
            t_lang("label-summary", language),
            truncate_preview(derived, preview_length)
        ));
    }

    summary.push('\n');
    summary.push_str(&t_lang("confirm-question", language));
    summary
}

pub fn format_existing_profile(record: &SubmissionRecord, language: Language) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        t_lang("existing-profile-intro", language),
        format_profile_fields(record, language),
        t_lang("existing-profile-question", language)
    )
}

pub fn format_statistics(stats: &SubmissionStats, generated_at: DateTime<Utc>, language: Language) -> String {
    let total = stats.total.to_string();
    let critical = stats.critical.to_string();
    let complaints = stats.complaints.to_string();
    let suggestions = stats.suggestions.to_string();
    let feedback = stats.feedback.to_string();
    let pending = stats.pending.to_string();
    let generated = generated_at.format("%Y-%m-%d %H:%M UTC").to_string();
    t_args_lang(
        "admin-stats",
        &[
            ("total", &total),
            ("critical", &critical),
            ("complaints", &complaints),
            ("suggestions", &suggestions),
            ("feedback", &feedback),
            ("pending", &pending),
            ("generated", &generated),
        ],
        language,
    )
}

pub fn format_export(rows: &[SubmissionOverview], language: Language) -> String {
    if rows.is_empty() {
        return t_lang("admin-export-empty", language);
    }

    let count = rows.len().to_string();
    let mut result = t_args_lang("admin-export-header", &[("count", &count)], language);
    for row in rows {
        let critical = if row.is_critical {
            format!(" {}", t_lang("critical-flag", language))
        } else {
            String::new()
        };
        result.push_str(&format!(
            "\n\n{} · {} · {}{}\n{}\n{}",
            row.reference,
            kind_label(row.kind, language),
            row.status,
            critical,
            row.submitted_at.format("%Y-%m-%d %H:%M"),
            row.snippet
        ));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_governorate_keyboard_layout() {
        let rows = governorate_buttons(Language::English);
        // 13 governorates in pairs plus the "Other" row
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0][0].label, "Sana'a");
        assert_eq!(rows[0][0].action, CallbackAction::Governorate(0));
        assert_eq!(rows.last().unwrap()[0].action, CallbackAction::GovernorateOther);
    }

    #[test]
    fn test_summary_lists_only_populated_fields() {
        let mut record = SubmissionRecord::new(1, SubmissionKind::Complaint, Utc::now());
        record.name = Some("Ahmed Ali".to_string());
        record.original_text = Some("x".repeat(50));
        let summary = format_submission_summary(&record, Language::English, 10);
        assert!(summary.contains("Name: Ahmed Ali"));
        assert!(!summary.contains("Phone:"));
        assert!(summary.contains(&format!("{}…", "x".repeat(10))));
    }

    #[test]
    fn test_inline_keyboard_encodes_actions() {
        let keyboard = to_inline_keyboard(&confirm_buttons(Language::English));
        assert_eq!(keyboard.inline_keyboard.len(), 1);
        assert_eq!(keyboard.inline_keyboard[0].len(), 2);
    }

    #[test]
    fn test_export_marks_critical_rows() {
        let rows = vec![SubmissionOverview {
            id: 3,
            reference: "CMP-000003".to_string(),
            kind: SubmissionKind::Complaint,
            is_critical: true,
            status: "PENDING".to_string(),
            submitted_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            snippet: "no water".to_string(),
        }];
        let text = format_export(&rows, Language::English);
        assert!(text.contains("CMP-000003 · Complaint · PENDING 🚨 critical"));
        assert!(text.contains("2026-01-02 03:04"));
    }
}
