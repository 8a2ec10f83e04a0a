//! Complaint text capture, the critical branch, the review gate, the
//! suggestion/feedback flow, and the terminal steps that hand a record to
//! the submission sink.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::dialogue_manager::{ConversationEngine, Input, Turn};
use super::events::Reply;
use crate::dialogue::{is_arabic_text, truncate_preview, validate_free_text, CallbackAction, FlowState, SubmissionKind, SubmissionRecord};
use crate::localization::{t_args_lang, t_lang};

impl ConversationEngine {
    /// Store the complaint text and settle criticality, once per record
    pub(super) async fn capture_complaint_text(
        &self,
        record: &mut SubmissionRecord,
        text: String,
        timestamp: DateTime<Utc>,
        critical_hint: Option<bool>,
    ) {
        record.capture_text(text.clone(), timestamp);

        if !record.criticality_decided() {
            let critical = match critical_hint {
                Some(critical) => critical,
                None => self.services.classifier.is_critical(&text).await,
            };
            record.decide_criticality(critical);
            if critical {
                info!(user_id = record.user_id, "Complaint flagged as critical");
            }
        }

        if !record.is_critical() && record.derived_summary.is_none() && is_arabic_text(&text) {
            record.derived_summary = self.services.classifier.summarize(&text).await;
        }
    }

    pub(super) async fn handle_complaint_text(&self, turn: &Turn<'_>, mut record: SubmissionRecord, input: Input) -> Result<Reply> {
        let state = FlowState::CollectingComplaintText;
        let Input::Text(text) = input else {
            return Ok(self.reprompt(turn, state, &record, None));
        };

        let validation = &self.settings.validation;
        match validate_free_text(&text, validation.min_complaint_length, validation.max_input_length) {
            Ok(text) => {
                self.capture_complaint_text(&mut record, text, turn.event.timestamp, None).await;
                let next = if record.is_critical() {
                    FlowState::CriticalCollectingName
                } else {
                    FlowState::ConfirmSubmission
                };
                Ok(self.enter_state(turn, next, record, None).await)
            }
            Err(key) => {
                debug!(user_id = turn.user_id(), reason = key, "Complaint text rejected");
                Ok(self.reprompt(turn, state, &record, Some(key)))
            }
        }
    }

    /// CONFIRM_SUBMISSION: submit, or wipe profile fields and collect them again
    pub(super) async fn handle_confirmation(&self, turn: &Turn<'_>, mut record: SubmissionRecord, input: Input) -> Result<Reply> {
        match input {
            Input::Choice(CallbackAction::ConfirmSubmission) => self.finalize_submission(turn, record).await,
            Input::Choice(CallbackAction::RestartSubmission) => {
                info!(user_id = turn.user_id(), "Submission details restarted from review");
                record.reset_for_restart();
                let notice = t_lang("restart-notice", turn.language);
                Ok(self.enter_state(turn, FlowState::CollectingName, record, Some(notice)).await)
            }
            _ => Ok(self.reprompt(turn, FlowState::ConfirmSubmission, &record, None)),
        }
    }

    pub(super) async fn handle_suggestion_text(&self, turn: &Turn<'_>, mut record: SubmissionRecord, input: Input) -> Result<Reply> {
        let state = FlowState::CollectingSuggestionText;
        let Input::Text(text) = input else {
            return Ok(self.reprompt(turn, state, &record, None));
        };

        let validation = &self.settings.validation;
        match validate_free_text(&text, validation.min_suggestion_length, validation.max_input_length) {
            Ok(text) => {
                record.capture_text(text, turn.event.timestamp);
                self.finalize_submission(turn, record).await
            }
            Err(key) => Ok(self.reprompt(turn, state, &record, Some(key))),
        }
    }

    /// Terminal step. The conversation ends before the sink is called, so a
    /// failed write can only be retried by starting over.
    pub(super) async fn finalize_submission(&self, turn: &Turn<'_>, mut record: SubmissionRecord) -> Result<Reply> {
        if !self.finish(turn).await {
            return Ok(Reply::none());
        }

        let language = turn.language;
        let critical = record.is_critical();

        if record.kind == SubmissionKind::Complaint {
            if record.classification.is_none() {
                if let Some(text) = record.original_text.clone() {
                    record.classification = Some(self.services.classifier.categorize(&text).await);
                }
            }
            if let Some(profile) = record.to_profile() {
                if let Err(e) = self.services.profiles.save_profile(&profile).await {
                    warn!(user_id = record.user_id, error = %e, "Failed to save profile, submitting anyway");
                }
            }
        }

        match self.services.sink.log_submission(&record).await {
            Ok(reference) => {
                info!(
                    user_id = record.user_id,
                    kind = record.kind.as_str(),
                    reference = %reference,
                    critical = critical,
                    "Submission logged"
                );
                if critical {
                    self.notify_critical(&reference, &record).await;
                }
                let key = match (record.kind, critical) {
                    (SubmissionKind::Complaint, true) => "critical-submitted",
                    (SubmissionKind::Complaint, false) => "complaint-submitted",
                    (SubmissionKind::Suggestion, _) => "suggestion-submitted",
                    (SubmissionKind::Feedback, _) => "feedback-submitted",
                };
                Ok(Reply::text(t_args_lang(key, &[("reference", &reference)], language)))
            }
            Err(e) => {
                error!(
                    user_id = record.user_id,
                    kind = record.kind.as_str(),
                    critical = critical,
                    error = %e,
                    "Failed to log submission"
                );
                let text = match (record.kind, critical) {
                    (SubmissionKind::Complaint, true) => t_args_lang(
                        "critical-submission-failed",
                        &[("phone", &self.settings.institution.phone)],
                        language,
                    ),
                    (SubmissionKind::Complaint, false) => t_lang("complaint-submission-failed", language),
                    _ => t_lang("submission-failed", language),
                };
                Ok(Reply::text(text))
            }
        }
    }

    /// Alert staff; bounded by the notify timeout and never fails the turn
    async fn notify_critical(&self, reference: &str, record: &SubmissionRecord) {
        let notification = self.services.notifier.notify_critical(reference, record);
        match tokio::time::timeout(self.settings.notify_timeout, notification).await {
            Ok(Ok(())) => info!(reference = reference, "Critical case notification sent"),
            Ok(Err(e)) => warn!(reference = reference, error = %e, "Critical case notification failed"),
            Err(_) => warn!(reference = reference, "Critical case notification timed out"),
        }
    }

    /// Terminal: note a reminder against the latest complaint
    pub(super) async fn send_reminder(&self, turn: &Turn<'_>) -> Result<Reply> {
        if !self.finish(turn).await {
            return Ok(Reply::none());
        }

        let language = turn.language;
        let user_id = turn.user_id();
        let latest = match self.services.sink.previous_submissions(user_id).await {
            Ok(previous) => previous.into_iter().next(),
            Err(e) => {
                error!(user_id = user_id, error = %e, "Could not load complaints for reminder");
                None
            }
        };

        let Some(latest) = latest else {
            return Ok(Reply::text(t_lang("reminder-failed", language)));
        };

        match self.services.sink.log_reminder(user_id, latest.id).await {
            Ok(()) => {
                info!(
                    user_id = user_id,
                    reference = %latest.reference,
                    snippet = %truncate_preview(&latest.snippet, 40),
                    "Reminder logged"
                );
                Ok(Reply::text(t_args_lang("reminder-logged", &[("reference", &latest.reference)], language)))
            }
            Err(e) => {
                error!(user_id = user_id, reference = %latest.reference, error = %e, "Failed to log reminder");
                Ok(Reply::text(t_lang("reminder-failed", language)))
            }
        }
    }
}
