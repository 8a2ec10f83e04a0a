//! Profile gate and the linear field-collection chain.

use anyhow::Result;
use tracing::{debug, info, warn};

use super::dialogue_manager::{ConversationEngine, Input, Turn};
use super::events::{OutgoingMessage, Reply};
use super::ui_builder::new_or_reminder_buttons;
use crate::dialogue::{
    governorate_label, validate_location, validate_name, validate_phone, CallbackAction, FlowState, ResidenceStatus, Sex,
    SubmissionRecord,
};
use crate::localization::{all_translations, t_args_lang, t_lang, Language};

/// Where a record goes once identity and location are settled
pub fn after_profile_state(record: &SubmissionRecord) -> FlowState {
    match (&record.original_text, record.is_critical()) {
        (None, _) => FlowState::CollectingComplaintText,
        (Some(_), true) => FlowState::CriticalCollectingName,
        (Some(_), false) => FlowState::ConfirmSubmission,
    }
}

/// Typed yes for the profile-reuse question; anything else counts as no
pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    ["yes", "y", "ok"].contains(&answer.as_str())
        || all_translations("answer-yes")
            .iter()
            .any(|label| label.to_lowercase() == answer)
}

impl ConversationEngine {
    /// Reminder gate at the start of every complaint
    pub(super) async fn enter_complaint_flow(&self, turn: &Turn<'_>, record: SubmissionRecord) -> Result<Reply> {
        let previous = match self.services.sink.previous_submissions(turn.user_id()).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(user_id = turn.user_id(), error = %e, "Could not load previous complaints, treating as none");
                Vec::new()
            }
        };

        let Some(latest) = previous.first() else {
            return self.check_existing_profile(turn, record).await;
        };

        let language = turn.language;
        let count = match self.services.sink.complaint_count(turn.user_id()).await {
            Ok(count) => count,
            Err(e) => {
                warn!(user_id = turn.user_id(), error = %e, "Could not count previous complaints");
                previous.len() as i64
            }
        }
        .to_string();
        let date = latest.submitted_at.format("%Y-%m-%d").to_string();
        let text = t_args_lang(
            "ask-new-or-reminder",
            &[("count", &count), ("reference", &latest.reference), ("date", &date)],
            language,
        );
        let reply = OutgoingMessage::with_buttons(text, new_or_reminder_buttons(language)).into();
        Ok(self.commit(turn, FlowState::AskNewOrReminder, record, reply).await)
    }

    pub(super) async fn handle_new_or_reminder(&self, turn: &Turn<'_>, record: SubmissionRecord, input: Input) -> Result<Reply> {
        match input {
            Input::Choice(CallbackAction::NewComplaint) => self.check_existing_profile(turn, record).await,
            Input::Choice(CallbackAction::Reminder) => self.send_reminder(turn).await,
            _ => Ok(self.reprompt(turn, FlowState::AskNewOrReminder, &record, None)),
        }
    }

    /// Offer the stored profile, or start collecting fields
    pub(super) async fn check_existing_profile(&self, turn: &Turn<'_>, mut record: SubmissionRecord) -> Result<Reply> {
        if record.is_critical() {
            return Ok(self.enter_state(turn, FlowState::CriticalCollectingName, record, None).await);
        }

        match self.services.profiles.get_profile(turn.user_id()).await {
            Ok(Some(profile)) if profile.is_reusable() => {
                debug!(user_id = turn.user_id(), "Offering stored profile for reuse");
                record.apply_profile(&profile);
                Ok(self.enter_state(turn, FlowState::ConfirmExistingProfile, record, None).await)
            }
            Ok(_) => Ok(self.enter_state(turn, FlowState::CollectingName, record, None).await),
            Err(e) => {
                warn!(user_id = turn.user_id(), error = %e, "Profile lookup failed, collecting details from scratch");
                Ok(self.enter_state(turn, FlowState::CollectingName, record, None).await)
            }
        }
    }

    pub(super) async fn handle_profile_confirmation(
        &self,
        turn: &Turn<'_>,
        mut record: SubmissionRecord,
        input: Input,
    ) -> Result<Reply> {
        let accepted = match input {
            Input::Choice(CallbackAction::ReuseProfile(accepted)) => accepted,
            Input::Text(answer) => is_affirmative(&answer),
            _ => return Ok(self.reprompt(turn, FlowState::ConfirmExistingProfile, &record, None)),
        };

        if accepted {
            info!(user_id = turn.user_id(), "Stored profile accepted");
            let next = after_profile_state(&record);
            let notice = t_lang("profile-reused", turn.language);
            Ok(self.enter_state(turn, next, record, Some(notice)).await)
        } else {
            record.clear_profile_fields();
            Ok(self.enter_state(turn, FlowState::CollectingName, record, None).await)
        }
    }

    /// One step of COLLECTING_NAME through COLLECTING_VILLAGE
    pub(super) async fn collect_profile_field(
        &self,
        turn: &Turn<'_>,
        state: FlowState,
        mut record: SubmissionRecord,
        input: Input,
    ) -> Result<Reply> {
        let validation = &self.settings.validation;
        let max = validation.max_input_length;

        let outcome: Result<(), &'static str> = match (state, input) {
            (FlowState::CollectingName, Input::Text(text)) => {
                validate_name(&text, validation.min_name_words, max).map(|name| record.name = Some(name))
            }
            (FlowState::CollectingSex, Input::Choice(CallbackAction::Sex(sex))) => {
                record.sex = Some(sex);
                Ok(())
            }
            (FlowState::CollectingSex, Input::Text(text)) => Sex::parse_answer(&text)
                .map(|sex| record.sex = Some(sex))
                .ok_or("validation-sex"),
            (FlowState::CollectingPhone, Input::Text(text)) => {
                validate_phone(&text, validation.min_phone_digits).map(|phone| record.phone = Some(phone))
            }
            (FlowState::CollectingResidence, Input::Choice(CallbackAction::Residence(status))) => {
                record.residence_status = Some(status);
                Ok(())
            }
            (FlowState::CollectingResidence, Input::Text(text)) => ResidenceStatus::parse_answer(&text)
                .map(|status| record.residence_status = Some(status))
                .ok_or("validation-residence"),
            (FlowState::CollectingGovernorate, Input::Choice(CallbackAction::Governorate(index))) => {
                // Stored under the English name whatever the user's language
                governorate_label(index, Language::English)
                    .map(|name| record.governorate = Some(name.to_string()))
                    .ok_or("validation-location")
            }
            (FlowState::CollectingGovernorate, Input::Choice(CallbackAction::GovernorateOther)) => {
                return Ok(Reply::text(t_lang("prompt-governorate-other", turn.language)));
            }
            (FlowState::CollectingGovernorate, Input::Text(text)) => {
                validate_location(&text, max).map(|value| record.governorate = Some(value))
            }
            (FlowState::CollectingDirectorate, Input::Text(text)) => {
                validate_location(&text, max).map(|value| record.directorate = Some(value))
            }
            (FlowState::CollectingVillage, Input::Text(text)) => {
                validate_location(&text, max).map(|value| record.village = Some(value))
            }
            _ => return Ok(self.reprompt(turn, state, &record, None)),
        };

        match outcome {
            Ok(()) => {
                let next = state
                    .next_profile_field()
                    .unwrap_or_else(|| after_profile_state(&record));
                Ok(self.enter_state(turn, next, record, None).await)
            }
            Err(key) => {
                debug!(user_id = turn.user_id(), state = state.name(), reason = key, "Field validation failed");
                Ok(self.reprompt(turn, state, &record, Some(key)))
            }
        }
    }

    /// CRITICAL_COLLECTING_NAME and CRITICAL_COLLECTING_PHONE
    pub(super) async fn collect_critical_field(
        &self,
        turn: &Turn<'_>,
        state: FlowState,
        mut record: SubmissionRecord,
        input: Input,
    ) -> Result<Reply> {
        let Input::Text(text) = input else {
            return Ok(self.reprompt(turn, state, &record, None));
        };
        let validation = &self.settings.validation;

        match state {
            FlowState::CriticalCollectingName => {
                match validate_name(&text, validation.min_name_words, validation.max_input_length) {
                    Ok(name) => {
                        record.name = Some(name);
                        Ok(self.enter_state(turn, FlowState::CriticalCollectingPhone, record, None).await)
                    }
                    Err(key) => Ok(self.reprompt(turn, state, &record, Some(key))),
                }
            }
            FlowState::CriticalCollectingPhone => match validate_phone(&text, validation.min_phone_digits) {
                Ok(phone) => {
                    record.phone = Some(phone);
                    self.finalize_submission(turn, record).await
                }
                Err(key) => Ok(self.reprompt(turn, state, &record, Some(key))),
            },
            _ => Ok(self.reprompt(turn, state, &record, None)),
        }
    }
}
