//! Conversation engine: entry-point arbitration and the state dispatch table.
//!
//! Every inbound event goes through [`ConversationEngine::handle`], which
//! never fails. A turn reads a snapshot of the user's slot, runs the handler
//! for the current state, and writes the outcome back with a compare-and-set
//! on the snapshot's generation. A turn whose write is refused because a
//! `/cancel` with a lower update sequence landed meanwhile is run again
//! against the fresh state; one refused because of a later cancel is
//! dropped. The per-state handlers live in `field_collection`,
//! `submission_flow` and `admin_menu`.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::commands::Command;
use super::events::{EventKind, InboundEvent, OutgoingMessage, Reply};
use super::ui_builder::{
    confirm_buttons, format_existing_profile, format_submission_summary, governorate_buttons,
    initial_action_buttons, new_or_reminder_buttons, profile_reuse_buttons, residence_buttons, sex_buttons,
};
use crate::config::EngineSettings;
use crate::dialogue::{validate_free_text, CallbackAction, Conversation, FlowState, InputKind, SubmissionKind, SubmissionRecord};
use crate::localization::{t_args_lang, t_lang, Language};
use crate::services::{CriticalNotifier, IntentClassifier, IntentSignal, ProfileStore, SubmissionSink};
use crate::session_store::{ConversationStore, Session};

/// External collaborators the engine depends on
#[derive(Clone)]
pub struct Services {
    pub classifier: Arc<dyn IntentClassifier>,
    pub profiles: Arc<dyn ProfileStore>,
    pub sink: Arc<dyn SubmissionSink>,
    pub notifier: Arc<dyn CriticalNotifier>,
}

pub struct ConversationEngine {
    pub(super) store: ConversationStore,
    pub(super) services: Services,
    pub(super) settings: EngineSettings,
}

// Bounds how often one event is re-run after losing a race with /cancel
const MAX_REPLAYS: usize = 2;

/// Context of the event being handled
pub(super) struct Turn<'a> {
    pub event: &'a InboundEvent,
    /// Slot generation observed when the turn started
    pub generation: u64,
    pub language: Language,
    /// Set when the slot moved on under this turn
    stale: AtomicBool,
}

impl Turn<'_> {
    pub fn user_id(&self) -> i64 {
        self.event.user_id
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Relaxed);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }
}

/// A non-command event after payload parsing
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Input {
    Text(String),
    Choice(CallbackAction),
    /// A button whose payload no longer parses
    UnknownButton,
    Unsupported,
}

/// Complaint text already known when the flow starts
pub(super) struct SeedText {
    pub text: String,
    pub critical: Option<bool>,
}

impl ConversationEngine {
    pub fn new(services: Services, settings: EngineSettings) -> Self {
        Self {
            store: ConversationStore::new(),
            services,
            settings,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Handle one inbound event. Errors are logged, the user is reset to idle
    /// and a generic apology is returned.
    pub async fn handle(&self, event: InboundEvent) -> Reply {
        let mut replays = 0;
        loop {
            let snapshot = self.store.snapshot(event.user_id).await;
            let state = snapshot
                .session
                .as_ref()
                .map(|s| s.conversation.state_name())
                .unwrap_or("IDLE");
            let language = snapshot.session.as_ref().map_or(event.language, |s| s.language);
            let turn = Turn {
                event: &event,
                generation: snapshot.generation,
                language,
                stale: AtomicBool::new(false),
            };

            let outcome = self.route(&turn, snapshot.session).await;

            // Stale turns never reached a sink write, so running them again is safe
            if turn.is_stale() && replays < MAX_REPLAYS && self.store.last_cancel(event.user_id).await < event.sequence {
                replays += 1;
                debug!(
                    user_id = event.user_id,
                    sequence = event.sequence,
                    state = state,
                    "An earlier cancel landed mid-turn, replaying event"
                );
                continue;
            }

            return match outcome {
                Ok(reply) => reply,
                Err(e) => {
                    error!(user_id = event.user_id, state = state, error = %e, "Conversation handler failed, resetting user");
                    self.store.clear(event.user_id).await;
                    Reply::text(t_lang("error-generic", language))
                }
            };
        }
    }

    async fn route(&self, turn: &Turn<'_>, session: Option<Session>) -> Result<Reply> {
        let input = match &turn.event.kind {
            EventKind::Command(command) => return self.handle_command(turn, *command, session).await,
            EventKind::Text(text) => Input::Text(text.trim().to_string()),
            EventKind::Button(data) => CallbackAction::parse(data).map_or(Input::UnknownButton, Input::Choice),
            EventKind::Unsupported => Input::Unsupported,
        };

        match session {
            None => self.handle_idle(turn, input).await,
            Some(session) => match session.conversation {
                Conversation::Submission { state, record } => self.dispatch_flow(turn, state, record, input).await,
                Conversation::Admin { state } => self.dispatch_admin(turn, state, input).await,
            },
        }
    }

    async fn handle_command(&self, turn: &Turn<'_>, command: Command, session: Option<Session>) -> Result<Reply> {
        let user_id = turn.user_id();
        let language = turn.language;
        debug!(user_id = user_id, command = ?command, "Received command");

        match command {
            Command::Cancel => {
                let had_session = self.store.cancel(user_id, turn.event.sequence).await;
                info!(user_id = user_id, had_session = had_session, "Conversation cancelled");
                Ok(Reply::text(t_lang("cancelled", language)))
            }
            Command::Start => {
                self.store.clear(user_id).await;
                let welcome = t_args_lang(
                    "welcome",
                    &[
                        ("name", turn.event.display_name.as_str()),
                        ("institution", self.settings.institution.name(language)),
                    ],
                    language,
                );
                Ok(OutgoingMessage::with_buttons(welcome, initial_action_buttons(language)).into())
            }
            Command::Help | Command::Contact => {
                let text = if command == Command::Help {
                    t_lang("help-text", language)
                } else {
                    let institution = &self.settings.institution;
                    t_args_lang(
                        "contact-text",
                        &[
                            ("institution", institution.name(language)),
                            ("phone", &institution.phone),
                            ("email", &institution.email),
                        ],
                        language,
                    )
                };
                let mut reply = Reply::text(text);
                let follow_up = match &session {
                    Some(session) => self.current_prompt(session),
                    None => OutgoingMessage::with_buttons(t_lang("choose-action", language), initial_action_buttons(language)).into(),
                };
                reply.messages.extend(follow_up.messages);
                Ok(reply)
            }
            Command::Complaint => self.begin_flow(turn, SubmissionKind::Complaint, None).await,
            Command::Suggestion => self.begin_flow(turn, SubmissionKind::Suggestion, None).await,
            Command::Feedback => self.begin_flow(turn, SubmissionKind::Feedback, None).await,
            Command::Admin => self.open_admin_menu(turn).await,
        }
    }

    async fn handle_idle(&self, turn: &Turn<'_>, input: Input) -> Result<Reply> {
        let language = turn.language;
        match input {
            Input::Choice(CallbackAction::StartFlow(kind)) => self.begin_flow(turn, kind, None).await,
            Input::Choice(_) | Input::UnknownButton => {
                debug!(user_id = turn.user_id(), "Button pressed without an active conversation");
                Ok(OutgoingMessage::with_buttons(t_lang("error-session-expired", language), initial_action_buttons(language)).into())
            }
            Input::Text(text) => self.handle_free_text(turn, &text).await,
            Input::Unsupported => {
                let text = format!("{}\n\n{}", t_lang("unsupported-message", language), t_lang("choose-action", language));
                Ok(OutgoingMessage::with_buttons(text, initial_action_buttons(language)).into())
            }
        }
    }

    /// Free text from an idle user: let the classifier pick the branch
    async fn handle_free_text(&self, turn: &Turn<'_>, text: &str) -> Result<Reply> {
        let language = turn.language;
        let analysis = self
            .services
            .classifier
            .classify(text, &turn.event.display_name, language)
            .await;

        if !self.store.is_current(turn.user_id(), turn.generation).await {
            debug!(user_id = turn.user_id(), "Conversation changed during classification, dropping result");
            turn.mark_stale();
            return Ok(Reply::none());
        }

        let llm_reply = Some(analysis.reply_text.clone()).filter(|r| !r.trim().is_empty());
        info!(user_id = turn.user_id(), signal = ?analysis.signal, "Routed free text");

        match analysis.signal {
            IntentSignal::Complaint => {
                let validation = &self.settings.validation;
                let seed = validate_free_text(text, validation.min_complaint_length, validation.max_input_length)
                    .ok()
                    .map(|text| SeedText {
                        text,
                        critical: analysis.critical,
                    });
                let reply = self.begin_flow(turn, SubmissionKind::Complaint, seed).await?;
                Ok(prefix_reply(llm_reply, reply))
            }
            IntentSignal::Suggestion => {
                let reply = self.begin_flow(turn, SubmissionKind::Suggestion, None).await?;
                Ok(prefix_reply(llm_reply, reply))
            }
            IntentSignal::GeneralInquiry => {
                let text = llm_reply.unwrap_or_else(|| t_lang("choose-action", language));
                Ok(OutgoingMessage::with_buttons(text, initial_action_buttons(language)).into())
            }
            IntentSignal::Irrelevant => Ok(Reply::text(llm_reply.unwrap_or_else(|| t_lang("choose-action", language)))),
        }
    }

    /// Create a fresh record, replacing whatever conversation the user had
    pub(super) async fn begin_flow(&self, turn: &Turn<'_>, kind: SubmissionKind, seed: Option<SeedText>) -> Result<Reply> {
        info!(user_id = turn.user_id(), kind = kind.as_str(), "Starting submission flow");
        let mut record = SubmissionRecord::new(turn.user_id(), kind, turn.event.timestamp);

        match kind {
            SubmissionKind::Complaint => {
                if let Some(seed) = seed {
                    self.capture_complaint_text(&mut record, seed.text, turn.event.timestamp, seed.critical)
                        .await;
                }
                self.enter_complaint_flow(turn, record).await
            }
            SubmissionKind::Suggestion | SubmissionKind::Feedback => {
                Ok(self.enter_state(turn, FlowState::CollectingSuggestionText, record, None).await)
            }
        }
    }

    async fn dispatch_flow(&self, turn: &Turn<'_>, state: FlowState, record: SubmissionRecord, input: Input) -> Result<Reply> {
        if input == Input::Unsupported {
            let notice = t_lang("unsupported-message", turn.language);
            return Ok(self.prompt_for(state, &record, turn.language, false).with_notice(&notice));
        }

        let accepted = matches!(
            (state.expected_input(), &input),
            (InputKind::Text, Input::Text(_))
                | (InputKind::Choice, Input::Choice(_))
                | (InputKind::TextOrChoice, Input::Text(_) | Input::Choice(_))
        );
        if !accepted {
            debug!(user_id = turn.user_id(), state = state.name(), "Input kind does not fit the state, re-prompting");
            return Ok(self.reprompt(turn, state, &record, None));
        }

        match state {
            FlowState::AskNewOrReminder => self.handle_new_or_reminder(turn, record, input).await,
            FlowState::ConfirmExistingProfile => self.handle_profile_confirmation(turn, record, input).await,
            FlowState::CollectingName
            | FlowState::CollectingSex
            | FlowState::CollectingPhone
            | FlowState::CollectingResidence
            | FlowState::CollectingGovernorate
            | FlowState::CollectingDirectorate
            | FlowState::CollectingVillage => self.collect_profile_field(turn, state, record, input).await,
            FlowState::CollectingComplaintText => self.handle_complaint_text(turn, record, input).await,
            FlowState::ConfirmSubmission => self.handle_confirmation(turn, record, input).await,
            FlowState::CriticalCollectingName | FlowState::CriticalCollectingPhone => {
                self.collect_critical_field(turn, state, record, input).await
            }
            FlowState::CollectingSuggestionText => self.handle_suggestion_text(turn, record, input).await,
        }
    }

    /// Prompt for the state a session is in, used after /help and /contact
    fn current_prompt(&self, session: &Session) -> Reply {
        match &session.conversation {
            Conversation::Submission { state, record } => self.prompt_for(*state, record, session.language, false),
            Conversation::Admin { state } => self.admin_prompt(*state, session.language),
        }
    }

    /// What the bot says when a user arrives in `state`
    pub(super) fn prompt_for(&self, state: FlowState, record: &SubmissionRecord, language: Language, first_entry: bool) -> Reply {
        let text = |key: &str| OutgoingMessage::text(t_lang(key, language));
        match state {
            FlowState::AskNewOrReminder => {
                OutgoingMessage::with_buttons(t_lang("choose-new-or-reminder", language), new_or_reminder_buttons(language)).into()
            }
            FlowState::ConfirmExistingProfile => {
                OutgoingMessage::with_buttons(format_existing_profile(record, language), profile_reuse_buttons(language)).into()
            }
            FlowState::CollectingName => text("prompt-name").into(),
            FlowState::CollectingSex => OutgoingMessage::with_buttons(t_lang("prompt-sex", language), sex_buttons(language)).into(),
            FlowState::CollectingPhone => text("prompt-phone").into(),
            FlowState::CollectingResidence => {
                let mut reply = Reply::none();
                if first_entry {
                    reply.push(text("residence-explainer"));
                }
                reply.push(OutgoingMessage::with_buttons(t_lang("prompt-residence", language), residence_buttons(language)));
                reply
            }
            FlowState::CollectingGovernorate => {
                OutgoingMessage::with_buttons(t_lang("prompt-governorate", language), governorate_buttons(language)).into()
            }
            FlowState::CollectingDirectorate => text("prompt-directorate").into(),
            FlowState::CollectingVillage => text("prompt-village").into(),
            FlowState::CollectingComplaintText => text("prompt-complaint-text").into(),
            FlowState::ConfirmSubmission => OutgoingMessage::with_buttons(
                format_submission_summary(record, language, self.settings.summary_preview_length),
                confirm_buttons(language),
            )
            .into(),
            FlowState::CriticalCollectingName => text("prompt-critical-name").into(),
            FlowState::CriticalCollectingPhone => text("prompt-critical-phone").into(),
            FlowState::CollectingSuggestionText => match record.kind {
                SubmissionKind::Feedback => text("prompt-feedback").into(),
                _ => text("prompt-suggestion").into(),
            },
        }
    }

    /// Same prompt again, optionally led by a validation message
    pub(super) fn reprompt(&self, turn: &Turn<'_>, state: FlowState, record: &SubmissionRecord, error_key: Option<&str>) -> Reply {
        let reply = self.prompt_for(state, record, turn.language, false);
        match error_key {
            Some(key) => {
                let validation = &self.settings.validation;
                let min = match state {
                    FlowState::CollectingName | FlowState::CriticalCollectingName => validation.min_name_words,
                    FlowState::CollectingPhone | FlowState::CriticalCollectingPhone => validation.min_phone_digits,
                    FlowState::CollectingComplaintText => validation.min_complaint_length,
                    FlowState::CollectingSuggestionText => validation.min_suggestion_length,
                    _ => 0,
                }
                .to_string();
                let max = validation.max_input_length.to_string();
                let message = t_args_lang(key, &[("min", &min), ("max", &max)], turn.language);
                reply.with_notice(&message)
            }
            None => reply,
        }
    }

    /// Move to `state` and emit its prompt; empty reply if the turn went stale
    pub(super) async fn enter_state(&self, turn: &Turn<'_>, state: FlowState, record: SubmissionRecord, notice: Option<String>) -> Reply {
        let mut reply = self.prompt_for(state, &record, turn.language, true);
        if let Some(notice) = notice {
            reply = reply.with_notice(&notice);
        }
        self.commit(turn, state, record, reply).await
    }

    /// Store the new position unless another turn got there first
    pub(super) async fn commit(&self, turn: &Turn<'_>, state: FlowState, record: SubmissionRecord, reply: Reply) -> Reply {
        let session = Session {
            user_id: turn.user_id(),
            language: turn.language,
            conversation: Conversation::Submission { state, record },
        };
        if self.store.compare_and_set(turn.user_id(), turn.generation, Some(session)).await {
            debug!(user_id = turn.user_id(), state = state.name(), "Conversation advanced");
            reply
        } else {
            turn.mark_stale();
            Reply::none()
        }
    }

    /// Terminate the conversation; false if it was cancelled or replaced meanwhile
    pub(super) async fn finish(&self, turn: &Turn<'_>) -> bool {
        let finished = self.store.compare_and_set(turn.user_id(), turn.generation, None).await;
        if !finished {
            turn.mark_stale();
        }
        finished
    }
}

fn prefix_reply(prefix: Option<String>, reply: Reply) -> Reply {
    match prefix {
        Some(text) if !reply.is_empty() => {
            let mut messages = vec![OutgoingMessage::text(text)];
            messages.extend(reply.messages);
            Reply::from(messages)
        }
        _ => reply,
    }
}
