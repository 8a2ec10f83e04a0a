//! Admin menu: statistics and recent submissions for authorized users.
//! Authorization is re-checked on every admin turn, not only at /admin.

use anyhow::Result;
use tracing::{error, info, warn};

use super::dialogue_manager::{ConversationEngine, Input, Turn};
use super::events::{OutgoingMessage, Reply};
use super::ui_builder::{admin_menu_buttons, admin_view_buttons, format_export, format_statistics};
use crate::dialogue::{AdminAction, AdminState, CallbackAction, Conversation};
use crate::localization::{t_lang, Language};
use crate::session_store::Session;

impl ConversationEngine {
    fn ensure_admin(&self, turn: &Turn<'_>) -> bool {
        let allowed = self.settings.is_admin(turn.user_id());
        if !allowed {
            warn!(user_id = turn.user_id(), "Unauthorized admin access attempt");
        }
        allowed
    }

    pub(super) async fn open_admin_menu(&self, turn: &Turn<'_>) -> Result<Reply> {
        if !self.ensure_admin(turn) {
            return Ok(Reply::text(t_lang("admin-unauthorized", turn.language)));
        }
        info!(user_id = turn.user_id(), "Admin menu opened");
        let reply = self.admin_prompt(AdminState::Menu, turn.language);
        Ok(self.commit_admin(turn, AdminState::Menu, reply).await)
    }

    pub(super) async fn dispatch_admin(&self, turn: &Turn<'_>, state: AdminState, input: Input) -> Result<Reply> {
        let language = turn.language;
        if !self.ensure_admin(turn) {
            self.store.clear(turn.user_id()).await;
            return Ok(Reply::text(t_lang("admin-unauthorized", language)));
        }

        match input {
            Input::Choice(CallbackAction::Admin(AdminAction::Stats)) => match self.services.sink.statistics().await {
                Ok(stats) => {
                    let text = format_statistics(&stats, turn.event.timestamp, language);
                    let reply = OutgoingMessage::with_buttons(text, admin_view_buttons(language)).into();
                    Ok(self.commit_admin(turn, AdminState::ViewingStats, reply).await)
                }
                Err(e) => {
                    error!(user_id = turn.user_id(), error = %e, "Failed to load statistics");
                    Ok(self.admin_prompt(state, language).with_notice(&t_lang("admin-stats-failed", language)))
                }
            },
            Input::Choice(CallbackAction::Admin(AdminAction::Export)) => {
                match self.services.sink.export_recent(self.settings.export_limit).await {
                    Ok(rows) => {
                        let text = format_export(&rows, language);
                        let reply = OutgoingMessage::with_buttons(text, admin_view_buttons(language)).into();
                        Ok(self.commit_admin(turn, AdminState::ViewingExport, reply).await)
                    }
                    Err(e) => {
                        error!(user_id = turn.user_id(), error = %e, "Failed to export submissions");
                        Ok(self.admin_prompt(state, language).with_notice(&t_lang("admin-export-failed", language)))
                    }
                }
            }
            Input::Choice(CallbackAction::Admin(AdminAction::Back)) => {
                let reply = self.admin_prompt(AdminState::Menu, language);
                Ok(self.commit_admin(turn, AdminState::Menu, reply).await)
            }
            Input::Choice(CallbackAction::Admin(AdminAction::Exit)) => {
                if !self.finish(turn).await {
                    return Ok(Reply::none());
                }
                info!(user_id = turn.user_id(), "Admin menu closed");
                Ok(Reply::text(t_lang("admin-exit", language)))
            }
            _ => Ok(self.admin_prompt(state, language)),
        }
    }

    pub(super) fn admin_prompt(&self, state: AdminState, language: Language) -> Reply {
        match state {
            AdminState::Menu => {
                OutgoingMessage::with_buttons(t_lang("admin-menu", language), admin_menu_buttons(language)).into()
            }
            AdminState::ViewingStats | AdminState::ViewingExport => {
                OutgoingMessage::with_buttons(t_lang("admin-choose-option", language), admin_view_buttons(language)).into()
            }
        }
    }

    async fn commit_admin(&self, turn: &Turn<'_>, state: AdminState, reply: Reply) -> Reply {
        let session = Session {
            user_id: turn.user_id(),
            language: turn.language,
            conversation: Conversation::Admin { state },
        };
        if self.store.compare_and_set(turn.user_id(), turn.generation, Some(session)).await {
            reply
        } else {
            turn.mark_stale();
            Reply::none()
        }
    }
}
