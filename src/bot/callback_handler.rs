//! Callback query handler for inline keyboard buttons

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::UpdateId;
use tracing::{debug, warn};

use super::dialogue_manager::ConversationEngine;
use super::events::{EventKind, InboundEvent};
use super::message_handler::send_reply;
use crate::localization::detect_language;

/// Handle callback queries from inline keyboards
pub async fn callback_handler(bot: Bot, update_id: UpdateId, q: CallbackQuery, engine: Arc<ConversationEngine>) -> Result<()> {
    // Stop the loading spinner first; the turn itself may take a while.
    // Telegram refuses answers to queries older than ~15 seconds, the press still counts.
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!(user_id = %q.from.id, error = %e, "Could not answer callback query");
    }

    let Some(data) = q.data.clone() else {
        return Ok(());
    };

    let chat_id = q
        .message
        .as_ref()
        .map(|m| m.chat().id)
        .unwrap_or(ChatId(q.from.id.0 as i64));

    // Drop the keyboard so the same choice cannot be pressed twice
    if let Some(message) = &q.message {
        if let Err(e) = bot.edit_message_reply_markup(message.chat().id, message.id()).await {
            debug!(chat_id = %chat_id, error = %e, "Could not remove inline keyboard");
        }
    }

    debug!(user_id = %q.from.id, data = %data, "Received callback query");
    let event = InboundEvent {
        sequence: u64::from(update_id.0),
        user_id: q.from.id.0 as i64,
        display_name: q.from.first_name.clone(),
        language: detect_language(q.from.language_code.as_deref()),
        timestamp: Utc::now(),
        kind: EventKind::Button(data),
    };

    let reply = engine.handle(event).await;
    send_reply(&bot, chat_id, reply).await
}
