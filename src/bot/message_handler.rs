//! Telegram message adapter: turns updates into engine events and sends replies.

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{UpdateId, UpdateKind};
use tracing::debug;

use super::commands::{is_cancel_command, parse_command};
use super::dialogue_manager::ConversationEngine;
use super::events::{EventKind, InboundEvent, Reply};
use super::ui_builder::to_inline_keyboard;
use crate::dialogue::truncate_preview;
use crate::localization::detect_language;

// Telegram rejects messages above 4096 characters
const MAX_MESSAGE_CHARS: usize = 4000;

/// Dispatcher key: updates for one chat run in order, `/cancel` gets its own lane
/// so it is never stuck behind a slow turn of the same user
pub fn distribution_key(update: &Update) -> Option<(ChatId, bool)> {
    let chat_id = update.chat()?.id;
    let is_cancel = match &update.kind {
        UpdateKind::Message(msg) => msg.text().is_some_and(is_cancel_command),
        _ => false,
    };
    Some((chat_id, is_cancel))
}

/// Build the engine event for a message; `None` for messages without a sender
pub fn event_from_message(msg: &Message, sequence: u64, bot_username: &str) -> Option<InboundEvent> {
    let user = msg.from.as_ref()?;
    let kind = match msg.text() {
        Some(text) => match parse_command(text, bot_username) {
            Some(command) => EventKind::Command(command),
            None => EventKind::Text(text.to_string()),
        },
        None => EventKind::Unsupported,
    };

    Some(InboundEvent {
        sequence,
        user_id: user.id.0 as i64,
        display_name: user.first_name.clone(),
        language: detect_language(user.language_code.as_deref()),
        timestamp: msg.date,
        kind,
    })
}

pub async fn send_reply(bot: &Bot, chat_id: ChatId, reply: Reply) -> Result<()> {
    for message in reply.messages {
        let text = truncate_preview(&message.text, MAX_MESSAGE_CHARS);
        if message.buttons.is_empty() {
            bot.send_message(chat_id, text).await?;
        } else {
            bot.send_message(chat_id, text)
                .reply_markup(to_inline_keyboard(&message.buttons))
                .await?;
        }
    }
    Ok(())
}

/// Main message handler
pub async fn message_handler(
    bot: Bot,
    update_id: UpdateId,
    msg: Message,
    engine: Arc<ConversationEngine>,
    bot_username: Arc<str>,
) -> Result<()> {
    if !msg.chat.is_private() {
        debug!(chat_id = %msg.chat.id, "Ignoring message outside a private chat");
        return Ok(());
    }

    let Some(event) = event_from_message(&msg, u64::from(update_id.0), &bot_username) else {
        debug!(chat_id = %msg.chat.id, "Ignoring message without sender");
        return Ok(());
    };

    debug!(user_id = event.user_id, kind = ?event.kind, "Received message from user");
    let reply = engine.handle(event).await;
    send_reply(&bot, msg.chat.id, reply).await
}
