//! Critical-case alerts delivered to staff chats over Telegram.

use anyhow::{bail, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{debug, warn};

use crate::dialogue::{truncate_preview, SubmissionRecord};
use crate::localization::{t_args_lang, Language};
use crate::services::CriticalNotifier;

const ALERT_TEXT_PREVIEW: usize = 500;

pub struct TelegramNotifier {
    bot: Bot,
    chats: Vec<ChatId>,
    language: Language,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat_ids: &[i64], language: Language) -> Self {
        Self {
            bot,
            chats: chat_ids.iter().copied().map(ChatId).collect(),
            language,
        }
    }
}

pub fn format_critical_alert(reference: &str, record: &SubmissionRecord, language: Language) -> String {
    let location = [&record.governorate, &record.directorate, &record.village]
        .into_iter()
        .flatten()
        .cloned()
        .collect::<Vec<_>>()
        .join(" / ");
    let text = record
        .original_text
        .as_deref()
        .map(|t| truncate_preview(t, ALERT_TEXT_PREVIEW))
        .unwrap_or_default();

    t_args_lang(
        "critical-alert",
        &[
            ("reference", reference),
            ("name", record.name.as_deref().unwrap_or("-")),
            ("phone", record.phone.as_deref().unwrap_or("-")),
            ("location", if location.is_empty() { "-" } else { location.as_str() }),
            ("text", &text),
        ],
        language,
    )
}

#[async_trait]
impl CriticalNotifier for TelegramNotifier {
    async fn notify_critical(&self, reference: &str, record: &SubmissionRecord) -> Result<()> {
        if self.chats.is_empty() {
            warn!(reference = reference, "No alert chats configured, critical case not forwarded");
            return Ok(());
        }

        let text = format_critical_alert(reference, record, self.language);
        let mut delivered = 0usize;
        for chat_id in &self.chats {
            match self.bot.send_message(*chat_id, text.clone()).await {
                Ok(_) => {
                    delivered += 1;
                    debug!(chat_id = %chat_id, reference = reference, "Critical alert delivered");
                }
                Err(e) => warn!(chat_id = %chat_id, reference = reference, error = %e, "Failed to deliver critical alert"),
            }
        }

        if delivered == 0 {
            bail!("critical alert {reference} reached none of {} chats", self.chats.len());
        }
        Ok(())
    }
}
