//! Transport-neutral input and output of one conversation turn.

use chrono::{DateTime, Utc};

use super::commands::Command;
use crate::dialogue::CallbackAction;
use crate::localization::Language;

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Command(Command),
    Text(String),
    /// Raw callback payload; parsed by the engine
    Button(String),
    /// Photos, stickers, voice notes and the like
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Telegram update id; grows with arrival order
    pub sequence: u64,
    pub user_id: i64,
    pub display_name: String,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub label: String,
    pub action: CallbackAction,
}

impl Button {
    pub fn new(label: impl Into<String>, action: CallbackAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub text: String,
    /// Inline keyboard rows; empty for a plain message
    pub buttons: Vec<Vec<Button>>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(text: impl Into<String>, buttons: Vec<Vec<Button>>) -> Self {
        Self {
            text: text.into(),
            buttons,
        }
    }

    pub fn has_action(&self, action: CallbackAction) -> bool {
        self.buttons.iter().flatten().any(|b| b.action == action)
    }
}

/// Everything the bot sends back for one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub messages: Vec<OutgoingMessage>,
}

impl Reply {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::from(OutgoingMessage::text(text))
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: OutgoingMessage) {
        self.messages.push(message);
    }

    /// Put `notice` in front of the first message's text
    pub fn with_notice(mut self, notice: &str) -> Self {
        match self.messages.first_mut() {
            Some(first) => first.text = format!("{notice}\n\n{}", first.text),
            None => self.messages.push(OutgoingMessage::text(notice)),
        }
        self
    }

    /// Text of the last message, handy in logs and tests
    pub fn last_text(&self) -> Option<&str> {
        self.messages.last().map(|m| m.text.as_str())
    }
}

impl From<OutgoingMessage> for Reply {
    fn from(message: OutgoingMessage) -> Self {
        Self { messages: vec![message] }
    }
}

impl From<Vec<OutgoingMessage>> for Reply {
    fn from(messages: Vec<OutgoingMessage>) -> Self {
        Self { messages }
    }
}
