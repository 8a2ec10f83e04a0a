//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `commands`: Slash commands understood by the bot
//! - `events`: Transport-neutral input and output of a conversation turn
//! - `dialogue_manager`: The conversation engine, entry-point arbitration and dispatch
//! - `field_collection`: Profile gate and the field-by-field chain
//! - `submission_flow`: Complaint text, critical branch, review gate, final submission
//! - `admin_menu`: Statistics and export for admins
//! - `ui_builder`: Creates keyboards and formats messages
//! - `message_handler` / `callback_handler`: Telegram adapters
//! - `notifier`: Critical-case alerts to staff chats

pub mod admin_menu;
pub mod callback_handler;
pub mod commands;
pub mod dialogue_manager;
pub mod events;
pub mod field_collection;
pub mod message_handler;
pub mod notifier;
pub mod submission_flow;
pub mod ui_builder;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::{distribution_key, message_handler};

pub use commands::Command;
pub use dialogue_manager::{ConversationEngine, Services};
pub use events::{Button, EventKind, InboundEvent, OutgoingMessage, Reply};
pub use notifier::TelegramNotifier;
