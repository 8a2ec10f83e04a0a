//! # Complaint Desk Telegram Bot
//!
//! A Telegram bot that takes complaints, suggestions and feedback from
//! beneficiaries, walks them through a guided dialogue, classifies what they
//! write with an LLM, escalates critical cases to staff and stores every
//! submission in Postgres.

pub mod bot;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod errors;
pub mod llm;
pub mod localization;
pub mod services;
pub mod session_store;
