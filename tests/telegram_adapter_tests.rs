//! # Telegram Adapter Tests
//!
//! Drives the callback handler against a local stand-in for the Bot API
//! that rejects every call, the way Telegram does for stale queries.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use teloxide::prelude::*;
use teloxide::types::UpdateId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use complaint_desk::bot::callback_handler;
use complaint_desk::dialogue::{CallbackAction, FlowState, SubmissionKind};

mod common;
use common::*;

const TOO_OLD: &str = r#"{"ok":false,"error_code":400,"description":"Bad Request: query is too old and response timeout expired or query ID is invalid"}"#;

/// Bot API stand-in; records the method of every call it refuses
async fn start_rejecting_api() -> Result<(reqwest::Url, Arc<Mutex<Vec<String>>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = reqwest::Url::parse(&format!("http://{}/", listener.local_addr()?))?;
    let methods = Arc::new(Mutex::new(Vec::new()));

    let seen = methods.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let seen = seen.clone();
            tokio::spawn(async move {
                let _ = reject_request(socket, seen).await;
            });
        }
    });
    Ok((url, methods))
}

async fn reject_request(mut socket: TcpStream, seen: Arc<Mutex<Vec<String>>>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let method = head
        .split_whitespace()
        .nth(1)
        .and_then(|path| path.rsplit('/').next())
        .unwrap_or_default()
        .to_ascii_lowercase();
    seen.lock().unwrap().push(method);

    let response = format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        TOO_OLD.len(),
        TOO_OLD
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

fn button_press(data: &str) -> Result<CallbackQuery> {
    let query = serde_json::json!({
        "id": "4382bfdwdsb323b2d9",
        "from": { "id": USER, "is_bot": false, "first_name": "Ahmed", "language_code": "en" },
        "chat_instance": "-8262514080616213268",
        "data": data,
    });
    Ok(serde_json::from_value(query)?)
}

#[tokio::test]
async fn test_rejected_callback_answer_still_runs_the_turn() -> Result<()> {
    let (api_url, methods) = start_rejecting_api().await?;
    let client = reqwest::Client::builder().no_proxy().build()?;
    let bot = Bot::with_client("123456:TEST", client).set_api_url(api_url);
    let h = Harness::new();

    let press = button_press(&CallbackAction::StartFlow(SubmissionKind::Suggestion).encode())?;
    // Sending the prompt is refused too; only the engine's view matters here
    let _ = callback_handler(bot, UpdateId(77), press, h.engine.clone()).await;

    assert_eq!(h.state(USER).await, Some(FlowState::CollectingSuggestionText));
    let methods = methods.lock().unwrap().clone();
    assert_eq!(methods.first().map(String::as_str), Some("answercallbackquery"));
    assert!(methods.iter().any(|m| m == "sendmessage"));
    Ok(())
}

#[tokio::test]
async fn test_callback_without_data_only_answers() -> Result<()> {
    let (api_url, methods) = start_rejecting_api().await?;
    let client = reqwest::Client::builder().no_proxy().build()?;
    let bot = Bot::with_client("123456:TEST", client).set_api_url(api_url);
    let h = Harness::new();

    let mut press = button_press("")?;
    press.data = None;
    callback_handler(bot, UpdateId(78), press, h.engine.clone()).await?;

    assert!(h.is_idle(USER).await);
    assert_eq!(methods.lock().unwrap().clone(), vec!["answercallbackquery".to_string()]);
    Ok(())
}
