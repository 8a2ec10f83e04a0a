use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use complaint_desk::bot::{self, Command, ConversationEngine, Services, TelegramNotifier};
use complaint_desk::config::AppConfig;
use complaint_desk::db::{init_database_schema, PgStore};
use complaint_desk::llm::LlmClassifier;
use complaint_desk::localization::Language;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_tracing();
    info!("Starting Complaint Desk Telegram Bot");

    let config = AppConfig::from_env()?;

    info!("Connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    init_database_schema(&pool).await?;

    let bot = Bot::new(&config.bot_token);
    let me = bot.get_me().await.context("Failed to fetch bot identity")?;
    let bot_username: Arc<str> = Arc::from(me.username());

    let store = Arc::new(PgStore::new(pool, config.reference_prefix.clone()));
    let classifier = Arc::new(LlmClassifier::new(config.llm.clone(), config.engine.institution.clone())?);
    let notifier = Arc::new(TelegramNotifier::new(bot.clone(), &config.alert_chat_ids, Language::English));

    let services = Services {
        classifier,
        profiles: store.clone(),
        sink: store,
        notifier,
    };
    let engine = Arc::new(ConversationEngine::new(services, config.engine.clone()));

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(error = %e, "Failed to register bot commands");
    }

    info!(bot = %bot_username, "Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint({
            let engine = Arc::clone(&engine);
            let bot_username = Arc::clone(&bot_username);
            move |bot: Bot, upd: Update, msg: Message| {
                let engine = Arc::clone(&engine);
                let bot_username = Arc::clone(&bot_username);
                async move { bot::message_handler(bot, upd.id, msg, engine, bot_username).await }
            }
        }))
        .branch(Update::filter_callback_query().endpoint({
            let engine = Arc::clone(&engine);
            move |bot: Bot, upd: Update, q: CallbackQuery| {
                let engine = Arc::clone(&engine);
                async move { bot::callback_handler(bot, upd.id, q, engine).await }
            }
        }));

    Dispatcher::builder(bot, handler)
        .distribution_function(bot::distribution_key)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
