use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Copy, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "start over and show the main menu")]
    Start,
    #[command(description = "explain how the bot works")]
    Help,
    #[command(description = "show contact details")]
    Contact,
    #[command(description = "submit a complaint")]
    Complaint,
    #[command(description = "make a suggestion")]
    Suggestion,
    #[command(description = "give feedback")]
    Feedback,
    #[command(description = "cancel the current conversation")]
    Cancel,
    #[command(description = "open the admin menu")]
    Admin,
}

/// Parse a message as a bot command; `None` for plain text and unknown commands
pub fn parse_command(text: &str, bot_username: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    // Arguments are never used, so "/start hello" still means /start
    Command::parse(first, bot_username).ok()
}

/// Cheap check used to route `/cancel` around a busy conversation
pub fn is_cancel_command(text: &str) -> bool {
    let first = text.split_whitespace().next().unwrap_or_default();
    let command = first.split('@').next().unwrap_or_default();
    command == "/cancel"
}
