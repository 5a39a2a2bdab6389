use std::fmt;

use serde::{Deserialize, Serialize};

/// Platform user identifier (the Telegram `from.id`).
pub type UserId = i64;

/// One user utterance paired with the bot's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub bot: String,
}

impl Exchange {
    pub fn new(user: impl Into<String>, bot: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            bot: bot.into(),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User: {} | Bot: {}", self.user, self.bot)
    }
}

/// Who produced an audited message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands the bot routes to dedicated handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    WeatherQuip,
    AiAnswer,
    Unknown(String),
}

impl Command {
    fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "fw" => Command::WeatherQuip,
            "okayayuss" => Command::AiAnswer,
            other => Command::Unknown(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::WeatherQuip => "fw",
            Command::AiAnswer => "okayayuss",
            Command::Unknown(name) => name,
        }
    }
}

/// Parsed form of an inbound message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command { command: Command, args: Vec<String> },
    Text(String),
}

impl Inbound {
    /// Splits `/name@bot arg1 arg2` into a command and whitespace-separated
    /// arguments. Anything not starting with `/` is plain text.
    pub fn parse(text: &str) -> Self {
        // The name must follow the slash directly, at the very start.
        let Some(rest) = text.strip_prefix('/') else {
            return Inbound::Text(text.to_string());
        };
        if rest.starts_with(char::is_whitespace) {
            return Inbound::Text(text.to_string());
        }

        let mut parts = rest.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default();
        if name.is_empty() {
            return Inbound::Text(text.to_string());
        }

        Inbound::Command {
            command: Command::from_name(name),
            args: parts.map(str::to_string).collect(),
        }
    }
}

/// A message delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user_id: UserId,
    pub chat_id: i64,
    pub message_id: Option<i64>,
    pub text: String,
}

impl InboundEvent {
    pub fn new(user_id: UserId, chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_id,
            message_id: None,
            text: text.into(),
        }
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn inbound(&self) -> Inbound {
        Inbound::parse(&self.text)
    }
}
