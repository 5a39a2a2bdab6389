use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};
use crate::memory::DEFAULT_HISTORY_CAPACITY;

/// Upper bound for `storage.history_capacity`; every exchange is replayed into each prompt.
pub const MAX_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Polling,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
    #[serde(default)]
    pub mode: TransportMode,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_telegram_api(),
            mode: TransportMode::default(),
            poll_timeout_secs: default_poll_timeout(),
            webhook_secret: None,
        }
    }
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_weather_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_city")]
    pub default_city: String,
    #[serde(default = "default_weather_timeout")]
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_weather_endpoint(),
            default_city: default_city(),
            timeout_secs: default_weather_timeout(),
        }
    }
}

impl WeatherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_weather_endpoint() -> String {
    "http://api.openweathermap.org/data/2.5".into()
}

fn default_city() -> String {
    "New York".into()
}

fn default_weather_timeout() -> u64 {
    10
}

/// Sampling parameters sent as Gemini's `generationConfig`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_temperature() -> f64 {
    0.9
}

fn default_top_p() -> f64 {
    1.0
}

fn default_top_k() -> u32 {
    1
}

fn default_max_output_tokens() -> u32 {
    2048
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockNone,
    BlockOnlyHigh,
    #[default]
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

/// Per-category content-safety thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SafetyConfig {
    #[serde(default)]
    pub harassment: HarmBlockThreshold,
    #[serde(default)]
    pub hate_speech: HarmBlockThreshold,
    #[serde(default)]
    pub sexually_explicit: HarmBlockThreshold,
    #[serde(default)]
    pub dangerous_content: HarmBlockThreshold,
}

impl SafetyConfig {
    /// `(category, threshold)` pairs in the Gemini API's naming.
    pub fn categories(&self) -> [(&'static str, HarmBlockThreshold); 4] {
        [
            ("HARM_CATEGORY_HARASSMENT", self.harassment),
            ("HARM_CATEGORY_HATE_SPEECH", self.hate_speech),
            ("HARM_CATEGORY_SEXUALLY_EXPLICIT", self.sexually_explicit),
            ("HARM_CATEGORY_DANGEROUS_CONTENT", self.dangerous_content),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_model_endpoint(),
            model: default_model(),
            timeout_secs: default_model_timeout(),
            generation: GenerationConfig::default(),
            safety: SafetyConfig::default(),
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_model_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

fn default_model() -> String {
    "gemini-1.5-flash".into()
}

fn default_model_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Records idle for longer than this are pruned. Unset keeps them forever.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            history_capacity: default_history_capacity(),
            retention_days: None,
        }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> Option<Duration> {
        self.retention_days
            .map(|days| Duration::from_secs(u64::from(days) * 24 * 60 * 60))
    }
}

fn default_database_url() -> String {
    "sqlite://chatbot.db?mode=rwc".into()
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonaConfig {
    #[serde(default = "default_persona")]
    pub prompt: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            prompt: default_persona(),
        }
    }
}

fn default_persona() -> String {
    concat!(
        "You are named as Ayush Dhiman. You are a 4th year indian college going student who is a nerd, ",
        "loves food and prefers personal time & space over everything, except coding, movies and music. ",
        "he is kind, and usually speaks softly. Try to answer like ayush, in a very casual human like way, ",
        "who may sometimes be funny(like as in dad jokes) and reply to the given prompt in a very natural ",
        "language and human like friendly way, just like a conversation between two best friends. Also ayush ",
        "does not like to speak extra, so his replies are always concise, meaning-full, supportive and single ",
        "ended answers. Don't mention useless stuff, until asked, he just replies to what is questioned and ",
        "especially AVOIDS small talks or explaining/saying useless stuff that would go un-noticed",
    )
    .into()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| BotError::Config(format!("Failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Defaults overlaid with environment variables, for deployments without
    /// a config file.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    fn apply_env(&mut self) {
        if let Ok(token) = env::var("BOT_TOKEN") {
            self.telegram.token = Some(token);
        }
        if let Ok(key) = env::var("OPENWEATHERMAP_API_KEY") {
            self.weather.api_key = Some(key);
        }
        if let Ok(key) = env::var("GEMINI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(mode) = env::var("BOT_MODE") {
            self.telegram.mode = match mode.to_ascii_lowercase().as_str() {
                "webhook" => TransportMode::Webhook,
                _ => TransportMode::Polling,
            };
        }
        if let Ok(secret) = env::var("BOT_WEBHOOK_SECRET") {
            self.telegram.webhook_secret = Some(secret);
        }
        if let Ok(host) = env::var("BOT_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("BOT_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Ok(url) = env::var("BOT_DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Ok(capacity) = env::var("BOT_HISTORY_CAPACITY") {
            if let Ok(parsed) = capacity.parse::<usize>() {
                self.storage.history_capacity = parsed;
            }
        }
        if let Ok(days) = env::var("BOT_RETENTION_DAYS") {
            if let Ok(parsed) = days.parse::<u32>() {
                self.storage.retention_days = Some(parsed);
            }
        }
        if let Ok(format) = env::var("BOT_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            };
        }
    }

    /// Checks the settings the running bot cannot do without.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.token.as_deref().map_or(true, str::is_empty) {
            return Err(BotError::Config("missing Telegram bot token (BOT_TOKEN)".into()));
        }
        if self.weather.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(BotError::Config(
                "missing OpenWeatherMap API key (OPENWEATHERMAP_API_KEY)".into(),
            ));
        }
        if self.model.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(BotError::Config("missing Gemini API key (GEMINI_API_KEY)".into()));
        }
        if self.storage.history_capacity == 0 || self.storage.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(BotError::Config(format!(
                "storage.history_capacity must be between 1 and {MAX_HISTORY_CAPACITY}"
            )));
        }
        Ok(())
    }
}
