//! Telegram chat bot with bounded per-user conversation memory.
//!
//! The crate provides:
//! - A bounded history store (`HistoryStore`, in-memory and SQLite backed).
//! - An append-only message audit log (`AuditLog`).
//! - Collaborator abstractions for text generation (`LanguageModel`, Gemini)
//!   and weather lookups (`WeatherLookup`, OpenWeatherMap).
//! - A `Dispatcher` that routes commands to handlers, and a long-polling
//!   `BotRuntime` / webhook `WebhookServer` that feed it Telegram updates.

mod config;
mod dispatcher;
mod error;
mod llm;
mod memory;
mod message;
mod metrics;
mod prompt;
mod runtime;
#[cfg(feature = "server")]
mod server;
mod storage;
mod telegram;
mod telemetry;
mod weather;

pub use config::{
    AppConfig, GenerationConfig, HarmBlockThreshold, LogFormat, LoggingConfig, ModelConfig,
    PersonaConfig, RuntimeConfig, SafetyConfig, ServerConfig, StorageConfig, TelegramConfig,
    TransportMode, WeatherConfig, MAX_HISTORY_CAPACITY,
};
pub use dispatcher::{weather_error, Dispatcher, UserLocks, GENERATION_FAILED, GREETING, HELP_TEXT};
pub use error::{BotError, Result};
pub use llm::{GeminiClient, LanguageModel, StubModel};
pub use memory::{HistoryWindow, DEFAULT_HISTORY_CAPACITY};
pub use message::{Command, Exchange, Inbound, InboundEvent, Sender, UserId};
pub use metrics::{DispatchReport, MetricsSnapshot, MetricsTracker};
pub use prompt::PromptBuilder;
#[cfg(feature = "persistence")]
pub use runtime::spawn_retention_sweep;
pub use runtime::BotRuntime;
#[cfg(feature = "server")]
pub use server::WebhookServer;
#[cfg(feature = "persistence")]
pub use storage::{SqlAuditLog, SqlHistoryStore, SqliteDatabase};
pub use storage::{AuditEntry, AuditLog, HistoryStore, InMemoryAuditLog, InMemoryHistoryStore};
pub use telegram::{TelegramChat, TelegramClient, TelegramMessage, TelegramUser, Transport, Update};
pub use telemetry::init_tracing;
pub use weather::{OpenWeatherMapClient, StubWeather, WeatherLookup, WeatherReport};
