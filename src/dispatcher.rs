//! Routes inbound events to the bot's handlers.
//!
//! Each event is handled on its own; the only state shared between events is
//! the per-user history window and the audit log. Collaborator and storage
//! failures never escape [`Dispatcher::handle`]: they are logged and turned
//! into a fallback reply or a skipped side effect.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{BotError, Result};
use crate::llm::LanguageModel;
use crate::metrics::{DispatchGuard, MetricsTracker};
use crate::message::{Command, Inbound, InboundEvent, Sender, UserId};
use crate::prompt::PromptBuilder;
use crate::storage::{AuditLog, HistoryStore};
use crate::weather::WeatherLookup;

pub const GREETING: &str = "Hi! Welcome to OkayAyussbot!";
pub const HELP_TEXT: &str = "Help! How can I assist you?";
pub const GENERATION_FAILED: &str = "Sorry, I could not generate a response right now.";

pub fn weather_error(city: &str) -> String {
    format!("Error fetching weather data for {city}.")
}

/// Per-user async mutexes so one user's read-generate-append sequences run
/// one at a time.
#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl UserLocks {
    const SWEEP_THRESHOLD: usize = 1024;

    pub async fn acquire(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            if locks.len() >= Self::SWEEP_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(user_id).or_default())
        };
        lock.lock_owned().await
    }

    pub async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

async fn bounded<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(BotError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

pub struct Dispatcher {
    history: Arc<dyn HistoryStore>,
    audit: Arc<dyn AuditLog>,
    model: Arc<dyn LanguageModel>,
    weather: Arc<dyn WeatherLookup>,
    prompts: PromptBuilder,
    default_city: String,
    weather_timeout: Duration,
    model_timeout: Duration,
    locks: UserLocks,
    metrics: MetricsTracker,
}

impl Dispatcher {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        audit: Arc<dyn AuditLog>,
        model: Arc<dyn LanguageModel>,
        weather: Arc<dyn WeatherLookup>,
    ) -> Self {
        let defaults = AppConfig::default();
        let weather_timeout = defaults.weather.timeout();
        let model_timeout = defaults.model.timeout();
        Self {
            history,
            audit,
            model,
            weather,
            prompts: PromptBuilder::new(defaults.persona.prompt),
            default_city: defaults.weather.default_city,
            weather_timeout,
            model_timeout,
            locks: UserLocks::default(),
            metrics: MetricsTracker::default(),
        }
    }

    pub fn from_config(
        cfg: &AppConfig,
        history: Arc<dyn HistoryStore>,
        audit: Arc<dyn AuditLog>,
        model: Arc<dyn LanguageModel>,
        weather: Arc<dyn WeatherLookup>,
    ) -> Self {
        Self::new(history, audit, model, weather)
            .with_persona(cfg.persona.prompt.clone())
            .with_default_city(cfg.weather.default_city.clone())
            .with_timeouts(cfg.weather.timeout(), cfg.model.timeout())
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.prompts = PromptBuilder::new(persona);
        self
    }

    pub fn with_default_city(mut self, city: impl Into<String>) -> Self {
        self.default_city = city.into();
        self
    }

    pub fn with_timeouts(mut self, weather: Duration, model: Duration) -> Self {
        self.weather_timeout = weather;
        self.model_timeout = model;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsTracker) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    /// Handles one event and returns the reply to send, if any.
    pub async fn handle(&self, event: &InboundEvent) -> Option<String> {
        let inbound = event.inbound();
        let label = match &inbound {
            Inbound::Command { command, .. } => command.label().to_string(),
            Inbound::Text(_) => "echo".to_string(),
        };
        let mut guard = self.metrics.start(label);

        let reply = match inbound {
            Inbound::Command { command, args } => match command {
                Command::Start => Some(self.canned(event.user_id, GREETING, &mut guard).await),
                Command::Help => Some(self.canned(event.user_id, HELP_TEXT, &mut guard).await),
                Command::WeatherQuip => Some(self.weather_quip(event.user_id, &args, &mut guard).await),
                Command::AiAnswer => self.ai_answer(event.user_id, &args, &mut guard).await,
                Command::Unknown(name) => {
                    debug!(user_id = event.user_id, command = %name, "ignoring unknown command");
                    None
                }
            },
            Inbound::Text(text) => Some(self.echo(event.user_id, text, &mut guard).await),
        };

        guard.finish(reply.is_some());
        reply
    }

    async fn canned(&self, user_id: UserId, text: &str, guard: &mut DispatchGuard) -> String {
        info!(user_id, "sending canned reply");
        self.audit(user_id, text, Sender::Bot, guard).await;
        text.to_string()
    }

    async fn echo(&self, user_id: UserId, text: String, guard: &mut DispatchGuard) -> String {
        info!(user_id, "echoing message");
        self.audit(user_id, &text, Sender::User, guard).await;
        self.audit(user_id, &text, Sender::Bot, guard).await;
        text
    }

    async fn weather_quip(
        &self,
        user_id: UserId,
        args: &[String],
        guard: &mut DispatchGuard,
    ) -> String {
        let city = if args.is_empty() {
            self.default_city.clone()
        } else {
            args.join(" ")
        };
        info!(user_id, city = %city, "weather quip requested");

        let lookup = bounded(
            "weather lookup",
            self.weather_timeout,
            self.weather.current(&city),
        )
        .await;

        let reply = match lookup {
            Ok(Some(report)) => {
                debug!(
                    user_id,
                    city = %report.city,
                    description = %report.description,
                    celsius = ?report.temperature_celsius(),
                    humidity = ?report.humidity,
                    "weather report received"
                );
                let prompt = self.prompts.weather_prompt(&report);
                match self.generate(&prompt).await {
                    Ok(phrase) => phrase,
                    Err(err) => {
                        warn!(user_id, error = %err, "weather quip generation failed");
                        guard.mark_degraded();
                        GENERATION_FAILED.to_string()
                    }
                }
            }
            Ok(None) => weather_error(&city),
            Err(err) => {
                warn!(user_id, city = %city, error = %err, "weather lookup failed");
                guard.mark_degraded();
                weather_error(&city)
            }
        };

        self.audit(user_id, &reply, Sender::Bot, guard).await;
        reply
    }

    /// Empty arguments produce no reply at all.
    async fn ai_answer(
        &self,
        user_id: UserId,
        args: &[String],
        guard: &mut DispatchGuard,
    ) -> Option<String> {
        if args.is_empty() {
            debug!(user_id, "ai answer without arguments, ignoring");
            return None;
        }
        let utterance = args.join(" ");
        let _serialized = self.locks.acquire(user_id).await;
        info!(user_id, "ai answer requested");

        self.audit(user_id, &utterance, Sender::User, guard).await;

        let history = match self.history.get_history(user_id).await {
            Ok(history) => history,
            Err(err) => {
                warn!(user_id, error = %err, "history unavailable, continuing without it");
                guard.mark_degraded();
                Vec::new()
            }
        };
        debug!(user_id, exchanges = history.len(), "history loaded");

        let prompt = self.prompts.persona_prompt(&history, &utterance);
        let answer = match self.generate(&prompt).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(user_id, error = %err, "ai answer generation failed");
                guard.mark_degraded();
                self.audit(user_id, GENERATION_FAILED, Sender::Bot, guard).await;
                return Some(GENERATION_FAILED.to_string());
            }
        };

        self.audit(user_id, &answer, Sender::Bot, guard).await;
        if let Err(err) = self
            .history
            .append_exchange(user_id, &utterance, &answer)
            .await
        {
            warn!(user_id, error = %err, "failed to record exchange");
            guard.mark_degraded();
        }
        Some(answer)
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        bounded("generation", self.model_timeout, self.model.generate(prompt)).await
    }

    async fn audit(&self, user_id: UserId, text: &str, sender: Sender, guard: &mut DispatchGuard) {
        if let Err(err) = self.audit.log_message(user_id, text, sender).await {
            warn!(user_id, %sender, error = %err, "audit log write failed");
            guard.mark_degraded();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;
    use crate::storage::{InMemoryAuditLog, InMemoryHistoryStore};
    use crate::weather::{StubWeather, WeatherReport};
    use async_trait::async_trait;

    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".into())
        }
    }

    struct BrokenHistory;

    #[async_trait]
    impl HistoryStore for BrokenHistory {
        async fn get_history(&self, _user_id: UserId) -> Result<Vec<crate::message::Exchange>> {
            Err(BotError::Storage("disk on fire".into()))
        }

        async fn append_exchange(&self, _user_id: UserId, _user: &str, _bot: &str) -> Result<()> {
            Err(BotError::Storage("disk on fire".into()))
        }
    }

    struct BrokenAudit;

    #[async_trait]
    impl AuditLog for BrokenAudit {
        async fn log_message(&self, _user_id: UserId, _text: &str, _sender: Sender) -> Result<()> {
            Err(BotError::Storage("audit table locked".into()))
        }
    }

    fn event(text: &str) -> InboundEvent {
        InboundEvent::new(42, 42, text)
    }

    #[tokio::test]
    async fn start_and_help_reply_fixed_text() {
        let audit = Arc::new(InMemoryAuditLog::default());
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryHistoryStore::default()),
            audit.clone(),
            StubModel::new(vec![]),
            StubWeather::new().into_shared(),
        );

        assert_eq!(dispatcher.handle(&event("/start")).await.as_deref(), Some(GREETING));
        assert_eq!(dispatcher.handle(&event("/help")).await.as_deref(), Some(HELP_TEXT));

        let entries = audit.entries().await;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.sender == Sender::Bot));
    }

    #[tokio::test]
    async fn weather_quip_defaults_to_new_york() {
        let model = StubModel::new(vec!["Bring an umbrella and a sense of humour.".into()]);
        let weather = StubWeather::new()
            .with_report(WeatherReport::new("New York", "light rain"))
            .into_shared();
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryHistoryStore::default()),
            Arc::new(InMemoryAuditLog::default()),
            model.clone(),
            weather.clone(),
        );

        let reply = dispatcher.handle(&event("/fw")).await;
        assert_eq!(reply.as_deref(), Some("Bring an umbrella and a sense of humour."));
        assert_eq!(
            model.prompts(),
            vec!["The weather is light rain. Write a funny phrase about this."]
        );
    }

    #[tokio::test]
    async fn unreachable_weather_service_reports_error() {
        let model = StubModel::new(vec![]);
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryHistoryStore::default()),
            Arc::new(InMemoryAuditLog::default()),
            model.clone(),
            StubWeather::failing().into_shared(),
        );

        let reply = dispatcher.handle(&event("/fw San Francisco")).await;
        assert_eq!(reply, Some(weather_error("San Francisco")));
        assert_eq!(model.calls(), 0);
        assert!(dispatcher.metrics().reports()[0].degraded);
    }

    #[tokio::test]
    async fn ai_answer_without_args_is_silent() {
        let audit = Arc::new(InMemoryAuditLog::default());
        let model = StubModel::new(vec![]);
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryHistoryStore::default()),
            audit.clone(),
            model.clone(),
            StubWeather::new().into_shared(),
        );

        assert_eq!(dispatcher.handle(&event("/okayayuss")).await, None);
        assert!(audit.entries().await.is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn generation_timeout_becomes_error_reply_and_skips_history() {
        let history = Arc::new(InMemoryHistoryStore::default());
        let dispatcher = Dispatcher::new(
            history.clone(),
            Arc::new(InMemoryAuditLog::default()),
            Arc::new(SlowModel),
            StubWeather::new().into_shared(),
        )
        .with_timeouts(Duration::from_millis(50), Duration::from_millis(50));

        let reply = dispatcher.handle(&event("/okayayuss are you there")).await;
        assert_eq!(reply.as_deref(), Some(GENERATION_FAILED));
        assert!(history.get_history(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_degrades_to_empty_history() {
        let model = StubModel::new(vec!["sure thing".into()]);
        let dispatcher = Dispatcher::new(
            Arc::new(BrokenHistory),
            Arc::new(InMemoryAuditLog::default()),
            model.clone(),
            StubWeather::new().into_shared(),
        )
        .with_persona("P");

        let reply = dispatcher.handle(&event("/okayayuss hi")).await;
        assert_eq!(reply.as_deref(), Some("sure thing"));
        assert_eq!(model.prompts(), vec!["\nP: hi"]);
    }

    #[tokio::test]
    async fn audit_failures_never_block_replies() {
        let history = Arc::new(InMemoryHistoryStore::default());
        let dispatcher = Dispatcher::new(
            history.clone(),
            Arc::new(BrokenAudit),
            StubModel::new(vec!["ok".into()]),
            StubWeather::new().into_shared(),
        );

        assert_eq!(dispatcher.handle(&event("hello")).await.as_deref(), Some("hello"));
        assert_eq!(dispatcher.handle(&event("/start")).await.as_deref(), Some(GREETING));
        assert_eq!(dispatcher.handle(&event("/okayayuss hi")).await.as_deref(), Some("ok"));
        assert_eq!(
            history.get_history(42).await.unwrap(),
            vec![crate::message::Exchange::new("hi", "ok")]
        );
        assert!(dispatcher.metrics().reports().iter().all(|report| report.degraded));
    }

    #[tokio::test]
    async fn unknown_commands_get_no_reply() {
        let audit = Arc::new(InMemoryAuditLog::default());
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryHistoryStore::default()),
            audit.clone(),
            StubModel::new(vec![]),
            StubWeather::new().into_shared(),
        );
        assert_eq!(dispatcher.handle(&event("/settings")).await, None);
        assert!(audit.entries().await.is_empty());
    }

    #[tokio::test]
    async fn user_locks_serialize_the_same_user() {
        let locks = UserLocks::default();
        let guard = locks.acquire(1).await;
        let other = tokio::time::timeout(Duration::from_millis(20), locks.acquire(2)).await;
        assert!(other.is_ok());
        let same = tokio::time::timeout(Duration::from_millis(20), locks.acquire(1)).await;
        assert!(same.is_err());
        drop(guard);
        let _again = locks.acquire(1).await;
        assert_eq!(locks.tracked().await, 2);
    }
}
