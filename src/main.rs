use std::path::Path;
use std::sync::Arc;

use persona_bot::{
    init_tracing, AppConfig, AuditLog, BotError, BotRuntime, Dispatcher, GeminiClient,
    HistoryStore, OpenWeatherMapClient, Result, TelegramClient, TransportMode,
};

fn load_config() -> Result<AppConfig> {
    let path = std::env::var("BOT_CONFIG").unwrap_or_else(|_| "bot.toml".into());
    if Path::new(&path).exists() {
        AppConfig::from_env_or_file(&path)
    } else {
        Ok(AppConfig::from_env())
    }
}

#[cfg(feature = "persistence")]
async fn open_storage(cfg: &AppConfig) -> Result<(Arc<dyn HistoryStore>, Arc<dyn AuditLog>)> {
    let db = persona_bot::SqliteDatabase::connect(&cfg.storage.database_url).await?;
    let history = db.history(cfg.storage.history_capacity);
    if let Some(max_age) = cfg.storage.retention() {
        persona_bot::spawn_retention_sweep(
            history.clone(),
            max_age,
            std::time::Duration::from_secs(3600),
        );
    }
    tracing::info!(url = %cfg.storage.database_url, "storage ready");
    let history: Arc<dyn HistoryStore> = Arc::new(history);
    let audit: Arc<dyn AuditLog> = Arc::new(db.audit_log());
    Ok((history, audit))
}

#[cfg(not(feature = "persistence"))]
async fn open_storage(cfg: &AppConfig) -> Result<(Arc<dyn HistoryStore>, Arc<dyn AuditLog>)> {
    tracing::warn!("built without persistence, history is kept in memory only");
    let history: Arc<dyn HistoryStore> = Arc::new(persona_bot::InMemoryHistoryStore::new(
        cfg.storage.history_capacity,
    ));
    let audit: Arc<dyn AuditLog> = Arc::new(persona_bot::InMemoryAuditLog::default());
    Ok((history, audit))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cfg = load_config()?;
    init_tracing(&cfg.logging)?;
    cfg.validate()?;

    let (history, audit) = open_storage(&cfg).await?;
    let model = Arc::new(GeminiClient::from_config(&cfg.model)?);
    let weather = Arc::new(OpenWeatherMapClient::from_config(&cfg.weather)?);
    let dispatcher = Arc::new(Dispatcher::from_config(&cfg, history, audit, model, weather));

    match cfg.telegram.mode {
        TransportMode::Polling => {
            let transport = Arc::new(TelegramClient::from_config(&cfg.telegram)?);
            BotRuntime::new(transport, dispatcher)
                .with_max_concurrency(cfg.runtime.max_concurrency)
                .run()
                .await
        }
        TransportMode::Webhook => serve_webhook(&cfg, dispatcher).await,
    }
}

#[cfg(feature = "server")]
async fn serve_webhook(cfg: &AppConfig, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let addr: std::net::SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|err| BotError::Config(format!("invalid listen address: {err}")))?;
    persona_bot::WebhookServer::new(dispatcher)
        .with_secret(cfg.telegram.webhook_secret.clone())
        .serve(addr)
        .await
}

#[cfg(not(feature = "server"))]
async fn serve_webhook(_cfg: &AppConfig, _dispatcher: Arc<Dispatcher>) -> Result<()> {
    Err(BotError::Config(
        "webhook mode requires the `server` feature".into(),
    ))
}
