//! Chat with the dispatcher from a terminal, without Telegram.
//!
//! Uses Gemini and OpenWeatherMap when `GEMINI_API_KEY` and
//! `OPENWEATHERMAP_API_KEY` are set, canned stand-ins otherwise. History
//! lives in memory for the length of the session.

use std::sync::Arc;

use persona_bot::{
    AppConfig, Dispatcher, GeminiClient, InMemoryAuditLog, InMemoryHistoryStore, InboundEvent,
    LanguageModel, OpenWeatherMapClient, StubModel, StubWeather, WeatherLookup, WeatherReport,
};
use tokio::io::{AsyncBufReadExt, BufReader};

const CONSOLE_USER: i64 = 1;

#[tokio::main]
async fn main() -> persona_bot::Result<()> {
    let cfg = AppConfig::from_env();

    let model: Arc<dyn LanguageModel> = match GeminiClient::from_config(&cfg.model) {
        Ok(client) => Arc::new(client),
        Err(_) => {
            eprintln!("GEMINI_API_KEY not set, answers are canned");
            StubModel::new(
                (1..=100)
                    .map(|i| format!("(canned answer #{i})"))
                    .collect(),
            )
        }
    };
    let weather: Arc<dyn WeatherLookup> = match OpenWeatherMapClient::from_config(&cfg.weather) {
        Ok(client) => Arc::new(client),
        Err(_) => {
            eprintln!("OPENWEATHERMAP_API_KEY not set, only New York has weather");
            StubWeather::new()
                .with_report(WeatherReport::new("New York", "scattered clouds"))
                .into_shared()
        }
    };

    let dispatcher = Dispatcher::from_config(
        &cfg,
        Arc::new(InMemoryHistoryStore::new(cfg.storage.history_capacity)),
        Arc::new(InMemoryAuditLog::default()),
        model,
        weather,
    );

    println!("Try /start, /help, /fw <city>, /okayayuss <question> or plain text. Ctrl-D quits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match dispatcher
            .handle(&InboundEvent::new(CONSOLE_USER, CONSOLE_USER, line))
            .await
        {
            Some(reply) => println!("bot> {reply}"),
            None => println!("bot> (no reply)"),
        }
    }
    Ok(())
}
