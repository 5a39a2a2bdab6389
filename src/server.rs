use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{BotError, Result};
use crate::telegram::Update;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// HTTP front end for webhook delivery plus health and metrics endpoints.
#[derive(Clone)]
pub struct WebhookServer {
    dispatcher: Arc<Dispatcher>,
    secret: Option<Arc<str>>,
}

impl WebhookServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            secret: None,
        }
    }

    /// Requests must carry this value in Telegram's secret-token header.
    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.map(Arc::from);
        self
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route("/webhook", post(webhook))
            .with_state(self)
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "webhook server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(|err| BotError::Transport(format!("server error: {err}")))?;
        Ok(())
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<WebhookServer>) -> impl IntoResponse {
    Json(state.dispatcher.metrics().snapshot())
}

/// Answers inline with a `sendMessage` method payload, which Telegram
/// executes on the bot's behalf.
async fn webhook(
    State(state): State<WebhookServer>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> Response {
    if let Some(expected) = state.secret.as_deref() {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected) {
            warn!(update_id = update.update_id, "rejected webhook with bad secret");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let Some(event) = update.into_event() else {
        return Json(json!({})).into_response();
    };
    match state.dispatcher.handle(&event).await {
        Some(text) => {
            let mut body = json!({
                "method": "sendMessage",
                "chat_id": event.chat_id,
                "text": text,
            });
            if let Some(message_id) = event.message_id {
                body["reply_to_message_id"] = json!(message_id);
            }
            Json(body).into_response()
        }
        None => Json(json!({})).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;
    use crate::storage::{InMemoryAuditLog, InMemoryHistoryStore};
    use crate::telegram::{TelegramChat, TelegramMessage, TelegramUser};
    use crate::weather::StubWeather;
    use axum::http::HeaderValue;

    fn server() -> WebhookServer {
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryHistoryStore::default()),
            Arc::new(InMemoryAuditLog::default()),
            StubModel::new(vec![]),
            StubWeather::new().into_shared(),
        );
        WebhookServer::new(Arc::new(dispatcher))
    }

    fn update(text: &str) -> Update {
        Update {
            update_id: 1,
            message: Some(TelegramMessage {
                message_id: 3,
                from: Some(TelegramUser {
                    id: 77,
                    is_bot: false,
                    username: None,
                }),
                chat: TelegramChat { id: 88 },
                text: Some(text.into()),
            }),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn webhook_answers_inline() {
        let response = webhook(State(server()), HeaderMap::new(), Json(update("hello"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["method"], "sendMessage");
        assert_eq!(body["chat_id"], 88);
        assert_eq!(body["text"], "hello");
        assert_eq!(body["reply_to_message_id"], 3);
    }

    #[tokio::test]
    async fn webhook_checks_secret() {
        let state = server().with_secret(Some("s3cret".into()));
        let rejected = webhook(State(state.clone()), HeaderMap::new(), Json(update("hi"))).await;
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert(SECRET_HEADER, HeaderValue::from_static("s3cret"));
        let accepted = webhook(State(state), headers, Json(update("hi"))).await;
        assert_eq!(accepted.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn silent_commands_return_empty_object() {
        let response = webhook(State(server()), HeaderMap::new(), Json(update("/okayayuss"))).await;
        assert_eq!(body_json(response).await, json!({}));
    }
}
