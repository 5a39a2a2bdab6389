use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::telegram::{Transport, Update};

/// Long-polling loop that feeds transport updates through the dispatcher.
pub struct BotRuntime<T: Transport> {
    transport: Arc<T>,
    dispatcher: Arc<Dispatcher>,
    max_concurrency: usize,
    error_pause: Duration,
}

impl<T: Transport> Clone for BotRuntime<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            dispatcher: Arc::clone(&self.dispatcher),
            max_concurrency: self.max_concurrency,
            error_pause: self.error_pause,
        }
    }
}

impl<T: Transport + 'static> BotRuntime<T> {
    pub fn new(transport: Arc<T>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            transport,
            dispatcher,
            max_concurrency: 16,
            error_pause: Duration::from_secs(2),
        }
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    /// Pause after a failed `getUpdates` before polling again.
    pub fn with_error_pause(mut self, pause: Duration) -> Self {
        self.error_pause = pause;
        self
    }

    /// Dispatches one update and sends the reply, if any. Send failures are
    /// logged, never returned.
    pub async fn handle_update(&self, update: Update) {
        let update_id = update.update_id;
        let Some(event) = update.into_event() else {
            return;
        };
        let Some(reply) = self.dispatcher.handle(&event).await else {
            return;
        };
        if let Err(err) = self
            .transport
            .send_text(event.chat_id, &reply, event.message_id)
            .await
        {
            warn!(update_id, chat_id = event.chat_id, error = %err, "failed to deliver reply");
        }
    }

    /// Fetches one batch, handles it with bounded concurrency and returns the
    /// offset for the next poll.
    pub async fn poll_once(&self, offset: Option<i64>) -> Result<Option<i64>> {
        let updates = self.transport.fetch_updates(offset).await?;
        let next = updates
            .iter()
            .map(|update| update.update_id + 1)
            .max()
            .or(offset);

        let this = self;
        futures::stream::iter(updates)
            .for_each_concurrent(self.max_concurrency, move |update| this.handle_update(update))
            .await;
        Ok(next)
    }

    /// Polls until `shutdown` resolves. A pending poll is abandoned; updates
    /// that were never acknowledged through the offset are redelivered by
    /// Telegram on the next start.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut offset = None;
        info!(max_concurrency = self.max_concurrency, "polling for updates");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping poller");
                    return Ok(());
                }
                polled = self.poll_once(offset) => match polled {
                    Ok(next) => offset = next,
                    Err(err) => {
                        warn!(error = %err, "polling failed");
                        tokio::time::sleep(self.error_pause).await;
                    }
                },
            }
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

/// Periodically drops history records idle for longer than `max_age`.
#[cfg(feature = "persistence")]
pub fn spawn_retention_sweep(
    store: crate::storage::SqlHistoryStore,
    max_age: Duration,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match store.prune_idle(max_age).await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "pruned idle history"),
                Err(err) => warn!(error = %err, "history pruning failed"),
            }
        }
    })
}
