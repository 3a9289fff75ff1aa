use std::sync::Arc;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue};
use tokio::sync::Mutex;

use crate::observability::PipelineEvent;

/// Lazily-connected handle to the coordination store.
///
/// The multiplexed connection is shared behind a mutex and dropped on the
/// first command failure so the next attempt reconnects. Commands are retried
/// once; the second failure is returned to the caller.
#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl RedisHandle {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: Arc::new(Mutex::new(None)),
        }
    }

    async fn ensure_connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }
        let client = redis::Client::open(self.url.as_str())
            .with_context(|| format!("invalid store url `{}`", self.url))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("failed to connect to store at `{}`", self.url))?;
        tracing::debug!(
            event = PipelineEvent::StoreConnected.as_str(),
            "store connection established"
        );
        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// Run one command, reconnecting once if the shared connection has died.
    pub(crate) async fn run<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..2u32 {
            let mut connection = match self.ensure_connection().await {
                Ok(connection) => connection,
                Err(err) => {
                    last_err = Some(err);
                    continue;
                }
            };
            match cmd.query_async::<T>(&mut connection).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            event = PipelineEvent::StoreCommandRetrySucceeded.as_str(),
                            "store command succeeded after reconnect"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    tracing::warn!(
                        event = PipelineEvent::StoreCommandRetryFailed.as_str(),
                        attempt,
                        error = %err,
                        "store command failed, dropping connection"
                    );
                    *self.connection.lock().await = None;
                    last_err = Some(err.into());
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("store command failed")))
    }
}
