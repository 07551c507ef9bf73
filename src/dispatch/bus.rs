use anyhow::{Result, Context};
use redis::{Client, aio::MultiplexedConnection};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cli::config::BusSettings;
use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::envelope::{RequestEnvelope, Response};

/// How long a blocking pop waits before the loop re-checks, in seconds
const POP_TIMEOUT_SECS: usize = 5;

/// Message-bus adapter: pops request envelopes from a Redis list, runs
/// them through the dispatcher and pushes responses to the caller's reply
/// list.
///
/// The transport is interface-only; all request semantics live in the
/// dispatcher.
pub struct BusConsumer {
    client: Client,
    settings: BusSettings,
    dispatcher: Arc<Dispatcher>,
}

impl BusConsumer {
    pub fn new(settings: BusSettings, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let client = Client::open(settings.redis_url.clone())
            .context(format!("Failed to connect to Redis at {}", settings.redis_url))?;

        Ok(Self {
            client,
            settings,
            dispatcher,
        })
    }

    /// Consume requests until the task is aborted
    pub async fn run(&self) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to get Redis connection")?;

        info!("Bus consumer listening on {}", self.settings.request_key);

        loop {
            let popped: Option<(String, String)> = redis::cmd("BRPOP")
                .arg(&self.settings.request_key)
                .arg(POP_TIMEOUT_SECS)
                .query_async(&mut conn)
                .await
                .context("Failed to pop request from Redis")?;

            let Some((_, raw)) = popped else {
                continue;
            };

            self.handle_message(&mut conn, &raw).await;
        }
    }

    async fn handle_message(&self, conn: &mut MultiplexedConnection, raw: &str) {
        let envelope: RequestEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                // No recoverable reply key on a malformed envelope
                warn!("Dropping malformed request envelope: {}", e);
                return;
            }
        };

        let reply_to = envelope.reply_to.clone();
        let response = self.dispatcher.dispatch(&envelope).await;

        let Some(reply_to) = reply_to else {
            debug!("No reply list for job {}, response dropped", envelope.payload.job_id);
            return;
        };

        if let Err(e) = self.push_response(conn, &reply_to, &response).await {
            warn!("Failed to push response for job {}: {:#}", envelope.payload.job_id, e);
        }
    }

    async fn push_response(
        &self,
        conn: &mut MultiplexedConnection,
        reply_to: &str,
        response: &Response,
    ) -> Result<()> {
        let reply_key = format!("{}:{}", self.settings.reply_key_prefix, reply_to);
        let body = serde_json::to_string(response)
            .context("Failed to serialize response")?;

        redis::cmd("LPUSH")
            .arg(&reply_key)
            .arg(&body)
            .query_async::<_, ()>(conn)
            .await
            .context("Failed to push response to Redis")?;

        debug!("Pushed response to {}", reply_key);

        Ok(())
    }
}

/// Submit one envelope over the bus and wait for its response.
///
/// Used by the operator CLI; the worker process never calls this.
pub async fn submit_and_wait(
    settings: &BusSettings,
    mut envelope: RequestEnvelope,
    timeout_secs: usize,
) -> Result<Response> {
    let client = Client::open(settings.redis_url.clone())
        .context(format!("Failed to connect to Redis at {}", settings.redis_url))?;
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to get Redis connection")?;

    let reply_to = format!("cli-{}", envelope.payload.job_id);
    envelope.reply_to = Some(reply_to.clone());

    let body = serde_json::to_string(&envelope)
        .context("Failed to serialize request envelope")?;

    redis::cmd("LPUSH")
        .arg(&settings.request_key)
        .arg(&body)
        .query_async::<_, ()>(&mut conn)
        .await
        .context("Failed to push request to Redis")?;

    let reply_key = format!("{}:{}", settings.reply_key_prefix, reply_to);
    let popped: Option<(String, String)> = redis::cmd("BRPOP")
        .arg(&reply_key)
        .arg(timeout_secs)
        .query_async(&mut conn)
        .await
        .context("Failed to pop response from Redis")?;

    let Some((_, raw)) = popped else {
        anyhow::bail!("No response within {} seconds", timeout_secs);
    };

    serde_json::from_str(&raw).context("Failed to parse response envelope")
}
