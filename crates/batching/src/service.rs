//! Caller-facing entry point of the batching core.

use crate::accumulator::BatchAccumulator;
use crate::pending::PendingItem;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use vecserve_core::config::BatchingConfig;
use vecserve_core::error::{EmbedError, EmbedResult};

/// Splits embedding requests into per-text items, submits them, and
/// reassembles the ordered result.
#[derive(Clone)]
pub struct EmbeddingService {
    accumulator: Arc<BatchAccumulator>,
    request_timeout: Duration,
}

impl EmbeddingService {
    pub fn new(accumulator: Arc<BatchAccumulator>, request_timeout: Duration) -> Self {
        Self {
            accumulator,
            request_timeout,
        }
    }

    pub fn from_config(accumulator: Arc<BatchAccumulator>, config: &BatchingConfig) -> Self {
        Self::new(accumulator, Duration::from_millis(config.request_timeout_ms))
    }

    /// Embed `texts`, returning one vector per text in the same order.
    ///
    /// The wait is bounded by the request timeout. Dropping the returned
    /// future abandons the wait; work already submitted still runs and its
    /// result is discarded.
    pub async fn embed(&self, texts: Vec<String>) -> EmbedResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request_id = Uuid::new_v4();
        let count = texts.len();
        metrics::counter!("embed.requests").increment(1);
        metrics::counter!("embed.texts").increment(count as u64);

        let mut items = Vec::with_capacity(count);
        let mut waiters = Vec::with_capacity(count);
        for (index, text) in texts.into_iter().enumerate() {
            let (item, waiter) = PendingItem::new(request_id, index, text);
            items.push(item);
            waiters.push(waiter);
        }

        if let Err(e) = self.accumulator.submit_many(items) {
            if matches!(e, EmbedError::Overloaded { .. }) {
                metrics::counter!("embed.overloaded").increment(1);
            }
            warn!(request_id = %request_id, error = %e, "Request rejected");
            return Err(e);
        }
        debug!(request_id = %request_id, texts = count, "Request submitted");

        let collect = async {
            let mut vectors = Vec::with_capacity(count);
            for waiter in waiters {
                vectors.push(waiter.wait().await?);
            }
            Ok(vectors)
        };

        match tokio::time::timeout(self.request_timeout, collect).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.request_timeout.as_millis() as u64;
                metrics::counter!("embed.timeouts").increment(1);
                warn!(request_id = %request_id, timeout_ms, "Request timed out");
                Err(EmbedError::RequestTimeout { timeout_ms })
            }
        }
    }

    pub fn accumulator(&self) -> &Arc<BatchAccumulator> {
        &self.accumulator
    }
}
