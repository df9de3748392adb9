//! Coalesces queries issued within a short window into one transport call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::histogram;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use vitrine_api_types::GraphqlRequest;

use crate::application::error::QueryError;
use crate::application::ports::GraphqlTransport;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::batcher";

const METRIC_FLUSH_SIZE: &str = "vitrine_batcher_flush_size";

struct Pending {
    request: GraphqlRequest,
    reply: oneshot::Sender<Result<Value, QueryError>>,
}

struct Inner {
    transport: Arc<dyn GraphqlTransport>,
    window: Duration,
    pending: Mutex<Vec<Pending>>,
}

/// Query scheduler that batches when the transport allows it.
///
/// The first request of a window arms a flush; everything scheduled before
/// the flush fires travels in the same transport call. Each caller receives
/// only the result matching its own request.
///
/// Whether other requests will follow is unknown when the first one arrives,
/// so with a non-zero window even a lone request is held for the whole
/// window before it is sent on its own. A zero window only coalesces
/// requests issued in the same scheduler turn and sends a lone request
/// without waiting on the clock.
#[derive(Clone)]
pub struct QueryBatcher {
    inner: Arc<Inner>,
}

impl QueryBatcher {
    /// `window` of zero flushes after one scheduler turn.
    pub fn new(transport: Arc<dyn GraphqlTransport>, window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                window,
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    pub async fn schedule(&self, query: &str, variables: Value) -> Result<Value, QueryError> {
        let request = GraphqlRequest::new(query, variables);
        if !self.inner.transport.supports_batching() {
            return self.inner.transport.execute(request).await;
        }

        let (reply, rx) = oneshot::channel();
        let arm_flush = {
            let mut pending = mutex_lock(&self.inner.pending, SOURCE, "schedule");
            pending.push(Pending { request, reply });
            pending.len() == 1
        };

        if arm_flush {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.flush_after_window().await });
        }

        rx.await
            .unwrap_or_else(|_| Err(QueryError::Aborted("batch flush dropped".to_string())))
    }
}

impl Inner {
    async fn flush_after_window(&self) {
        if self.window.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.window).await;
        }

        let batch = std::mem::take(&mut *mutex_lock(&self.pending, SOURCE, "flush"));
        if batch.is_empty() {
            return;
        }

        histogram!(METRIC_FLUSH_SIZE).record(batch.len() as f64);

        if batch.len() == 1 {
            let Some(Pending { request, reply }) = batch.into_iter().next() else {
                return;
            };
            let _ = reply.send(self.transport.execute(request).await);
            return;
        }

        let size = batch.len();
        let (requests, replies): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|pending| (pending.request, pending.reply))
            .unzip();

        debug!(size, "flushing batched queries");
        match self.transport.execute_batch(requests).await {
            Ok(results) if results.len() == size => {
                for (reply, result) in replies.into_iter().zip(results) {
                    let _ = reply.send(result);
                }
            }
            Ok(results) => {
                warn!(
                    expected = size,
                    received = results.len(),
                    "batched response length mismatch"
                );
                let err = QueryError::decode("batch", "response count does not match requests");
                for reply in replies {
                    let _ = reply.send(Err(err.clone()));
                }
            }
            Err(err) => {
                for reply in replies {
                    let _ = reply.send(Err(err.clone()));
                }
            }
        }
    }
}
