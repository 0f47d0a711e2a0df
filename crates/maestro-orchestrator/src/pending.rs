use maestro_core::{MaestroError, MaestroResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, trace};

/// Outcome delivered to a waiting dispatcher: the agent's result payload or
/// its reported error string.
type Outcome = Result<Value, String>;

/// Correlates outgoing request ids to resolvers.
///
/// At most one resolver exists per request id at any time. A response for an
/// id with no resolver (already resolved, timed out, or force-failed) is
/// silently dropped.
#[derive(Clone, Default)]
pub struct PendingResponses {
    inner: Arc<RwLock<HashMap<String, oneshot::Sender<Outcome>>>>,
}

impl PendingResponses {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver for `request_id` and return the receiving half.
    pub async fn register(&self, request_id: &str) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.write().await;
        inner.insert(request_id.to_string(), tx);
        rx
    }

    /// Resolve a pending entry. Returns `false` (and drops the outcome) when
    /// no resolver is registered for the id.
    pub async fn resolve(&self, request_id: &str, outcome: Outcome) -> bool {
        let sender = {
            let mut inner = self.inner.write().await;
            inner.remove(request_id)
        };
        match sender {
            Some(tx) => {
                // A send failure means the waiter already gave up; nothing to do.
                let _ = tx.send(outcome);
                true
            }
            None => {
                trace!(request_id, "response for unknown or settled request dropped");
                false
            }
        }
    }

    /// Remove a pending entry without resolving it. The waiter observes a
    /// closed channel.
    pub async fn remove(&self, request_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.remove(request_id).is_some()
    }

    /// Number of outstanding requests.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether no requests are outstanding.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Wait for the response registered under `request_id`.
    ///
    /// Resolves to `DispatchTimeout` when the timer fires first (removing the
    /// entry), `AgentFailure` when the agent answered with an error, and
    /// `AgentUnavailable` when the entry was force-removed out from under the
    /// waiter (cancellation or agent loss).
    pub async fn await_response(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<Outcome>,
        timeout: Duration,
    ) -> MaestroResult<Value> {
        tokio::select! {
            outcome = rx => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(message)) => Err(MaestroError::AgentFailure(message)),
                Err(_) => Err(MaestroError::AgentUnavailable(request_id.to_string())),
            },
            _ = tokio::time::sleep(timeout) => {
                self.remove(request_id).await;
                debug!(request_id, ?timeout, "request timed out");
                Err(MaestroError::DispatchTimeout(request_id.to_string()))
            }
        }
    }
}
