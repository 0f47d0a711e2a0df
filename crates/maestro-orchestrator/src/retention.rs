use crate::engine::WorkflowEngine;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Background loop that periodically evicts terminal workflows and
/// executions past the engine's retention window.
///
/// Live records are never touched; the sweeper only reclaims memory for
/// runs that already settled.
pub struct RetentionSweeper {
    engine: Arc<WorkflowEngine>,
}

impl RetentionSweeper {
    /// Attach a sweeper to an engine.
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    /// Start the sweep loop, ticking at the engine's configured interval.
    /// Aborting the returned handle stops it.
    pub fn start(self) -> JoinHandle<()> {
        let interval = self.engine.config().sweep_interval;
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh engine
            // is not swept at startup.
            timer.tick().await;
            loop {
                timer.tick().await;
                let evicted = self.engine.sweep_expired().await;
                debug!(evicted, "retention sweep completed");
            }
        })
    }
}
