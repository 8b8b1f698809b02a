//! Poll loop
//!
//! Alternates between `Idle` (waiting out the interval) and `Processing`
//! (one batch in flight). A failed or panicked iteration is logged and
//! followed by a control-store reconnect; the loop only ends on shutdown,
//! which is honored while Idle so an in-flight batch always completes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};

use crate::pipeline::{IterationSummary, Pipeline};
use crate::store::ControlStore;

/// Poll loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Waiting for the next iteration
    Idle,
    /// A batch is in flight
    Processing,
}

/// How one iteration ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// A batch was processed
    Processed(IterationSummary),
    /// Nothing was pending
    Idle,
    /// The iteration failed and the control store was reconnected
    Failed(String),
}

/// Drives the pipeline on a fixed interval
pub struct PollRunner {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn ControlStore>,
    interval: Duration,
    state: watch::Sender<RunnerState>,
}

impl PollRunner {
    /// Create a runner
    pub fn new(pipeline: Pipeline, store: Arc<dyn ControlStore>, interval: Duration) -> Self {
        let (state, _) = watch::channel(RunnerState::Idle);
        Self {
            pipeline: Arc::new(pipeline),
            store,
            interval,
            state,
        }
    }

    /// Observe the loop state
    pub fn state(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    /// Run one iteration in its own task
    pub async fn run_iteration(&self) -> IterationResult {
        self.state.send_replace(RunnerState::Processing);

        let pipeline = self.pipeline.clone();
        let result = match tokio::spawn(async move { pipeline.run_once().await }).await {
            Ok(Ok(Some(summary))) => IterationResult::Processed(summary),
            Ok(Ok(None)) => {
                debug!("no pending work");
                IterationResult::Idle
            }
            Ok(Err(e)) => {
                error!(error = %e, "iteration failed");
                self.recover().await;
                IterationResult::Failed(e.to_string())
            }
            Err(e) => {
                error!(error = %e, "iteration panicked");
                self.recover().await;
                IterationResult::Failed(e.to_string())
            }
        };

        self.state.send_replace(RunnerState::Idle);
        result
    }

    async fn recover(&self) {
        info!("reconnecting to control store");
        if let Err(e) = self.store.reconnect().await {
            error!(error = %e, "reconnect failed");
        }
    }

    /// Poll until shutdown is signalled
    ///
    /// The first iteration starts immediately.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "poll loop started");
        loop {
            self.run_iteration().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => {
                    info!("poll loop stopped");
                    break;
                }
            }
        }
    }
}
