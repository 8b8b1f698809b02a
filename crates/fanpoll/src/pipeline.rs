//! One poll iteration
//!
//! ```text
//! load batch -> stamp requests -> bind plans -> resolve points
//!            -> fan-out || fan-in -> reconcile -> push
//! ```

use fanpoll_rdbc::connection::ConnectionFactory;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::batch::BatchLoader;
use crate::config::PollerConfig;
use crate::error::Result;
use crate::fanin::{FanIn, LoadJob};
use crate::fanout::{FanOut, FanOutSettings, RequestPlan};
use crate::model::{now, RequestId};
use crate::probe::Prober;
use crate::reconcile::Reconciler;
use crate::registry::PointRegistry;
use crate::store::ControlStore;

/// Counts describing one processed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationSummary {
    pub requests: usize,
    pub points: usize,
    pub entries: usize,
    pub failed_entries: usize,
    pub rows_loaded: u64,
    pub failed_requests: usize,
}

/// Everything one iteration needs
pub struct Pipeline {
    loader: BatchLoader,
    registry: PointRegistry,
    fan_out: FanOut,
    fan_in: FanIn,
    reconciler: Reconciler,
}

impl Pipeline {
    /// Assemble a pipeline
    pub fn new(
        store: Arc<dyn ControlStore>,
        factory: Arc<dyn ConnectionFactory>,
        prober: Arc<dyn Prober>,
        config: &PollerConfig,
        connection_template: impl Into<String>,
    ) -> Self {
        Self {
            loader: BatchLoader::new(store.clone()),
            registry: PointRegistry::new(store.clone()),
            fan_out: FanOut::new(
                factory,
                prober,
                FanOutSettings::from_config(config, connection_template),
            ),
            fan_in: FanIn::new(store.clone(), config.max_concurrent_loads),
            reconciler: Reconciler::new(store),
        }
    }

    /// Process one batch; `None` when there was no pending work
    pub async fn run_once(&self) -> Result<Option<IterationSummary>> {
        let Some(mut batch) = self.loader.load().await? else {
            return Ok(None);
        };

        let started = now();
        let ids: Vec<RequestId> = batch.requests.keys().collect();
        for id in &ids {
            batch.requests.update(*id, |r| r.started_at = Some(started));
        }

        let plans: HashMap<RequestId, RequestPlan> = batch
            .requests
            .iter()
            .map(|r| (r.id, RequestPlan::bind(r, batch.parameters_of(r.id))))
            .collect();

        let points = self.registry.resolve(&mut batch).await?;
        let entries: usize = points.iter().map(|p| p.pending.len()).sum();
        info!(
            requests = ids.len(),
            points = points.len(),
            entries,
            "processing batch"
        );

        let mut senders = HashMap::with_capacity(ids.len());
        let mut jobs = Vec::with_capacity(ids.len());
        for request in batch.requests.iter() {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(request.id, tx);
            jobs.push(LoadJob {
                request: request.id,
                destination: request.destination.clone(),
                batches: rx,
            });
        }

        let (outcomes, loads) = tokio::join!(
            self.fan_out.run(points, Arc::new(plans), senders),
            self.fan_in.run(jobs)
        );

        let pushed = self
            .reconciler
            .reconcile(&mut batch, &outcomes, &loads)
            .await?;
        debug!(?pushed, "batch reconciled");

        let summary = IterationSummary {
            requests: ids.len(),
            points: outcomes.len(),
            entries,
            failed_entries: outcomes
                .iter()
                .flat_map(|o| o.entries.values())
                .filter(|e| e.error.is_some())
                .count(),
            rows_loaded: loads.iter().map(|l| l.rows).sum(),
            failed_requests: loads.iter().filter(|l| l.error.is_some()).count(),
        };
        info!(
            requests = summary.requests,
            points = summary.points,
            failed_entries = summary.failed_entries,
            rows = summary.rows_loaded,
            failed_requests = summary.failed_requests,
            "batch complete"
        );
        Ok(Some(summary))
    }
}
