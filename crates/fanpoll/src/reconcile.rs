//! Reconciliation
//!
//! Runs strictly after fan-out and fan-in have both finished: point outcomes
//! are merged into the log rows, load outcomes into the requests, and the
//! modified rows of both are written back.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::batch::Batch;
use crate::error::Result;
use crate::fanin::LoadOutcome;
use crate::fanout::PointOutcome;
use crate::model::{now, LogRow, Request, RequestId};
use crate::store::ControlStore;

/// Rows written back by one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub log_rows: usize,
    pub requests: usize,
}

/// Merge worker outcomes into the batch's rows
pub fn apply(batch: &mut Batch, points: &[PointOutcome], loads: &[LoadOutcome]) {
    for outcome in points {
        for entry in outcome.entries.values() {
            let found = batch.log.update(entry.log_row_id, |row| {
                row.started_at = entry.started_at;
                row.finished_at = entry.finished_at;
                row.error = entry.error.clone();
            });
            if !found {
                warn!(log_row_id = entry.log_row_id, point = %outcome.point, "outcome for unknown log row");
            }
        }
    }

    let load_errors: HashMap<RequestId, &str> = loads
        .iter()
        .filter_map(|load| load.error.as_deref().map(|e| (load.request, e)))
        .collect();

    let finished = now();
    let ids: Vec<RequestId> = batch.requests.keys().collect();
    for id in ids {
        batch.requests.update(id, |request| {
            request.finished_at = Some(finished);
            if let Some(error) = load_errors.get(&id) {
                request.error = Some((*error).to_string());
            }
        });
    }
}

/// Write back log rows and requests modified since loading
pub async fn push(store: &dyn ControlStore, batch: &Batch) -> Result<PushSummary> {
    let log_rows: Vec<LogRow> = batch.log.modified().cloned().collect();
    let requests: Vec<Request> = batch.requests.modified().cloned().collect();

    store.update_log_rows(&log_rows).await?;
    store.update_requests(&requests).await?;
    debug!(log_rows = log_rows.len(), requests = requests.len(), "pushed batch state");

    Ok(PushSummary {
        log_rows: log_rows.len(),
        requests: requests.len(),
    })
}

/// Merges outcomes and persists them to the control store
pub struct Reconciler {
    store: Arc<dyn ControlStore>,
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(store: Arc<dyn ControlStore>) -> Self {
        Self { store }
    }

    /// Apply outcomes to the batch and push the changes
    pub async fn reconcile(
        &self,
        batch: &mut Batch,
        points: &[PointOutcome],
        loads: &[LoadOutcome],
    ) -> Result<PushSummary> {
        apply(batch, points, loads);
        push(&*self.store, batch).await
    }
}
