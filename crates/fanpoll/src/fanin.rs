//! Fan-in loader
//!
//! One worker per request drains the request's channel and bulk-loads each
//! batch into the request's destination table as it arrives. The first
//! request loads over the shared control connection; every other request
//! opens a private one so loads run in parallel.

use fanpoll_rdbc::connection::Connection;
use fanpoll_rdbc::security::validate_object_name;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{PollError, Result};
use crate::fanout::BatchReceiver;
use crate::model::RequestId;
use crate::store::ControlStore;

/// A request's destination and the channel feeding it
#[derive(Debug)]
pub struct LoadJob {
    pub request: RequestId,
    pub destination: String,
    pub batches: BatchReceiver,
}

/// What a request's load did
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub request: RequestId,
    pub rows: u64,
    /// Last load failure, if any
    pub error: Option<String>,
}

enum OutputConnection {
    Shared(Arc<dyn Connection>),
    Private(Box<dyn Connection>),
}

impl OutputConnection {
    fn get(&self) -> &dyn Connection {
        match self {
            Self::Shared(conn) => conn.as_ref(),
            Self::Private(conn) => conn.as_ref(),
        }
    }

    async fn release(self) {
        if let Self::Private(conn) = self {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "closing load connection failed");
            }
        }
    }
}

/// Loads result batches into destination tables
pub struct FanIn {
    store: Arc<dyn ControlStore>,
    max_concurrent: Option<usize>,
}

impl FanIn {
    /// Create a loader; `max_concurrent` caps parallel loads (None = one per request)
    pub fn new(store: Arc<dyn ControlStore>, max_concurrent: Option<usize>) -> Self {
        Self {
            store,
            max_concurrent,
        }
    }

    /// Load every job's batches until its channel closes
    ///
    /// The first job uses the shared connection.
    pub async fn run(&self, jobs: Vec<LoadJob>) -> Vec<LoadOutcome> {
        let semaphore = self
            .max_concurrent
            .map(|cap| Arc::new(Semaphore::new(cap.max(1))));
        let mut workers = JoinSet::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            let request = job.request;

            workers.spawn(async move {
                let _permit = match semaphore {
                    Some(s) => s.acquire_owned().await.ok(),
                    None => None,
                };
                match tokio::spawn(load_request(store, index == 0, job)).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(request, error = %e, "load worker died");
                        LoadOutcome {
                            request,
                            rows: 0,
                            error: Some(PollError::Worker(e.to_string()).to_string()),
                        }
                    }
                }
            });
        }

        let mut outcomes = Vec::with_capacity(workers.len());
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "load supervisor died"),
            }
        }

        let rows: u64 = outcomes.iter().map(|o| o.rows).sum();
        info!(requests = outcomes.len(), rows, "fan-in complete");
        outcomes
    }
}

async fn acquire(store: &dyn ControlStore, shared: bool) -> Result<OutputConnection> {
    if shared {
        Ok(OutputConnection::Shared(store.shared_connection().await?))
    } else {
        Ok(OutputConnection::Private(store.open_connection().await?))
    }
}

async fn load_request(store: Arc<dyn ControlStore>, shared: bool, job: LoadJob) -> LoadOutcome {
    let LoadJob {
        request,
        destination,
        mut batches,
    } = job;
    let mut rows = 0;
    let mut error = None;

    let conn = match validate_object_name(&destination) {
        Ok(()) => acquire(&*store, shared).await,
        Err(e) => Err(e.into()),
    };

    match conn {
        Ok(conn) => {
            while let Some(batch) = batches.recv().await {
                if batch.is_empty() {
                    continue;
                }
                match conn.get().bulk_insert(&destination, &batch).await {
                    Ok(n) => {
                        rows += n;
                        debug!(request, destination = %destination, rows = n, "batch loaded");
                    }
                    Err(e) => {
                        warn!(request, destination = %destination, error = %e, "bulk load failed");
                        error = Some(e.to_string());
                        break;
                    }
                }
            }
            conn.release().await;
        }
        Err(e) => {
            warn!(request, destination = %destination, error = %e, "cannot load request results");
            error = Some(e.to_string());
        }
    }

    LoadOutcome {
        request,
        rows,
        error,
    }
}
