//! Fan-out executor
//!
//! Runs every pending request at every point. Points run concurrently up to
//! a fixed cap; requests at one point run one after another on that point's
//! own connection.
//!
//! Each (request, point) run publishes exactly one tagged batch to the
//! request's channel, an empty one if the query failed. A point that cannot
//! be reached or connected fails all its pending entries and publishes
//! nothing. The channels close when the last point worker is done.

use fanpoll_rdbc::connection::{Connection, ConnectionConfig, ConnectionFactory};
use fanpoll_rdbc::params::{bind_named, BoundQuery};
use fanpoll_rdbc::types::{Param, ParamType};
use fanpoll_rdbc::{Table, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::PollerConfig;
use crate::error::{PollError, Result};
use crate::model::{now, LogRowId, ParamRow, Request, RequestId};
use crate::probe::{check_reachable, Prober};
use crate::registry::{LogEntry, Point};

/// Sending half of a request's output channel
pub type BatchSender = mpsc::UnboundedSender<Table>;

/// Receiving half of a request's output channel
pub type BatchReceiver = mpsc::UnboundedReceiver<Table>;

/// A request's query, bound and ready to run at any point
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub id: RequestId,
    /// Bound statement, or the reason binding failed
    pub query: std::result::Result<BoundQuery, String>,
}

impl RequestPlan {
    /// Resolve parameter types and bind them to the request's query
    ///
    /// A binding failure is kept as text and reported by every run of the
    /// request; it never affects other requests.
    pub fn bind(request: &Request, params: &[ParamRow]) -> Self {
        let query = params
            .iter()
            .map(|p| {
                ParamType::from_code(p.type_code)
                    .and_then(|ty| Param::typed(p.name.clone(), ty, p.value.clone()))
            })
            .collect::<fanpoll_rdbc::Result<Vec<_>>>()
            .and_then(|params| bind_named(&request.query, &params))
            .map_err(|e| e.to_string());

        if let Err(message) = &query {
            warn!(request = request.id, error = %message, "cannot bind request parameters");
        }
        Self {
            id: request.id,
            query,
        }
    }
}

/// Tag a result batch for its destination
///
/// The destination maps columns by ordinal: `id` (null, assigned by the
/// destination) first, then the `logRowId` that produced the rows.
pub fn tag_batch(batch: &mut Table, log_row_id: LogRowId) {
    batch.prepend_column("logRowId", Value::Int64(log_row_id));
    batch.prepend_column("id", Value::Null);
}

/// What a point did with its pending entries
#[derive(Debug, Clone)]
pub struct PointOutcome {
    pub point: String,
    pub entries: BTreeMap<RequestId, LogEntry>,
}

/// Fan-out settings
#[derive(Debug, Clone)]
pub struct FanOutSettings {
    pub concurrency: usize,
    pub probe_attempts: u32,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    /// Point connection string with `{0}` / `{addr}` placeholders
    pub connection_template: String,
}

impl FanOutSettings {
    /// Settings from configuration and the point connection template
    pub fn from_config(config: &PollerConfig, connection_template: impl Into<String>) -> Self {
        Self {
            concurrency: config.point_concurrency,
            probe_attempts: config.probe.attempts,
            connect_timeout: config.connect_timeout(),
            query_timeout: config.query_timeout(),
            connection_template: connection_template.into(),
        }
    }

    /// Connection string for a point address
    pub fn connection_string(&self, address: &str) -> String {
        self.connection_template
            .replace("{0}", address)
            .replace("{addr}", address)
    }
}

/// Runs pending work across points
pub struct FanOut {
    factory: Arc<dyn ConnectionFactory>,
    prober: Arc<dyn Prober>,
    settings: Arc<FanOutSettings>,
}

impl FanOut {
    /// Create an executor
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        prober: Arc<dyn Prober>,
        settings: FanOutSettings,
    ) -> Self {
        Self {
            factory,
            prober,
            settings: Arc::new(settings),
        }
    }

    /// Run every point's pending entries and report their outcomes
    ///
    /// `senders` is consumed: once every point worker has finished, every
    /// request's channel is closed.
    pub async fn run(
        &self,
        points: Vec<Point>,
        plans: Arc<HashMap<RequestId, RequestPlan>>,
        senders: HashMap<RequestId, BatchSender>,
    ) -> Vec<PointOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let senders = Arc::new(senders);
        let mut workers = JoinSet::new();

        for point in points {
            if point.pending.is_empty() {
                debug!(point = %point.name, "no pending work");
                continue;
            }
            let worker = PointWorker {
                factory: self.factory.clone(),
                prober: self.prober.clone(),
                settings: self.settings.clone(),
                plans: plans.clone(),
                senders: senders.clone(),
            };
            let semaphore = semaphore.clone();

            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let name = point.name.clone();
                let snapshot = point.pending.clone();

                // Run in its own task so a panic is contained to this point
                match tokio::spawn(worker.run(point)).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(point = %name, error = %e, "point worker died");
                        let message = PollError::Worker(e.to_string()).to_string();
                        let mut entries = snapshot;
                        for entry in entries.values_mut() {
                            entry.fail(message.clone());
                        }
                        PointOutcome {
                            point: name,
                            entries,
                        }
                    }
                }
            });
        }

        let mut outcomes = Vec::with_capacity(workers.len());
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "point supervisor died"),
            }
        }

        let failed = outcomes
            .iter()
            .flat_map(|o| o.entries.values())
            .filter(|e| e.error.is_some())
            .count();
        info!(points = outcomes.len(), failed_entries = failed, "fan-out complete");
        outcomes
    }
}

struct PointWorker {
    factory: Arc<dyn ConnectionFactory>,
    prober: Arc<dyn Prober>,
    settings: Arc<FanOutSettings>,
    plans: Arc<HashMap<RequestId, RequestPlan>>,
    senders: Arc<HashMap<RequestId, BatchSender>>,
}

impl PointWorker {
    async fn run(self, mut point: Point) -> PointOutcome {
        if let Err(e) = self.execute(&mut point).await {
            let message = e.to_string();
            warn!(point = %point.name, error = %message, "point failed");
            for entry in point.pending.values_mut().filter(|e| e.finished_at.is_none()) {
                entry.fail(message.clone());
            }
        }
        PointOutcome {
            point: point.name,
            entries: point.pending,
        }
    }

    async fn execute(&self, point: &mut Point) -> Result<()> {
        let attempts = self.settings.probe_attempts;
        if !check_reachable(&*self.prober, &point.address, attempts).await {
            return Err(PollError::Unreachable {
                point: point.name.clone(),
                address: point.address.clone(),
                attempts,
            });
        }

        let config = ConnectionConfig::new(self.settings.connection_string(&point.address))
            .with_credentials(point.credentials.as_ref().clone())
            .with_connect_timeout(self.settings.connect_timeout)
            .with_query_timeout(self.settings.query_timeout);
        let conn = self.factory.connect(&config).await?;
        debug!(point = %point.name, pending = point.pending.len(), "point connected");

        for (request, entry) in point.pending.iter_mut() {
            self.run_request(&*conn, &point.name, *request, entry).await;
        }

        if let Err(e) = conn.close().await {
            debug!(point = %point.name, error = %e, "closing point connection failed");
        }
        Ok(())
    }

    async fn run_request(
        &self,
        conn: &dyn Connection,
        point: &str,
        request: RequestId,
        entry: &mut LogEntry,
    ) {
        entry.started_at = Some(now());

        let result = match self.plans.get(&request).map(|plan| &plan.query) {
            Some(Ok(bound)) => conn
                .query(&bound.sql, &bound.values)
                .await
                .map_err(|e| e.to_string()),
            Some(Err(message)) => Err(message.clone()),
            None => Err(format!("request {} is not part of this batch", request)),
        };

        let mut batch = match result {
            Ok(table) => {
                debug!(point, request, rows = table.len(), "request ran");
                table
            }
            Err(message) => {
                warn!(
                    point,
                    request,
                    log_row_id = entry.log_row_id,
                    error = %message,
                    "request failed at point"
                );
                entry.error = Some(message);
                Table::empty()
            }
        };

        tag_batch(&mut batch, entry.log_row_id);
        match self.senders.get(&request) {
            Some(tx) => {
                if tx.send(batch).is_err() {
                    debug!(point, request, "loader already stopped, batch dropped");
                }
            }
            None => debug!(point, request, "no output channel for request"),
        }

        entry.finished_at = Some(now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str) -> Request {
        Request {
            id: 1,
            query: query.into(),
            destination: "results".into(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    #[test]
    fn test_tag_batch_layout() {
        let mut batch = Table::new(["total"]).with_row(vec![Value::Int32(9)]);
        tag_batch(&mut batch, 77);

        assert_eq!(batch.columns(), &["id", "logRowId", "total"]);
        assert_eq!(
            batch.rows()[0],
            vec![Value::Null, Value::Int64(77), Value::Int32(9)]
        );
    }

    #[test]
    fn test_bind_plan() {
        let params = vec![ParamRow {
            name: "site".into(),
            type_code: 8,
            value: Value::from("12"),
        }];
        let plan = RequestPlan::bind(&request("SELECT * FROM t WHERE site = @site"), &params);
        let bound = plan.query.unwrap();
        assert_eq!(bound.values, vec![Value::Int32(12)]);

        let plan = RequestPlan::bind(&request("SELECT 1"), &[]);
        assert_eq!(plan.query.unwrap().sql, "SELECT 1");
    }

    #[test]
    fn test_bind_plan_unknown_type_code() {
        let params = vec![ParamRow {
            name: "x".into(),
            type_code: 99,
            value: Value::Int32(1),
        }];
        let plan = RequestPlan::bind(&request("SELECT @x"), &params);
        assert!(plan.query.unwrap_err().contains("99"));
    }

    #[test]
    fn test_connection_string_placeholders() {
        let settings = FanOutSettings::from_config(
            &PollerConfig::default(),
            "Server={0};Database=pos;Application Name=fanpoll@{addr}",
        );
        assert_eq!(
            settings.connection_string("10.0.0.4"),
            "Server=10.0.0.4;Database=pos;Application Name=fanpoll@10.0.0.4"
        );
    }
}
