//! Control-store connection gatekeeper
//!
//! Owns the one shared control-store connection. Opening never gives up
//! under the default policy: each failure is logged and retried after the
//! policy delay.

use fanpoll_rdbc::connection::{
    redact_connection_string, Connection, ConnectionConfig, ConnectionFactory,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::retry::RetryPolicy;

/// Owner of the shared control-store connection
pub struct Gatekeeper {
    factory: Arc<dyn ConnectionFactory>,
    config: ConnectionConfig,
    policy: RetryPolicy,
    current: Mutex<Option<Arc<dyn Connection>>>,
}

impl Gatekeeper {
    /// Create a gatekeeper; nothing is opened until first use
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        config: ConnectionConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            factory,
            config,
            policy,
            current: Mutex::new(None),
        }
    }

    /// Return the open connection, (re)opening it if needed
    pub async fn ensure_open(&self) -> Result<Arc<dyn Connection>> {
        let mut current = self.current.lock().await;
        if let Some(conn) = current.as_ref() {
            if conn.is_valid().await {
                return Ok(conn.clone());
            }
            debug!("control connection is no longer valid");
        }

        let conn: Arc<dyn Connection> = Arc::from(
            self.policy
                .run("open control connection", || self.factory.connect(&self.config))
                .await?,
        );
        info!(
            target = %redact_connection_string(&self.config.url),
            "control connection open"
        );
        *current = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the current connection and open a new one
    pub async fn reconnect(&self) -> Result<Arc<dyn Connection>> {
        let previous = self.current.lock().await.take();
        if let Some(conn) = previous {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "closing stale control connection failed");
            }
        }
        self.ensure_open().await
    }

    /// Open an additional connection to the control store, without retry
    ///
    /// The caller owns the connection and closes it when done.
    pub async fn open_private(&self) -> Result<Box<dyn Connection>> {
        Ok(self.factory.connect(&self.config).await?)
    }
}
