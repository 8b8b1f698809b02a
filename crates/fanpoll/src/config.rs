//! Configuration for the poller
//!
//! Every field has a default, so the poller runs without a config file. A
//! YAML file may override any of them; `${VAR}` and `${VAR:-default}` are
//! expanded from the environment before parsing.
//!
//! ```yaml
//! poll_interval_secs: 60
//! point_concurrency: 15
//! max_concurrent_loads: 8
//! point_connection_template: "Server={0};Database=telemetry;TrustServerCertificate=true"
//! probe:
//!   attempts: 3
//!   timeout_ms: 2000
//! control:
//!   procedure: ${FANPOLL_PROCEDURE:-getRequestData}
//! ```

use fanpoll_rdbc::security::{validate_object_name, validate_sql_identifier};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{PollError, Result};

/// Pre-compiled regex for environment variable expansion
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("ENV_VAR_REGEX is a valid regex pattern")
});

/// Largest row-value list a single INSERT accepts
pub const MAX_INSERT_CHUNK: usize = 1000;

/// Top-level poller configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollerConfig {
    /// Seconds between poll iterations
    pub poll_interval_secs: u64,

    /// Seconds between control-store connection attempts
    pub reconnect_delay_secs: u64,

    /// Points executed concurrently
    pub point_concurrency: usize,

    /// Destination loads running concurrently (unset = one per request)
    pub max_concurrent_loads: Option<usize>,

    /// Per-query timeout at points
    pub query_timeout_secs: u64,

    /// Connection open timeout (control store and points)
    pub connect_timeout_secs: u64,

    /// Reachability probe settings
    pub probe: ProbeConfig,

    /// (reqId, pointId) pairs per log-row INSERT
    pub insert_chunk_size: usize,

    /// Point connection string; `{0}` (or `{addr}`) is replaced with the
    /// point address. Read from the control store when unset.
    pub point_connection_template: Option<String>,

    /// Names of control-store objects
    pub control: ControlConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            reconnect_delay_secs: 60,
            point_concurrency: 15,
            max_concurrent_loads: None,
            query_timeout_secs: 300,
            connect_timeout_secs: 30,
            probe: ProbeConfig::default(),
            insert_chunk_size: MAX_INSERT_CHUNK,
            point_connection_template: None,
            control: ControlConfig::default(),
        }
    }
}

/// Reachability probe settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Probe attempts before a point is considered unreachable
    pub attempts: u32,
    /// Timeout of a single attempt
    pub timeout_ms: u64,
    /// Port probed when the address does not name one
    pub port: u16,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout_ms: 2000,
            port: 1433,
        }
    }
}

impl ProbeConfig {
    /// Timeout of a single attempt
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Names of the control-store objects the poller talks to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Procedure returning the pending batch
    pub procedure: String,
    /// Table of (request, point) log rows
    pub log_table: String,
    /// Table of requests
    pub request_table: String,
    /// Query returning the point connection template in its first column
    pub settings_query: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            procedure: "getRequestData".into(),
            log_table: "log".into(),
            request_table: "requests".into(),
            settings_query: "SELECT pointConnStrTpl FROM settings".into(),
        }
    }
}

impl PollerConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PollError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = Self::expand_env_vars(content);

        // An empty (or all-comment) file means "all defaults"
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| PollError::config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.point_concurrency == 0 {
            return Err(PollError::config("point_concurrency must be at least 1"));
        }
        if self.max_concurrent_loads == Some(0) {
            return Err(PollError::config("max_concurrent_loads must be at least 1"));
        }
        if self.probe.attempts == 0 {
            return Err(PollError::config("probe.attempts must be at least 1"));
        }
        if self.insert_chunk_size == 0 || self.insert_chunk_size > MAX_INSERT_CHUNK {
            return Err(PollError::config(format!(
                "insert_chunk_size must be between 1 and {}",
                MAX_INSERT_CHUNK
            )));
        }
        if let Some(template) = &self.point_connection_template {
            if !template.contains("{0}") && !template.contains("{addr}") {
                return Err(PollError::config(
                    "point_connection_template must contain {0} or {addr}",
                ));
            }
        }

        validate_sql_identifier(&self.control.procedure).map_err(|e| {
            PollError::config(format!("control.procedure: {}", e))
        })?;
        validate_object_name(&self.control.log_table)
            .map_err(|e| PollError::config(format!("control.log_table: {}", e)))?;
        validate_object_name(&self.control.request_table)
            .map_err(|e| PollError::config(format!("control.request_table: {}", e)))?;
        if self.control.settings_query.trim().is_empty() {
            return Err(PollError::config("control.settings_query cannot be empty"));
        }

        Ok(())
    }

    /// Interval between poll iterations
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Delay between control-store connection attempts
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Per-query timeout at points
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Connection open timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
