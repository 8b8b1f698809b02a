//! # fanpoll
//!
//! Polling orchestrator: a control database queues parameterized queries
//! ("requests"); fanpoll runs each one against every remote database
//! ("point") named in a set of point-list files, bulk-loads the results into
//! the request's destination table and logs a timed outcome per
//! (request, point) pair.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌───────────┐
//! │  Batch   │──▶│  Point   │──▶│ Fan-out  │──▶│ Fan-in  │──▶│ Reconcile │
//! │  Loader  │   │ Registry │   │ (points) │ ch│ (loads) │   │  + push   │
//! └──────────┘   └──────────┘   └──────────┘   └─────────┘   └───────────┘
//!       ▲                                                          │
//!       └────────────── Poll Loop (fixed interval) ◀───────────────┘
//! ```
//!
//! - **Gatekeeper**: owns the control-store connection, retries forever
//! - **Fan-out**: bounded concurrency across points, sequential per point
//! - **Fan-in**: one loader per request, fed through a channel
//!
//! Failures isolated to a point, a (request, point) pair or a request are
//! recorded on the corresponding row; only control-store failures end an
//! iteration early.

pub mod batch;
pub mod config;
pub mod error;
pub mod fanin;
pub mod fanout;
pub mod gatekeeper;
pub mod model;
pub mod pipeline;
pub mod probe;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod store;
pub mod testing;

pub use config::PollerConfig;
pub use error::{PollError, Result};
pub use gatekeeper::Gatekeeper;
pub use pipeline::{IterationSummary, Pipeline};
pub use probe::{Prober, TcpProber};
pub use retry::RetryPolicy;
pub use runner::{IterationResult, PollRunner, RunnerState};
pub use store::{ControlStore, SqlControlStore};
