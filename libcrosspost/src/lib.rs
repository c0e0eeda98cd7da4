//! Crosspost - scheduled publishing pipeline for social platforms
//!
//! This library provides the core pipeline: a discovery scheduler that
//! admits due content, a durable priority queue broker, per-platform
//! worker pools with atomic rate limiting, and a retry/backoff state
//! machine over an idempotent status tracker.

pub mod broker;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod types;

// Re-export commonly used types
pub use broker::{Lane, QueueBroker};
pub use config::Config;
pub use db::Database;
pub use dispatcher::{DispatchCounts, Dispatcher};
pub use error::{CrosspostError, Result};
pub use scheduler::{AdmissionReport, Scheduler};
pub use status::StatusTracker;
pub use types::{ContentStatus, Platform, Priority, QueueMessage, ScheduledContent};
