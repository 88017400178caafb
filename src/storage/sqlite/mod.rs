//! Shared `SQLite` infrastructure.
//!
//! - `connection`: guarded connection access and pragma setup
//! - `metrics`: per-operation counters and latency histograms

mod connection;
mod metrics;

pub use connection::{acquire_lock, configure_connection};
pub use metrics::record_operation_metrics;
