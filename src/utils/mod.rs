//! # Utility Modules
//!
//! Supporting utilities shared by the relay, the pipeline and the binary.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup from [`crate::config::LoggingConfig`]
//! - **Metrics**: Thread-safe observability counters
//! - **Stack**: Backtrace filtering for hook and module failures

pub mod logging;
pub mod metrics;
pub mod stack;

pub use metrics::{global_metrics, Metrics, MetricsSnapshot};
