//! Observability and Metrics
//!
//! Process-wide counters for connections, packet dispatch, hooks and
//! module lifecycle. Uses atomic counters so any relay task can record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for proxy operations
#[derive(Debug)]
pub struct Metrics {
    /// Total client connections accepted
    pub connections_total: AtomicU64,
    /// Currently relaying connections
    pub connections_active: AtomicU64,
    /// Connections that failed before or while relaying
    pub connection_errors: AtomicU64,
    /// Packets run through the dispatch pipeline
    pub packets_handled: AtomicU64,
    /// Packets dropped by a hook
    pub packets_silenced: AtomicU64,
    /// Packets whose bytes changed in the pipeline
    pub packets_modified: AtomicU64,
    /// Packets injected with `write`
    pub packets_synthetic: AtomicU64,
    /// Hook callbacks invoked
    pub hook_invocations: AtomicU64,
    /// Hook callbacks that failed (error, panic, decode or encode)
    pub hook_errors: AtomicU64,
    /// Modules constructed
    pub mods_loaded: AtomicU64,
    /// Modules whose construction failed
    pub mods_failed: AtomicU64,
    /// Bytes forwarded to the client
    pub bytes_to_client: AtomicU64,
    /// Bytes forwarded to the server
    pub bytes_to_server: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            packets_handled: AtomicU64::new(0),
            packets_silenced: AtomicU64::new(0),
            packets_modified: AtomicU64::new(0),
            packets_synthetic: AtomicU64::new(0),
            hook_invocations: AtomicU64::new(0),
            hook_errors: AtomicU64::new(0),
            mods_loaded: AtomicU64::new(0),
            mods_failed: AtomicU64::new(0),
            bytes_to_client: AtomicU64::new(0),
            bytes_to_server: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a connection error
    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one pass through the pipeline
    pub fn packet_handled(&self, synthetic: bool, modified: bool, silenced: bool) {
        self.packets_handled.fetch_add(1, Ordering::Relaxed);
        if synthetic {
            self.packets_synthetic.fetch_add(1, Ordering::Relaxed);
        }
        if modified {
            self.packets_modified.fetch_add(1, Ordering::Relaxed);
        }
        if silenced {
            self.packets_silenced.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a hook invocation
    pub fn hook_invoked(&self) {
        self.hook_invocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed hook
    pub fn hook_failed(&self) {
        self.hook_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a module construction
    pub fn mod_loaded(&self) {
        self.mods_loaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed module construction
    pub fn mod_failed(&self) {
        self.mods_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes forwarded in one direction
    pub fn bytes_relayed(&self, incoming: bool, byte_count: u64) {
        if incoming {
            self.bytes_to_client.fetch_add(byte_count, Ordering::Relaxed);
        } else {
            self.bytes_to_server.fetch_add(byte_count, Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            packets_handled: self.packets_handled.load(Ordering::Relaxed),
            packets_silenced: self.packets_silenced.load(Ordering::Relaxed),
            packets_modified: self.packets_modified.load(Ordering::Relaxed),
            packets_synthetic: self.packets_synthetic.load(Ordering::Relaxed),
            hook_invocations: self.hook_invocations.load(Ordering::Relaxed),
            hook_errors: self.hook_errors.load(Ordering::Relaxed),
            mods_loaded: self.mods_loaded.load(Ordering::Relaxed),
            mods_failed: self.mods_failed.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
            bytes_to_server: self.bytes_to_server.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connection_errors = snapshot.connection_errors,
            packets_handled = snapshot.packets_handled,
            packets_silenced = snapshot.packets_silenced,
            packets_modified = snapshot.packets_modified,
            packets_synthetic = snapshot.packets_synthetic,
            hook_invocations = snapshot.hook_invocations,
            hook_errors = snapshot.hook_errors,
            mods_loaded = snapshot.mods_loaded,
            mods_failed = snapshot.mods_failed,
            bytes_to_client = snapshot.bytes_to_client,
            bytes_to_server = snapshot.bytes_to_server,
            uptime_seconds = snapshot.uptime_seconds,
            "Proxy metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connection_errors: u64,
    pub packets_handled: u64,
    pub packets_silenced: u64,
    pub packets_modified: u64,
    pub packets_synthetic: u64,
    pub hook_invocations: u64,
    pub hook_errors: u64,
    pub mods_loaded: u64,
    pub mods_failed: u64,
    pub bytes_to_client: u64,
    pub bytes_to_server: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

/// Logs the elapsed time of an operation when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_ms = self.elapsed_ms(),
            "Operation completed"
        );
    }
}
