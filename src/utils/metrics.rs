//! Observability counters.
//!
//! Each [`Server`](crate::transport::server::Server) and
//! [`ObjectSpace`](crate::service::object_space::ObjectSpace) owns its own
//! `Metrics`; nothing here is process-global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Sockets closed at accept time because the server was full
    pub connections_rejected: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    /// Requests resolved by the object space
    pub invocations_total: AtomicU64,
    /// Requests answered with a fault
    pub invocations_faulted: AtomicU64,
    /// Inbound frames that failed to decode
    pub serialization_errors: AtomicU64,
    /// Responses dropped because their connection was gone
    pub responses_discarded: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            invocations_total: AtomicU64::new(0),
            invocations_faulted: AtomicU64::new(0),
            serialization_errors: AtomicU64::new(0),
            responses_discarded: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self, byte_count: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn message_received(&self, byte_count: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn invocation(&self, faulted: bool) {
        self.invocations_total.fetch_add(1, Ordering::Relaxed);
        if faulted {
            self.invocations_faulted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn serialization_error(&self) {
        self.serialization_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_discarded(&self) {
        self.responses_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            invocations_total: self.invocations_total.load(Ordering::Relaxed),
            invocations_faulted: self.invocations_faulted.load(Ordering::Relaxed),
            serialization_errors: self.serialization_errors.load(Ordering::Relaxed),
            responses_discarded: self.responses_discarded.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            connections_total = s.connections_total,
            connections_active = s.connections_active,
            connections_rejected = s.connections_rejected,
            messages_sent = s.messages_sent,
            messages_received = s.messages_received,
            bytes_sent = s.bytes_sent,
            bytes_received = s.bytes_received,
            invocations_total = s.invocations_total,
            invocations_faulted = s.invocations_faulted,
            serialization_errors = s.serialization_errors,
            responses_discarded = s.responses_discarded,
            uptime_seconds = s.uptime_seconds,
            "Remote space metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub invocations_total: u64,
    pub invocations_faulted: u64,
    pub serialization_errors: u64,
    pub responses_discarded: u64,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    /// Invocations that returned a value
    pub fn invocations_ok(&self) -> u64 {
        self.invocations_total.saturating_sub(self.invocations_faulted)
    }
}

/// Logs the elapsed time of an operation at debug level when dropped.
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_us = self.start.elapsed().as_micros() as u64,
            "Operation completed"
        );
    }
}
