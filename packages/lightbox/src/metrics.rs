//! Server metrics for observability
//!
//! Runtime counters for monitoring the share service.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    // Transfer metrics
    /// Uploads accepted into the blob store
    pub uploads_stored: AtomicU64,
    /// Total payload bytes accepted
    pub upload_bytes_stored: AtomicU64,
    /// Search requests answered
    pub searches_served: AtomicU64,
    /// Archives bundled and sent
    pub archives_built: AtomicU64,
    /// Total archive bytes sent
    pub archive_bytes_sent: AtomicU64,

    // Error metrics
    /// Error messages sent to clients
    pub client_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    // Transfer tracking
    pub fn upload_stored(&self, bytes: usize) {
        self.uploads_stored.fetch_add(1, Ordering::Relaxed);
        self.upload_bytes_stored
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn search_served(&self) {
        self.searches_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn archive_built(&self, bytes: usize) {
        self.archives_built.fetch_add(1, Ordering::Relaxed);
        self.archive_bytes_sent
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    // Error tracking
    pub fn client_error(&self) {
        self.client_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            transfers: TransferMetrics {
                uploads: self.uploads_stored.load(Ordering::Relaxed),
                upload_bytes: self.upload_bytes_stored.load(Ordering::Relaxed),
                searches: self.searches_served.load(Ordering::Relaxed),
                archives: self.archives_built.load(Ordering::Relaxed),
                archive_bytes: self.archive_bytes_sent.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                client: self.client_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Point-in-time snapshot of server metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub transfers: TransferMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferMetrics {
    pub uploads: u64,
    pub upload_bytes: u64,
    pub searches: u64,
    pub archives: u64,
    pub archive_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub client: u64,
}

/// Health check response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub sessions: usize,
    pub blobs: usize,
    pub connections: u64,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_counters_track_open_and_close() {
        let metrics = ServerMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.active, 1);
        assert_eq!(snapshot.connections.total, 2);
    }

    #[test]
    fn transfer_counters_accumulate_bytes() {
        let metrics = ServerMetrics::new();
        metrics.upload_stored(100);
        metrics.upload_stored(50);
        metrics.search_served();
        metrics.archive_built(400);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transfers.uploads, 2);
        assert_eq!(snapshot.transfers.upload_bytes, 150);
        assert_eq!(snapshot.transfers.searches, 1);
        assert_eq!(snapshot.transfers.archives, 1);
        assert_eq!(snapshot.transfers.archive_bytes, 400);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let metrics = ServerMetrics::new();
        metrics.client_error();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("uptime_secs"));
        assert!(json.contains("upload_bytes"));
    }
}
