//! Request metrics.
//!
//! Counters are independent atomics; per-route tallies sit behind their own
//! lock, separate from the resource and scenario stores. A route is the
//! matched scenario request line or section pattern, never a raw path.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Receiver of request/response events. Calls never fail.
pub trait MetricsSink: Send + Sync {
    fn increment_request_count(&self, route: &str);
    fn track_response(&self, route: &str, status: u16);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_request_count(&self, _route: &str) {}
    fn track_response(&self, _route: &str, _status: u16) {}
}

/// Per-route tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteStats {
    pub requests: u64,
    pub statuses: BTreeMap<u16, u64>,
}

/// Point-in-time copy of [`RequestMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub responses_total: u64,
    pub routes: BTreeMap<String, RouteStats>,
}

/// In-process metrics collector.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    requests_total: AtomicU64,
    responses_total: AtomicU64,
    routes: RwLock<HashMap<String, RouteStats>>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total responses tracked.
    pub fn total_responses(&self) -> u64 {
        self.responses_total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let routes = match self.routes.read() {
            Ok(routes) => routes
                .iter()
                .map(|(route, stats)| (route.clone(), stats.clone()))
                .collect(),
            Err(poisoned) => poisoned
                .get_ref()
                .iter()
                .map(|(route, stats)| (route.clone(), stats.clone()))
                .collect(),
        };
        MetricsSnapshot {
            requests_total: self.total_requests(),
            responses_total: self.total_responses(),
            routes,
        }
    }

    fn with_route(&self, route: &str, f: impl FnOnce(&mut RouteStats)) {
        let mut routes = match self.routes.write() {
            Ok(routes) => routes,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(routes.entry(route.to_string()).or_default());
    }
}

impl MetricsSink for RequestMetrics {
    fn increment_request_count(&self, route: &str) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.with_route(route, |stats| stats.requests += 1);
    }

    fn track_response(&self, route: &str, status: u16) {
        self.responses_total.fetch_add(1, Ordering::Relaxed);
        self.with_route(route, |stats| *stats.statuses.entry(status).or_insert(0) += 1);
    }
}
