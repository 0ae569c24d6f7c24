//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.
//! The host application exposes `REGISTRY` however it serves metrics.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Federation transport
    pub static ref FEDERATION_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pubwire_federation_requests_total", "Total number of federation HTTP requests"),
        &["direction", "status"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "pubwire_federation_request_duration_seconds",
            "Federation HTTP request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 100.0]),
        &["direction"]
    ).expect("metric can be created");

    // Delivery pipeline
    pub static ref ACTIVITIES_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pubwire_activities_sent_total", "Total number of activities dispatched"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pubwire_deliveries_total", "Per-inbox delivery attempts"),
        &["outcome"]
    ).expect("metric can be created");

    // Actor resolution
    pub static ref ACTOR_RESOLUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pubwire_actor_resolutions_total", "Remote actor resolution attempts"),
        &["outcome"]
    ).expect("metric can be created");

    // Caches
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pubwire_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pubwire_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");
}

/// Register all instruments with the global registry.
///
/// Call once at startup; duplicate registration is ignored so embedding
/// tests can call it repeatedly.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(FEDERATION_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(FEDERATION_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVITIES_SENT_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DELIVERIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ACTOR_RESOLUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_HITS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_MISSES_TOTAL.clone()));
}
