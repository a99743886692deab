//! Sizing Metrics
//!
//! Prometheus gauges and counters describing which factor each cache was
//! last resized to, and how often configuration has been applied.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use prometheus::{Encoder, GaugeVec, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};

/// Prometheus metrics for a cache registry.
///
/// Metrics live in their own [`Registry`] so several independent cache
/// registries can coexist in one process.
pub struct SizingMetrics {
    registry: Registry,
    cache_factor: GaugeVec,
    resizes: IntCounter,
    config_loads: IntCounter,
    registered_caches: IntGauge,
    /// Label values with a live `cache_factor` series
    labelled: RwLock<BTreeSet<String>>,
}

impl SizingMetrics {
    /// Create and register all sizing metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cache_factor = GaugeVec::new(
            Opts::new(
                "cachetune_cache_factor",
                "Size factor most recently applied to each cache",
            ),
            &["cache"],
        )?;
        let resizes = IntCounter::new(
            "cachetune_resize_total",
            "Total number of resize callbacks invoked",
        )?;
        let config_loads = IntCounter::new(
            "cachetune_config_loads_total",
            "Total number of sizing configurations applied",
        )?;
        let registered_caches = IntGauge::new(
            "cachetune_registered_caches",
            "Number of caches currently registered",
        )?;

        registry.register(Box::new(cache_factor.clone()))?;
        registry.register(Box::new(resizes.clone()))?;
        registry.register(Box::new(config_loads.clone()))?;
        registry.register(Box::new(registered_caches.clone()))?;

        Ok(Self {
            registry,
            cache_factor,
            resizes,
            config_loads,
            registered_caches,
            labelled: RwLock::new(BTreeSet::new()),
        })
    }

    /// Record that `cache` was resized to `factor`
    pub fn record_resize(&self, cache: &str, factor: f64) {
        self.cache_factor.with_label_values(&[cache]).set(factor);
        self.resizes.inc();
        self.labelled.write().insert(cache.to_string());
    }

    /// Record a configuration being applied
    pub fn record_config_load(&self) {
        self.config_loads.inc();
    }

    /// Update the registered cache count
    pub fn set_registered_caches(&self, count: usize) {
        self.registered_caches.set(count as i64);
    }

    /// Drop all per-cache series and zero the registration gauge
    pub fn clear(&self) {
        self.cache_factor.reset();
        self.registered_caches.set(0);
        self.labelled.write().clear();
    }

    /// Last factor applied to `cache`, if it has been resized
    pub fn cache_factor(&self, cache: &str) -> Option<f64> {
        if !self.labelled.read().contains(cache) {
            return None;
        }
        Some(self.cache_factor.with_label_values(&[cache]).get())
    }

    /// Total resize callbacks invoked
    pub fn resize_count(&self) -> u64 {
        self.resizes.get()
    }

    /// Total configurations applied
    pub fn config_load_count(&self) -> u64 {
        self.config_loads.get()
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

impl std::fmt::Debug for SizingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizingMetrics")
            .field("resizes", &self.resizes.get())
            .field("config_loads", &self.config_loads.get())
            .field("registered_caches", &self.registered_caches.get())
            .finish()
    }
}
