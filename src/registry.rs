//! Cache Registry
//!
//! Tracks every named, resizable cache and pushes size factors to them.
//!
//! # Lifecycle
//!
//! ```text
//! register("get_users", cb) ──▶ stored (no config yet: no resize)
//!                 │
//! install(config) ┴──▶ resize_all() ──▶ cb(factor) for every entry
//!                 │
//! register("events", cb) ──▶ stored ──▶ cb(factor) for "events" only
//! ```
//!
//! Installs, registrations and resets are serialized by a reentrant apply
//! lock, so a cache always ends on the factor of the latest installed
//! configuration. Callbacks run without the map and state locks held, and
//! the apply lock is reentrant, so a callback may read back from the
//! registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use crate::env::{Environment, DEFAULT_ENV_PREFIX, FALLBACK_CACHE_FACTOR};
use crate::error::Result;
use crate::metrics::SizingMetrics;

/// Callback through which a cache receives its new size factor
pub type ResizeCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Normalize a cache name into its registry key
pub fn normalize_cache_name(name: &str) -> String {
    name.to_lowercase()
}

// =============================================================================
// Effective Configuration
// =============================================================================

/// Fully resolved sizing configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveSizingConfig {
    /// Factor for caches without an override
    pub global_factor: f64,
    /// Overrides keyed by normalized cache name
    pub per_cache_factors: BTreeMap<String, f64>,
}

impl EffectiveSizingConfig {
    /// Config with only a global factor
    pub fn with_global(global_factor: f64) -> Self {
        Self {
            global_factor,
            per_cache_factors: BTreeMap::new(),
        }
    }

    /// Factor that applies to `name`
    pub fn factor_for(&self, name: &str) -> f64 {
        self.per_cache_factors
            .get(&normalize_cache_name(name))
            .copied()
            .unwrap_or(self.global_factor)
    }
}

// =============================================================================
// Registry
// =============================================================================

struct SizingState {
    /// Baseline factor for caches created before the next load
    default_factor: f64,
    /// Configuration applied to every registration, once loaded
    installed: Option<Arc<EffectiveSizingConfig>>,
}

/// Registry of resizable caches.
///
/// Shared as `Arc<CacheRegistry>` between cache constructors and the
/// sizing coordinator.
pub struct CacheRegistry {
    env_prefix: String,
    caches: RwLock<BTreeMap<String, ResizeCallback>>,
    state: RwLock<SizingState>,
    /// Serializes config swaps with the resizes that follow them
    apply_lock: ReentrantMutex<()>,
    metrics: Option<Arc<SizingMetrics>>,
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheRegistry {
    /// Create a registry with the fallback default factor
    pub fn new() -> Self {
        Self::with_default_factor(DEFAULT_ENV_PREFIX, FALLBACK_CACHE_FACTOR)
    }

    /// Create a registry seeded from the environment using the default prefix
    pub fn from_env(env: &Environment) -> Result<Self> {
        Self::from_env_with_prefix(env, DEFAULT_ENV_PREFIX)
    }

    /// Create a registry seeded from the environment using `prefix`
    pub fn from_env_with_prefix(env: &Environment, prefix: &str) -> Result<Self> {
        let default_factor = env.default_factor(prefix)?;
        Ok(Self::with_default_factor(prefix, default_factor))
    }

    fn with_default_factor(prefix: &str, default_factor: f64) -> Self {
        Self {
            env_prefix: prefix.to_string(),
            caches: RwLock::new(BTreeMap::new()),
            state: RwLock::new(SizingState {
                default_factor,
                installed: None,
            }),
            apply_lock: ReentrantMutex::new(()),
            metrics: None,
        }
    }

    /// Attach metrics that record every resize
    pub fn with_metrics(mut self, metrics: Arc<SizingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Environment variable prefix this registry reads factors from
    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    /// Attached metrics, if any
    pub fn metrics(&self) -> Option<&Arc<SizingMetrics>> {
        self.metrics.as_ref()
    }

    /// Register a cache under `name`, replacing any previous registration.
    ///
    /// If a configuration is installed, the callback is invoked once with
    /// this cache's factor before returning.
    pub fn register<F>(&self, name: &str, callback: F)
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let key = normalize_cache_name(name);
        let callback: ResizeCallback = Arc::new(callback);
        let _apply = self.apply_guard();

        let count = {
            let mut caches = self.caches.write();
            caches.insert(key.clone(), Arc::clone(&callback));
            caches.len()
        };
        if let Some(metrics) = &self.metrics {
            metrics.set_registered_caches(count);
        }
        debug!(cache = %key, "Registered resizable cache");

        let installed = self.state.read().installed.clone();
        if let Some(config) = installed {
            self.apply(&key, &callback, config.factor_for(&key));
        }
    }

    /// Install a new configuration and apply it to every registered cache.
    ///
    /// The configuration's global factor becomes the new default factor.
    /// Returns the number of caches resized.
    pub fn install(&self, config: EffectiveSizingConfig) -> usize {
        let _apply = self.apply_guard();
        {
            let mut state = self.state.write();
            state.default_factor = config.global_factor;
            state.installed = Some(Arc::new(config));
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_config_load();
        }

        let resized = self.resize_all();
        info!(caches = resized, "Applied cache sizing configuration");
        resized
    }

    /// Re-apply the installed configuration to every registered cache.
    ///
    /// Returns the number of callbacks invoked (zero if nothing is installed).
    pub fn resize_all(&self) -> usize {
        let _apply = self.apply_guard();
        let Some(config) = self.state.read().installed.clone() else {
            return 0;
        };
        let entries: Vec<(String, ResizeCallback)> = self
            .caches
            .read()
            .iter()
            .map(|(name, cb)| (name.clone(), Arc::clone(cb)))
            .collect();

        for (name, callback) in &entries {
            self.apply(name, callback, config.factor_for(name));
        }
        entries.len()
    }

    /// Clear all registrations and the installed configuration, and
    /// re-derive the default factor from `env`.
    ///
    /// Intended for tests that share a registry.
    pub fn reset(&self, env: &Environment) -> Result<()> {
        let default_factor = env.default_factor(&self.env_prefix)?;
        let _apply = self.apply_guard();

        self.caches.write().clear();
        {
            let mut state = self.state.write();
            state.default_factor = default_factor;
            state.installed = None;
        }
        if let Some(metrics) = &self.metrics {
            metrics.clear();
        }
        debug!(default_factor, "Reset cache registry");
        Ok(())
    }

    /// Baseline factor for caches created now
    pub fn default_factor(&self) -> f64 {
        self.state.read().default_factor
    }

    /// Currently installed configuration
    pub fn effective_config(&self) -> Option<Arc<EffectiveSizingConfig>> {
        self.state.read().installed.clone()
    }

    /// Factor `name` would receive right now: its configured factor if a
    /// configuration is installed, otherwise the default factor.
    pub fn factor_for(&self, name: &str) -> f64 {
        let state = self.state.read();
        match &state.installed {
            Some(config) => config.factor_for(name),
            None => state.default_factor,
        }
    }

    /// Whether a cache is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.caches.read().contains_key(&normalize_cache_name(name))
    }

    /// Registered cache names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    /// Number of registered caches
    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    /// Whether no caches are registered
    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    /// Hold off other installs and registrations until the guard drops.
    ///
    /// Reentrant: the holding thread may still register or install.
    pub(crate) fn apply_guard(&self) -> ReentrantMutexGuard<'_, ()> {
        self.apply_lock.lock()
    }

    fn apply(&self, name: &str, callback: &ResizeCallback, factor: f64) {
        debug!(cache = %name, factor, "Resizing cache");
        callback(factor);
        if let Some(metrics) = &self.metrics {
            metrics.record_resize(name, factor);
        }
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CacheRegistry")
            .field("env_prefix", &self.env_prefix)
            .field("caches", &self.caches.read().len())
            .field("default_factor", &state.default_factor)
            .field("installed", &state.installed)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
