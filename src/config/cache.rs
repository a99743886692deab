//! Cache Sizing Configuration
//!
//! Resolves the `caches` section of a parsed configuration document,
//! layered over environment overrides:
//!
//! ```yaml
//! event_cache_size: 10K
//! caches:
//!   global_factor: 0.5
//!   per_cache_factors:
//!     get_users_who_share_room_with_user: 2
//! ```
//!
//! Precedence for a single cache, highest first:
//!
//! 1. `caches.per_cache_factors.<name>`
//! 2. `<PREFIX>_<NAME>` environment variable
//! 3. `caches.global_factor`
//! 4. the registry's default factor (`<PREFIX>` variable, else 0.5)

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::{info, instrument};

use super::size::{parse_size, parse_size_str};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::registry::{normalize_cache_name, CacheRegistry, EffectiveSizingConfig};

/// Default for `event_cache_size`
pub const DEFAULT_EVENT_CACHE_SIZE: &str = "10K";

// =============================================================================
// Configuration
// =============================================================================

/// Validated cache configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheConfig {
    /// Event cache size in bytes
    pub event_cache_size: u64,
    /// Factor for caches without an override
    pub global_factor: f64,
    /// Merged per-cache overrides, keyed by normalized name
    pub cache_factors: BTreeMap<String, f64>,
}

impl CacheConfig {
    /// Name of the configuration section
    pub const SECTION: &'static str = "caches";

    /// Read and validate cache configuration.
    ///
    /// `default_factor` is used when `caches.global_factor` is absent, and
    /// `prefix` selects the environment overrides. Has no side effects.
    pub fn read(
        config: &Value,
        env: &Environment,
        default_factor: f64,
        prefix: &str,
    ) -> Result<Self> {
        let root = mapping_or_empty(config, "config")?;

        let event_cache_size = match root.and_then(|m| m.get("event_cache_size")) {
            Some(value) => parse_size(value)?,
            None => parse_size_str(DEFAULT_EVENT_CACHE_SIZE)?,
        };

        let caches = match root.and_then(|m| m.get(Self::SECTION)) {
            Some(section) => mapping_or_empty(section, Self::SECTION)?,
            None => None,
        };

        let global_factor = match caches.and_then(|c| c.get("global_factor")) {
            Some(value) => as_number(value)
                .ok_or_else(|| Error::config("caches.global_factor", "must be a number"))?,
            None => default_factor,
        };

        let mut cache_factors = env.cache_factors(prefix)?;

        let overrides = match caches.and_then(|c| c.get("per_cache_factors")) {
            Some(value) => mapping_or_empty(value, "caches.per_cache_factors")?,
            None => None,
        };

        for (key, factor) in overrides.into_iter().flatten() {
            let Value::String(name) = key else {
                return Err(Error::config(
                    "caches.per_cache_factors",
                    "keys must be strings",
                ));
            };
            let name = normalize_cache_name(name);
            let factor = as_number(factor).ok_or_else(|| {
                Error::config(
                    format!("caches.per_cache_factors.{}", name),
                    "must be a number",
                )
            })?;
            cache_factors.insert(name, factor);
        }

        Ok(Self {
            event_cache_size,
            global_factor,
            cache_factors,
        })
    }

    /// The sizing configuration to install in a registry
    pub fn sizing(&self) -> EffectiveSizingConfig {
        EffectiveSizingConfig {
            global_factor: self.global_factor,
            per_cache_factors: self.cache_factors.clone(),
        }
    }
}

/// Treat `value` as a mapping; `null` means empty, anything else is an error
fn mapping_or_empty<'a>(value: &'a Value, path: &str) -> Result<Option<&'a Mapping>> {
    match value {
        Value::Mapping(m) => Ok(Some(m)),
        Value::Null => Ok(None),
        _ => Err(Error::config(path, "must be a dictionary")),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Loads cache configuration and applies it to a [`CacheRegistry`]
pub struct SizingCoordinator {
    registry: Arc<CacheRegistry>,
    current: RwLock<Option<CacheConfig>>,
}

impl SizingCoordinator {
    /// Create a coordinator driving `registry`
    pub fn new(registry: Arc<CacheRegistry>) -> Self {
        Self {
            registry,
            current: RwLock::new(None),
        }
    }

    /// The registry this coordinator drives
    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    /// Most recently loaded configuration
    pub fn current(&self) -> Option<CacheConfig> {
        self.current.read().clone()
    }

    /// Load configuration and resize every registered cache.
    ///
    /// On error nothing is changed: the previous configuration, default
    /// factor and cache sizes all stay as they were. Concurrent loads are
    /// serialized, so [`current`](Self::current) always matches the
    /// registry's installed configuration.
    #[instrument(skip_all, fields(prefix = %self.registry.env_prefix()))]
    pub fn load(&self, config: &Value, env: &Environment) -> Result<CacheConfig> {
        let _apply = self.registry.apply_guard();
        let loaded = CacheConfig::read(
            config,
            env,
            self.registry.default_factor(),
            self.registry.env_prefix(),
        )?;

        info!(
            global_factor = loaded.global_factor,
            overrides = loaded.cache_factors.len(),
            event_cache_size = loaded.event_cache_size,
            "Loaded cache configuration"
        );

        *self.current.write() = Some(loaded.clone());
        self.registry.install(loaded.sizing());
        Ok(loaded)
    }
}

impl std::fmt::Debug for SizingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizingCoordinator")
            .field("registry", &self.registry)
            .field("current", &*self.current.read())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn read(s: &str, env: &Environment) -> Result<CacheConfig> {
        CacheConfig::read(&yaml(s), env, 0.5, "CACHE_FACTOR")
    }

    #[test]
    fn test_defaults() {
        let config = read("{}", &Environment::new()).unwrap();
        assert_eq!(config.event_cache_size, 10 * 1024);
        assert_eq!(config.global_factor, 0.5);
        assert!(config.cache_factors.is_empty());
    }

    #[test]
    fn test_empty_document() {
        let config = CacheConfig::read(&Value::Null, &Environment::new(), 1.0, "CACHE_FACTOR")
            .unwrap();
        assert_eq!(config.global_factor, 1.0);
    }

    #[test]
    fn test_global_factor_integer_and_float() {
        let env = Environment::new();
        assert_eq!(read("caches: {global_factor: 2}", &env).unwrap().global_factor, 2.0);
        assert_eq!(read("caches: {global_factor: 0.1}", &env).unwrap().global_factor, 0.1);
    }

    #[test]
    fn test_global_factor_must_be_number() {
        let err = read("caches: {global_factor: fast}", &Environment::new()).unwrap_err();
        assert_matches!(&err, Error::Configuration { path, .. } if path == "caches.global_factor");
        assert!(err.to_string().contains("must be a number"));
    }

    #[test]
    fn test_per_cache_factors_must_be_mapping() {
        let err = read("caches: {per_cache_factors: [1, 2, 3]}", &Environment::new()).unwrap_err();
        assert_matches!(&err, Error::Configuration { path, .. } if path == "caches.per_cache_factors");
        assert!(err.to_string().contains("must be a dictionary"));
    }

    #[test]
    fn test_per_cache_factor_must_be_number() {
        let err = read(
            "caches: {per_cache_factors: {Get_Users: many}}",
            &Environment::new(),
        )
        .unwrap_err();
        assert_matches!(
            err,
            Error::Configuration { path, .. } if path == "caches.per_cache_factors.get_users"
        );
    }

    #[test]
    fn test_per_cache_factor_keys_must_be_strings() {
        let err = read("caches: {per_cache_factors: {1: 2}}", &Environment::new()).unwrap_err();
        assert_matches!(
            &err,
            Error::Configuration { path, .. } if path == "caches.per_cache_factors"
        );
        assert!(err.to_string().contains("keys must be strings"));
    }

    #[test]
    fn test_per_cache_factors_null_is_empty() {
        let config = read("caches: {per_cache_factors: null}", &Environment::new()).unwrap();
        assert!(config.cache_factors.is_empty());
    }

    #[test]
    fn test_caches_section_must_be_mapping() {
        let err = read("caches: 5", &Environment::new()).unwrap_err();
        assert_matches!(err, Error::Configuration { path, .. } if path == "caches");
    }

    #[test]
    fn test_file_overrides_environment() {
        let env = Environment::new()
            .with("CACHE_FACTOR_GET_USERS", "5")
            .with("CACHE_FACTOR_EVENTS", "3");
        let config = read("caches: {per_cache_factors: {Get_Users: 2}}", &env).unwrap();

        assert_eq!(config.cache_factors["get_users"], 2.0);
        assert_eq!(config.cache_factors["events"], 3.0);
    }

    #[test]
    fn test_malformed_environment_factor() {
        let env = Environment::new().with("CACHE_FACTOR_EVENTS", "x");
        assert_matches!(read("{}", &env), Err(Error::InvalidEnvFactor { .. }));
    }

    #[test]
    fn test_event_cache_size() {
        let env = Environment::new();
        assert_eq!(read("event_cache_size: 5M", &env).unwrap().event_cache_size, 5 * 1024 * 1024);
        assert_eq!(read("event_cache_size: 100", &env).unwrap().event_cache_size, 100);
        assert_matches!(read("event_cache_size: huge", &env), Err(Error::SizeParse(_)));
    }

    #[test]
    fn test_coordinator_load_applies_and_sets_default() {
        let registry = Arc::new(CacheRegistry::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        registry.register("events", move |f| sink.lock().push(f));

        let coordinator = SizingCoordinator::new(Arc::clone(&registry));
        let loaded = coordinator
            .load(&yaml("caches: {global_factor: 3}"), &Environment::new())
            .unwrap();

        assert_eq!(loaded.global_factor, 3.0);
        assert_eq!(*calls.lock(), vec![3.0]);
        assert_eq!(registry.default_factor(), 3.0);
        assert_eq!(coordinator.current(), Some(loaded));
    }

    #[test]
    fn test_default_factor_sticks_across_loads() {
        let registry = Arc::new(CacheRegistry::new());
        let coordinator = SizingCoordinator::new(Arc::clone(&registry));
        let env = Environment::new();

        coordinator.load(&yaml("caches: {global_factor: 4}"), &env).unwrap();
        let second = coordinator.load(&yaml("{}"), &env).unwrap();

        assert_eq!(second.global_factor, 4.0);
    }

    #[test]
    fn test_concurrent_loads_agree_with_registry() {
        let registry = Arc::new(CacheRegistry::new());
        let last = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&last);
        registry.register("events", move |f| {
            if f == 1.0 {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            *sink.lock() = Some(f);
        });
        let coordinator = Arc::new(SizingCoordinator::new(Arc::clone(&registry)));

        let slow = Arc::clone(&coordinator);
        let handle = std::thread::spawn(move || {
            slow.load(&yaml("caches: {global_factor: 1}"), &Environment::new())
                .unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        coordinator
            .load(&yaml("caches: {global_factor: 2}"), &Environment::new())
            .unwrap();
        handle.join().unwrap();

        let current = coordinator.current().unwrap().global_factor;
        assert_eq!(registry.effective_config().unwrap().global_factor, current);
        assert_eq!(*last.lock(), Some(current));
    }

    #[test]
    fn test_failed_load_changes_nothing() {
        let registry = Arc::new(CacheRegistry::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        registry.register("events", move |f| sink.lock().push(f));

        let coordinator = SizingCoordinator::new(Arc::clone(&registry));
        let env = Environment::new();
        coordinator.load(&yaml("caches: {global_factor: 1}"), &env).unwrap();

        let result = coordinator.load(
            &yaml("caches: {global_factor: 9, per_cache_factors: {events: nope}}"),
            &env,
        );

        assert!(result.is_err());
        assert_eq!(registry.default_factor(), 1.0);
        assert_eq!(registry.effective_config().unwrap().global_factor, 1.0);
        assert_eq!(coordinator.current().unwrap().global_factor, 1.0);
        assert_eq!(*calls.lock(), vec![1.0]);
    }
}
