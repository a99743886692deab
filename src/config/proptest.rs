//! Property-Based Tests for Cache Sizing
//!
//! # Test Properties
//!
//! 1. **Global Factor**: caches without an override receive exactly the global factor
//! 2. **Override Precedence**: file overrides beat environment overrides and the global factor
//! 3. **Late Registration**: registering after a load resizes exactly once

#![cfg(test)]

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_yaml::{Mapping, Value};

use super::SizingCoordinator;
use crate::env::Environment;
use crate::registry::CacheRegistry;

// =============================================================================
// Property Strategies
// =============================================================================

fn factor_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![(0u32..100).prop_map(f64::from), 0.01f64..64.0]
}

fn cache_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,12}"
}

fn config_doc(global: Option<f64>, overrides: &BTreeMap<String, f64>) -> Value {
    let mut caches = Mapping::new();
    if let Some(g) = global {
        caches.insert(Value::from("global_factor"), Value::from(g));
    }
    let mut per_cache = Mapping::new();
    for (name, factor) in overrides {
        per_cache.insert(Value::from(name.as_str()), Value::from(*factor));
    }
    caches.insert(Value::from("per_cache_factors"), Value::Mapping(per_cache));

    let mut root = Mapping::new();
    root.insert(Value::from("caches"), Value::Mapping(caches));
    Value::Mapping(root)
}

type Calls = Arc<Mutex<Vec<f64>>>;

fn register_recorder(registry: &CacheRegistry, name: &str) -> Calls {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    registry.register(name, move |f| sink.lock().push(f));
    calls
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: every cache without an override receives the global factor once.
    #[test]
    fn prop_global_factor_applies(
        global in factor_strategy(),
        names in prop::collection::btree_set(cache_name_strategy(), 1..8),
    ) {
        let registry = Arc::new(CacheRegistry::new());
        let recorders: Vec<Calls> = names
            .iter()
            .map(|n| register_recorder(&registry, n))
            .collect();

        let coordinator = SizingCoordinator::new(Arc::clone(&registry));
        coordinator.load(&config_doc(Some(global), &BTreeMap::new()), &Environment::new())?;

        for calls in recorders {
            prop_assert_eq!(calls.lock().clone(), vec![global]);
        }
    }

    /// Property: a file override wins over the environment and the global factor,
    /// regardless of the case used for the name.
    #[test]
    fn prop_file_override_wins(
        name in cache_name_strategy(),
        global in factor_strategy(),
        file_factor in factor_strategy(),
        env_factor in factor_strategy(),
    ) {
        let registry = Arc::new(CacheRegistry::new());
        let calls = register_recorder(&registry, &name);

        let env = Environment::new()
            .with(format!("CACHE_FACTOR_{}", name.to_uppercase()), env_factor.to_string());
        let overrides = BTreeMap::from([(name.to_uppercase(), file_factor)]);

        let coordinator = SizingCoordinator::new(Arc::clone(&registry));
        coordinator.load(&config_doc(Some(global), &overrides), &env)?;

        prop_assert_eq!(calls.lock().clone(), vec![file_factor]);
    }

    /// Property: an environment override applies when the file has none.
    #[test]
    fn prop_env_override_applies(
        name in cache_name_strategy(),
        env_factor in factor_strategy(),
    ) {
        let registry = Arc::new(CacheRegistry::new());
        let env = Environment::new()
            .with(format!("CACHE_FACTOR_{}", name.to_uppercase()), env_factor.to_string());

        let coordinator = SizingCoordinator::new(Arc::clone(&registry));
        coordinator.load(&config_doc(None, &BTreeMap::new()), &env)?;

        prop_assert_eq!(registry.factor_for(&name), env_factor);
    }

    /// Property: registering after a load resizes the new cache exactly once.
    #[test]
    fn prop_late_registration_resizes_once(
        name in cache_name_strategy(),
        global in factor_strategy(),
    ) {
        let registry = Arc::new(CacheRegistry::new());
        let coordinator = SizingCoordinator::new(Arc::clone(&registry));
        coordinator.load(&config_doc(Some(global), &BTreeMap::new()), &Environment::new())?;

        let calls = register_recorder(&registry, &name);

        prop_assert_eq!(calls.lock().clone(), vec![global]);
    }
}
