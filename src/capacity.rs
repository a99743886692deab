//! Scaled Capacity
//!
//! A resize target a cache implementation can embed: it keeps the cache's
//! configured base capacity and the most recent size factor, and reports
//! the effective capacity as `floor(base * factor)`.
//!
//! Whole-number factors are applied with exact integer arithmetic. Other
//! factors go through `f64`, which is exact only for bases up to 2^53, so
//! larger bases may be rounded by a few units.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::registry::{normalize_cache_name, CacheRegistry};

/// Base capacity scaled by a runtime-tunable factor
#[derive(Debug)]
pub struct ScaledCapacity {
    name: String,
    base: u64,
    /// f64 bits of the current factor
    factor: AtomicU64,
}

impl ScaledCapacity {
    /// Create an unregistered capacity
    pub fn new(name: &str, base: u64, factor: f64) -> Self {
        Self {
            name: normalize_cache_name(name),
            base,
            factor: AtomicU64::new(factor.to_bits()),
        }
    }

    /// Create a capacity and register it with `registry`.
    ///
    /// Starts at the factor the registry would currently assign to `name`.
    /// The registry only holds a weak handle, so dropping every `Arc`
    /// turns later resizes into no-ops.
    pub fn register(registry: &CacheRegistry, name: &str, base: u64) -> Arc<Self> {
        let capacity = Arc::new(Self::new(name, base, registry.factor_for(name)));
        let handle: Weak<Self> = Arc::downgrade(&capacity);

        registry.register(name, move |factor| {
            if let Some(capacity) = handle.upgrade() {
                capacity.set_factor(factor);
            }
        });
        capacity
    }

    /// Normalized cache name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured capacity before scaling
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Current size factor
    pub fn factor(&self) -> f64 {
        f64::from_bits(self.factor.load(Ordering::Acquire))
    }

    /// Apply a new size factor
    pub fn set_factor(&self, factor: f64) {
        let previous = f64::from_bits(self.factor.swap(factor.to_bits(), Ordering::AcqRel));
        if previous != factor {
            debug!(
                cache = %self.name,
                previous,
                factor,
                capacity = self.capacity(),
                "Cache capacity changed"
            );
        }
    }

    /// Effective capacity: `floor(base * factor)`, clamped to `0..=u64::MAX`
    pub fn capacity(&self) -> u64 {
        let factor = self.factor();
        if factor >= 0.0 && factor.fract() == 0.0 && factor <= u64::MAX as f64 {
            let scaled = u128::from(self.base) * (factor as u128);
            return u64::try_from(scaled).unwrap_or(u64::MAX);
        }
        // float-to-int `as` saturates and maps NaN to 0
        (self.base as f64 * factor).floor() as u64
    }
}
