//! cachetune - Runtime-Tunable Cache Sizing
//!
//! Caches register a resize callback under a name; a sizing coordinator
//! resolves a size factor for every name from layered configuration and
//! pushes it to each cache, both on every configuration load and on every
//! later registration.
//!
//! # Architecture
//!
//! ```text
//! YAML document ─┐
//!                ├─▶ SizingCoordinator ──install──▶ CacheRegistry ──factor──▶ caches
//! Environment ───┘        (merge)                  (name → callback)
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cachetune::{CacheRegistry, Environment, ScaledCapacity, SizingCoordinator};
//!
//! let registry = Arc::new(CacheRegistry::new());
//! let users = ScaledCapacity::register(&registry, "get_users", 1000);
//!
//! let doc = serde_yaml::from_str("caches: {global_factor: 2.0}").unwrap();
//! let coordinator = SizingCoordinator::new(Arc::clone(&registry));
//! coordinator.load(&doc, &Environment::new()).unwrap();
//!
//! assert_eq!(users.capacity(), 2000);
//! ```
//!
//! # Modules
//!
//! - [`capacity`] - Ready-made resize target for cache implementations
//! - [`config`] - Configuration reading and the sizing coordinator
//! - [`env`] - Environment snapshot and prefixed overrides
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus sizing metrics
//! - [`registry`] - Registry of resizable caches

pub mod capacity;
pub mod config;
pub mod env;
pub mod error;
pub mod metrics;
pub mod registry;

// Re-export commonly used types
pub use capacity::ScaledCapacity;
pub use config::{CacheConfig, SizingCoordinator};
pub use env::Environment;
pub use error::{Error, Result};
pub use metrics::SizingMetrics;
pub use registry::{CacheRegistry, EffectiveSizingConfig};
