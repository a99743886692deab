//! Configuration module
//!
//! Turns a parsed configuration document plus environment overrides into
//! cache sizing, and applies it to a registry.

mod cache;
mod proptest;
pub mod size;

pub use cache::{CacheConfig, SizingCoordinator, DEFAULT_EVENT_CACHE_SIZE};
