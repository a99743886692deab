//! Metrics module
//!
//! Exposes cache sizing state in the Prometheus text format.

mod sizing;

pub use sizing::SizingMetrics;
