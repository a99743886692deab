//! Environment Snapshot
//!
//! Cache factors can be supplied through environment variables:
//!
//! ```text
//! CACHE_FACTOR=2.0              # seeds the default factor
//! CACHE_FACTOR_GET_USERS=5      # per-cache override for "get_users"
//! ```
//!
//! The snapshot is taken once and handed to the registry and the sizing
//! coordinator, so tests can inject their own variables without touching
//! the process environment.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Default environment variable prefix for cache factors
pub const DEFAULT_ENV_PREFIX: &str = "CACHE_FACTOR";

/// Factor used when neither configuration nor environment supply one
pub const FALLBACK_CACHE_FACTOR: f64 = 0.5;

/// Immutable view of a set of environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current process environment.
    ///
    /// Variables whose name or value is not valid unicode are skipped.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    /// Build an environment from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Set a variable, returning self for chaining
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Iterate over all variables in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Resolve the default cache factor from the bare `prefix` variable,
    /// falling back to [`FALLBACK_CACHE_FACTOR`].
    pub fn default_factor(&self, prefix: &str) -> Result<f64> {
        match self.get(prefix) {
            Some(value) => parse_factor(prefix, value),
            None => Ok(FALLBACK_CACHE_FACTOR),
        }
    }

    /// Collect per-cache factors from every `<prefix>_<NAME>` variable.
    ///
    /// Names are lowercased. A value that is not a number is an error.
    pub fn cache_factors(&self, prefix: &str) -> Result<BTreeMap<String, f64>> {
        let marker = format!("{}_", prefix);
        let mut factors = BTreeMap::new();

        for (key, value) in self.iter() {
            let Some(name) = key.strip_prefix(marker.as_str()) else {
                continue;
            };
            factors.insert(name.to_lowercase(), parse_factor(key, value)?);
        }

        Ok(factors)
    }
}

fn parse_factor(var: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::InvalidEnvFactor {
            var: var.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_factor_fallback() {
        let env = Environment::new();
        assert_eq!(env.default_factor(DEFAULT_ENV_PREFIX).unwrap(), 0.5);
    }

    #[test]
    fn test_default_factor_from_env() {
        let env = Environment::new().with("CACHE_FACTOR", "2");
        assert_eq!(env.default_factor("CACHE_FACTOR").unwrap(), 2.0);
    }

    #[test]
    fn test_default_factor_malformed() {
        let env = Environment::new().with("CACHE_FACTOR", "big");
        assert_matches!(
            env.default_factor("CACHE_FACTOR"),
            Err(Error::InvalidEnvFactor { var, .. }) if var == "CACHE_FACTOR"
        );
    }

    #[test]
    fn test_cache_factors_strip_prefix_and_lowercase() {
        let env = Environment::from_pairs([
            ("CACHE_FACTOR", "1.0"),
            ("CACHE_FACTOR_GET_USERS", "5"),
            ("CACHE_FACTOR_Room_Members", "0.25"),
            ("CACHE_FACTORY_SETTING", "9"),
            ("PATH", "/usr/bin"),
        ]);

        let factors = env.cache_factors("CACHE_FACTOR").unwrap();
        assert_eq!(factors.len(), 2);
        assert_eq!(factors["get_users"], 5.0);
        assert_eq!(factors["room_members"], 0.25);
    }

    #[test]
    fn test_cache_factors_malformed_value() {
        let env = Environment::new().with("CACHE_FACTOR_GET_USERS", "five");
        assert_matches!(
            env.cache_factors("CACHE_FACTOR"),
            Err(Error::InvalidEnvFactor { var, value })
                if var == "CACHE_FACTOR_GET_USERS" && value == "five"
        );
    }

    #[test]
    fn test_custom_prefix() {
        let env = Environment::new()
            .with("MYAPP_CACHE_FACTOR_EVENTS", "3")
            .with("CACHE_FACTOR_EVENTS", "7");

        let factors = env.cache_factors("MYAPP_CACHE_FACTOR").unwrap();
        assert_eq!(factors.len(), 1);
        assert_eq!(factors["events"], 3.0);
    }
}
