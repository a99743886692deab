//! cachetune
//!
//! Loads a cache sizing configuration and reports the factor each named
//! cache would receive.
//!
//! ```text
//! cachetune --config homeserver.yaml --cache get_users --cache events
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_yaml::Value;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cachetune::env::DEFAULT_ENV_PREFIX;
use cachetune::{CacheRegistry, Environment, SizingCoordinator, SizingMetrics};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Resolve runtime cache size factors from configuration and environment
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CACHETUNE_CONFIG")]
    config: PathBuf,

    /// Cache names to report (repeatable)
    #[arg(long = "cache")]
    caches: Vec<String>,

    /// Environment variable prefix for cache factors
    #[arg(long, env = "CACHETUNE_ENV_PREFIX", default_value = DEFAULT_ENV_PREFIX)]
    env_prefix: String,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Print Prometheus metrics after the report
    #[arg(long)]
    print_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    event_cache_size: u64,
    global_factor: f64,
    caches: Vec<CacheReport>,
}

#[derive(Debug, Serialize)]
struct CacheReport {
    name: String,
    factor: f64,
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    let args = Args::parse();
    init_logging(&args);

    if let Err(e) = run(&args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let env = Environment::from_process();
    let metrics = Arc::new(SizingMetrics::new()?);
    let registry = Arc::new(
        CacheRegistry::from_env_with_prefix(&env, &args.env_prefix)?
            .with_metrics(Arc::clone(&metrics)),
    );

    // Record what each requested cache receives
    let reports = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for name in &args.caches {
        let sink = Arc::clone(&reports);
        let cache = name.to_lowercase();
        registry.register(name, move |factor| {
            sink.lock().push(CacheReport {
                name: cache.clone(),
                factor,
            });
        });
    }

    info!("Loading cache configuration from {}", args.config.display());
    let document = read_yaml_file(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;

    let coordinator = SizingCoordinator::new(Arc::clone(&registry));
    let loaded = coordinator.load(&document, &env)?;

    let report = Report {
        event_cache_size: loaded.event_cache_size,
        global_factor: loaded.global_factor,
        caches: std::mem::take(&mut *reports.lock()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("event_cache_size: {}", report.event_cache_size);
        println!("global_factor: {}", report.global_factor);
        for cache in &report.caches {
            println!("  {}: {}", cache.name, cache.factor);
        }
    }

    if args.print_metrics {
        print!("{}", metrics.gather_text()?);
    }

    Ok(())
}

/// Read a YAML configuration file into a document.
///
/// An empty file yields `Value::Null`, which is treated as an empty mapping.
fn read_yaml_file(path: &Path) -> cachetune::Result<Value> {
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_yaml::from_str(&contents)?)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so the report on stdout stays machine-readable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cachetune::Error;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("cachetune-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_read_yaml_file() {
        let path = temp_file(
            "full.yaml",
            "event_cache_size: 2M\ncaches:\n  global_factor: 1.5\n  per_cache_factors:\n    events: 4\n",
        );
        let document = read_yaml_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let registry = Arc::new(CacheRegistry::new());
        let coordinator = SizingCoordinator::new(Arc::clone(&registry));
        let loaded = coordinator.load(&document, &Environment::new()).unwrap();

        assert_eq!(loaded.event_cache_size, 2 * 1024 * 1024);
        assert_eq!(registry.factor_for("events"), 4.0);
        assert_eq!(registry.factor_for("other"), 1.5);
    }

    #[test]
    fn test_read_empty_yaml_file() {
        let path = temp_file("empty.yaml", "  \n");
        let document = read_yaml_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(document, Value::Null);
    }

    #[test]
    fn test_read_missing_file() {
        let result = read_yaml_file(Path::new("/nonexistent/cachetune.yaml"));
        assert_matches!(result, Err(Error::Io(_)));
    }

    #[test]
    fn test_read_malformed_yaml() {
        let path = temp_file("bad.yaml", "caches: [unclosed\n");
        let result = read_yaml_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert_matches!(result, Err(Error::Yaml(_)));
    }
}
