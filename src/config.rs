//! Server configuration from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::data::Biometrics;
use crate::services::SAMPLE_BIOMETRICS;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub registry_file: PathBuf,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    /// Biometrics used when validating a formula without a tree
    pub sample: Biometrics,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 3000,
            registry_file: PathBuf::from("data/registry_seed.json"),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 10_000,
            sample: SAMPLE_BIOMETRICS,
        }
    }
}

/// Parse `raw`, falling back to `default` (with a warning) when unparseable
fn parse_or<T: FromStr + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}, using {}", key, value, default);
            default
        }),
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ServerConfig::default();

        let sample_dap = parse_or("SAMPLE_DAP", lookup("SAMPLE_DAP"), defaults.sample.dap);
        let sample_altura = parse_or("SAMPLE_ALTURA", lookup("SAMPLE_ALTURA"), defaults.sample.altura);
        let sample = if sample_dap > 0.0 && sample_altura > 0.0 {
            Biometrics { dap: sample_dap, altura: sample_altura }
        } else {
            tracing::warn!("Sample biometrics must be positive, using defaults");
            defaults.sample
        };

        ServerConfig {
            port: parse_or("PORT", lookup("PORT"), defaults.port),
            registry_file: lookup("REGISTRY_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.registry_file),
            cache_ttl: Duration::from_secs(parse_or(
                "CACHE_TTL_SECS",
                lookup("CACHE_TTL_SECS"),
                defaults.cache_ttl.as_secs(),
            )),
            cache_capacity: parse_or("CACHE_CAPACITY", lookup("CACHE_CAPACITY"), defaults.cache_capacity),
            sample,
        }
    }
}
