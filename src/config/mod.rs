use crate::interceptor::logging::LogMode;
use dashmap::DashMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;

pub const WORKER_THREADS_KEY: &str = "CALLWEAVE_WORKER_THREADS";
pub const LOG_MODE_KEY: &str = "CALLWEAVE_LOG_MODE";
pub const LOG_STRIP_METADATA_KEY: &str = "CALLWEAVE_LOG_STRIP_METADATA";

/// Configuration service
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// Creates a service seeded with every environment variable
    pub fn from_env() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    /// Reads and parses a value, ignoring it (with a warning) when malformed
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring malformed config value {}={}", key, raw);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }
}

/// Process-wide options for decorators and the built-in interceptors
#[derive(Debug, Clone)]
pub struct DecoratorOptions {
    /// Threads in the pool that drives synchronous intercepted calls
    pub worker_threads: usize,
    /// Whether call records are emitted inline or awaited asynchronously
    pub log_mode: LogMode,
    /// Strip auxiliary response metadata from logged results
    pub strip_log_metadata: bool,
}

impl Default for DecoratorOptions {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            log_mode: LogMode::Async,
            strip_log_metadata: true,
        }
    }
}

impl DecoratorOptions {
    pub fn from_config(config: &ConfigService) -> Self {
        let defaults = Self::default();
        Self {
            worker_threads: config
                .get_parsed::<usize>(WORKER_THREADS_KEY)
                .filter(|threads| *threads > 0)
                .unwrap_or(defaults.worker_threads),
            log_mode: config
                .get_parsed(LOG_MODE_KEY)
                .unwrap_or(defaults.log_mode),
            strip_log_metadata: config
                .get_parsed(LOG_STRIP_METADATA_KEY)
                .unwrap_or(defaults.strip_log_metadata),
        }
    }
}
