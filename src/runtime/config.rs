//! Runtime configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: fields assigned on a [`RuntimeConfig`] after loading
//! 2. **Environment variables**: values from `TESSEL_*` env vars
//! 3. **Config file**: values loaded from a JSON file
//! 4. **Defaults**: [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `TESSEL_MAX_STACK_DEPTH` | `usize` | `max_stack_depth` |
//! | `TESSEL_ALLOW_SPAWN_INLINING` | `bool` | `allow_spawn_inlining` |
//! | `TESSEL_ALLOW_ALL_SPAWN_INLINING` | `bool` | `allow_all_spawn_inlining` |
//! | `TESSEL_INLINE_TIME_LIMIT_NS` | `u64` | `inline_average_time_limit_ns` |
//! | `TESSEL_MIN_CALLS_FOR_TIME_PER_CALL` | `u64` | `min_calls_for_time_per_call` |
//! | `TESSEL_CALL_CACHE_CAPACITY` | `usize` | `call_cache_capacity` |
//! | `TESSEL_SELF_TAIL_ELISION` | `bool` | `self_tail_elision` |
//! | `TESSEL_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `TESSEL_DOUBLE_RESOLUTION` | `ignore`/`report` | `double_resolution` |
//! | `TESSEL_TRACE_TASKS` | `bool` | `trace_tasks` |
use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::dispatch::cache::MAX_CACHE_CAPACITY;

pub const ENV_MAX_STACK_DEPTH: &str = "TESSEL_MAX_STACK_DEPTH";
pub const ENV_ALLOW_SPAWN_INLINING: &str = "TESSEL_ALLOW_SPAWN_INLINING";
pub const ENV_ALLOW_ALL_SPAWN_INLINING: &str = "TESSEL_ALLOW_ALL_SPAWN_INLINING";
pub const ENV_INLINE_TIME_LIMIT_NS: &str = "TESSEL_INLINE_TIME_LIMIT_NS";
pub const ENV_MIN_CALLS_FOR_TIME_PER_CALL: &str = "TESSEL_MIN_CALLS_FOR_TIME_PER_CALL";
pub const ENV_CALL_CACHE_CAPACITY: &str = "TESSEL_CALL_CACHE_CAPACITY";
pub const ENV_SELF_TAIL_ELISION: &str = "TESSEL_SELF_TAIL_ELISION";
pub const ENV_WORKER_THREADS: &str = "TESSEL_WORKER_THREADS";
pub const ENV_DOUBLE_RESOLUTION: &str = "TESSEL_DOUBLE_RESOLUTION";
pub const ENV_TRACE_TASKS: &str = "TESSEL_TRACE_TASKS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    InvalidEnv { var: String, message: String },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What a second `bind`/`stop` on a resolved future does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoubleResolution {
    /// Silently keep the first resolution.
    #[default]
    Ignore,
    /// Keep the first resolution and report the attempt through the event sink.
    Report,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Inline spawn/continuation depth allowed on one worker before work is
    /// handed to the scheduler.
    pub max_stack_depth: usize,
    pub allow_spawn_inlining: bool,
    /// Also inline spawns the closure graph marked as must-spawn.
    pub allow_all_spawn_inlining: bool,
    /// Spawned computations whose measured time per call is at or above this
    /// limit are always scheduled.
    pub inline_average_time_limit_ns: u64,
    /// Scheduled executions of a target before its time per call is trusted.
    /// Until then spawns of that target are scheduled so they get measured.
    pub min_calls_for_time_per_call: u64,
    pub call_cache_capacity: usize,
    pub self_tail_elision: bool,
    pub worker_threads: usize,
    pub double_resolution: DoubleResolution,
    pub trace_tasks: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 128,
            allow_spawn_inlining: true,
            allow_all_spawn_inlining: false,
            inline_average_time_limit_ns: 1_000_000,
            min_calls_for_time_per_call: 16,
            call_cache_capacity: 4,
            self_tail_elision: true,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            double_resolution: DoubleResolution::Ignore,
            trace_tasks: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Apply `TESSEL_*` environment overrides.
    ///
    /// Only variables that are set are applied. A set variable with an
    /// unparseable value is an error.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(read_env)
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// explicit variable lookup.
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup(ENV_MAX_STACK_DEPTH) {
            self.max_stack_depth = parse_usize(ENV_MAX_STACK_DEPTH, &val)?;
        }
        if let Some(val) = lookup(ENV_ALLOW_SPAWN_INLINING) {
            self.allow_spawn_inlining = parse_bool(ENV_ALLOW_SPAWN_INLINING, &val)?;
        }
        if let Some(val) = lookup(ENV_ALLOW_ALL_SPAWN_INLINING) {
            self.allow_all_spawn_inlining = parse_bool(ENV_ALLOW_ALL_SPAWN_INLINING, &val)?;
        }
        if let Some(val) = lookup(ENV_INLINE_TIME_LIMIT_NS) {
            self.inline_average_time_limit_ns = parse_u64(ENV_INLINE_TIME_LIMIT_NS, &val)?;
        }
        if let Some(val) = lookup(ENV_MIN_CALLS_FOR_TIME_PER_CALL) {
            self.min_calls_for_time_per_call = parse_u64(ENV_MIN_CALLS_FOR_TIME_PER_CALL, &val)?;
        }
        if let Some(val) = lookup(ENV_CALL_CACHE_CAPACITY) {
            self.call_cache_capacity = parse_usize(ENV_CALL_CACHE_CAPACITY, &val)?;
        }
        if let Some(val) = lookup(ENV_SELF_TAIL_ELISION) {
            self.self_tail_elision = parse_bool(ENV_SELF_TAIL_ELISION, &val)?;
        }
        if let Some(val) = lookup(ENV_WORKER_THREADS) {
            self.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
        }
        if let Some(val) = lookup(ENV_DOUBLE_RESOLUTION) {
            self.double_resolution = parse_double_resolution(ENV_DOUBLE_RESOLUTION, &val)?;
        }
        if let Some(val) = lookup(ENV_TRACE_TASKS) {
            self.trace_tasks = parse_bool(ENV_TRACE_TASKS, &val)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "call_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.call_cache_capacity > MAX_CACHE_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "call_cache_capacity must be at most {}, got {}",
                MAX_CACHE_CAPACITY, self.call_cache_capacity
            )));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidEnv {
            var: var_name.to_string(),
            message: format!("expected unsigned integer, got {val:?} ({e})"),
        })
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnv {
            var: var_name.to_string(),
            message: format!("expected u64, got {val:?} ({e})"),
        })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var_name.to_string(),
            message: format!("expected bool (true/false/1/0/yes/no), got {val:?}"),
        }),
    }
}

fn parse_double_resolution(var_name: &str, val: &str) -> Result<DoubleResolution, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "ignore" => Ok(DoubleResolution::Ignore),
        "report" => Ok(DoubleResolution::Report),
        _ => Err(ConfigError::InvalidEnv {
            var: var_name.to_string(),
            message: format!("expected ignore or report, got {val:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_stack_depth, 128);
        assert_eq!(config.call_cache_capacity, 4);
        assert_eq!(config.double_resolution, DoubleResolution::Ignore);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config =
            RuntimeConfig::from_json_str(r#"{"max_stack_depth": 8, "double_resolution": "report"}"#)
                .unwrap();
        assert_eq!(config.max_stack_depth, 8);
        assert_eq!(config.double_resolution, DoubleResolution::Report);
        assert!(config.self_tail_elision);
    }

    #[test]
    fn json_rejects_zero_cache_capacity() {
        let err = RuntimeConfig::from_json_str(r#"{"call_cache_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn json_rejects_unknown_double_resolution() {
        let err = RuntimeConfig::from_json_str(r#"{"double_resolution": "panic"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_apply_only_set_variables() {
        let mut config = RuntimeConfig::default();
        config
            .apply_overrides_from(lookup(&[
                (ENV_MAX_STACK_DEPTH, " 32 "),
                (ENV_SELF_TAIL_ELISION, "off"),
                (ENV_DOUBLE_RESOLUTION, "Report"),
            ]))
            .unwrap();
        assert_eq!(config.max_stack_depth, 32);
        assert!(!config.self_tail_elision);
        assert_eq!(config.double_resolution, DoubleResolution::Report);
        assert_eq!(config.call_cache_capacity, 4);
    }

    #[test]
    fn env_override_with_bad_value_names_the_variable() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_overrides_from(lookup(&[(ENV_TRACE_TASKS, "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_TRACE_TASKS));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = RuntimeConfig::from_json_file("/nonexistent/tessel.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
