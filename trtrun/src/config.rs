//! Runtime configuration, loaded from TOML files, the environment, or
//! constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! max_threads = 4
//! engine_host_code_allowed = false
//! min_severity = "info"
//! ```
//!
//! Missing keys take their defaults.
//!
//! # Environment
//!
//! | Variable                 | Field                      |
//! |--------------------------|----------------------------|
//! | `TRTRUN_MAX_THREADS`     | `max_threads`              |
//! | `TRTRUN_ALLOW_HOST_CODE` | `engine_host_code_allowed` |
//! | `TRTRUN_LOG_LEVEL`       | `min_severity`             |

use crate::error::{Error, Result};
use crate::logger::Severity;
use std::path::Path;

/// Overrides [`RuntimeConfig::max_threads`]
pub const ENV_MAX_THREADS: &str = "TRTRUN_MAX_THREADS";
/// Overrides [`RuntimeConfig::engine_host_code_allowed`]; accepts `1/0`, `true/false`, `yes/no`, `on/off`
pub const ENV_ALLOW_HOST_CODE: &str = "TRTRUN_ALLOW_HOST_CODE";
/// Overrides [`RuntimeConfig::min_severity`]; any name [`Severity`] parses
pub const ENV_LOG_LEVEL: &str = "TRTRUN_LOG_LEVEL";

/// Knobs applied by [`Runtime::with_config`](crate::Runtime::with_config).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Threads the runtime may use for deserialization. Must be at least 1.
    pub max_threads: i32,
    /// Accept engines that embed host code.
    pub engine_host_code_allowed: bool,
    /// Threshold to install on the logger; `None` leaves it untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_threads: 1,
            engine_host_code_allowed: false,
            min_severity: None,
        }
    }
}

impl RuntimeConfig {
    /// Same as [`RuntimeConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deserialization thread count.
    pub fn with_max_threads(mut self, max_threads: i32) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Allows engines that embed host code.
    pub fn with_engine_host_code_allowed(mut self, allowed: bool) -> Self {
        self.engine_host_code_allowed = allowed;
        self
    }

    /// Sets the logger threshold applied at runtime construction.
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("TOML serialise error: {e}")))
    }

    /// Defaults overridden by any `TRTRUN_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MAX_THREADS) {
            config.max_threads = value.trim().parse().map_err(|_| {
                Error::InvalidArgument(format!("{ENV_MAX_THREADS}: not an integer: {value}"))
            })?;
        }
        if let Some(value) = lookup(ENV_ALLOW_HOST_CODE) {
            config.engine_host_code_allowed = parse_flag(ENV_ALLOW_HOST_CODE, &value)?;
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            config.min_severity = Some(value.parse()?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the runtime would refuse.
    pub fn validate(&self) -> Result<()> {
        if self.max_threads < 1 {
            return Err(Error::InvalidArgument(format!(
                "max_threads must be at least 1, got {}",
                self.max_threads
            )));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::InvalidArgument(format!("{key}: not a boolean: {value}"))),
    }
}
