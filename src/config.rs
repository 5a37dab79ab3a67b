use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Instance configuration
// ---------------------------------------------------------------------------

/// Configuration for a [`crate::DistributedPromise`] instance.
///
/// All key-shape settings participate in key derivation, so every process
/// coordinating on the same operations must share the same values.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TTL (milliseconds) of the distributed work lease, and the default
    /// per-call wait timeout.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Namespace prefix shared by all derived keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Sub-prefix for lock keys.
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,
    /// Sub-prefix for notification channels.
    #[serde(default = "default_notif_prefix")]
    pub notif_prefix: String,
    /// Separator joining key segments.
    #[serde(default = "default_key_separator")]
    pub key_separator: String,
    /// TTL (milliseconds) of cached results.
    #[serde(default = "default_result_ttl_ms")]
    pub result_ttl_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn default_key_prefix() -> String {
    "distributed-promise".to_string()
}

fn default_lock_prefix() -> String {
    "lock".to_string()
}

fn default_notif_prefix() -> String {
    "notif".to_string()
}

fn default_key_separator() -> String {
    ":".to_string()
}

fn default_result_ttl_ms() -> u64 {
    1000 * 60 * 30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            key_prefix: default_key_prefix(),
            lock_prefix: default_lock_prefix(),
            notif_prefix: default_notif_prefix(),
            key_separator: default_key_separator(),
            result_ttl_ms: default_result_ttl_ms(),
        }
    }
}

impl Config {
    /// Lease duration / default wait timeout as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Cached-result TTL as a [`Duration`].
    pub fn result_ttl(&self) -> Duration {
        Duration::from_millis(self.result_ttl_ms)
    }
}

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("failed to read config file {}: {e}", path.display()))
    })?;
    let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
        Error::Configuration(format!("failed to parse config file {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
pub(crate) fn validate_config(config: &Config) -> Result<()> {
    if config.key_prefix.is_empty() {
        return Err(Error::Configuration("key_prefix must not be empty".into()));
    }
    if config.key_separator.is_empty() {
        return Err(Error::Configuration(
            "key_separator must not be empty".into(),
        ));
    }
    if config.lock_timeout_ms == 0 {
        return Err(Error::Configuration("lock_timeout_ms must be > 0".into()));
    }
    if config.result_ttl_ms == 0 {
        return Err(Error::Configuration("result_ttl_ms must be > 0".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-wrap configuration
// ---------------------------------------------------------------------------

/// Per-operation settings supplied to [`crate::DistributedPromise::wrap`].
///
/// The operation key is an explicit required parameter: two processes
/// deduplicate against each other only if they wrap with the same key.
#[derive(Debug, Clone, Deserialize)]
pub struct WrapConfig {
    /// Logical name of the wrapped operation.  Must be non-empty.
    pub key: String,
    /// Per-call wait timeout override (milliseconds).  Defaults to the
    /// instance `lock_timeout_ms`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl WrapConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Resolve the effective wait timeout against the instance default.
    pub(crate) fn timeout(&self, config: &Config) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.lock_timeout())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::Configuration(
                "wrap config has no operation key".into(),
            ));
        }
        Ok(())
    }
}
