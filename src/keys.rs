//! Key derivation.
//!
//! Every wrapped call maps to a composite key (operation key + argument
//! signature), from which three namespaced keys are derived: the data key
//! holding the cached result, the lock key holding the work lease, and the
//! notification channel used to wake waiters.

use crate::config::Config;

/// The three derived keys for one composite key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    /// Cached result location, e.g. `distributed-promise:fetch-user:{…}`.
    pub data: String,
    /// Work lease location, e.g. `distributed-promise:lock:fetch-user:{…}`.
    pub lock: String,
    /// Pub/sub channel, e.g. `distributed-promise:notif:fetch-user:{…}`.
    pub notif: String,
}

impl KeySet {
    /// Derive all three keys for `key` + `signature` under `config`.
    pub fn build(config: &Config, key: &str, signature: &str) -> Self {
        let sep = &config.key_separator;
        let composite = [key, signature].join(sep);
        Self {
            data: [config.key_prefix.as_str(), composite.as_str()].join(sep),
            lock: [
                config.key_prefix.as_str(),
                config.lock_prefix.as_str(),
                composite.as_str(),
            ]
            .join(sep),
            notif: [
                config.key_prefix.as_str(),
                config.notif_prefix.as_str(),
                composite.as_str(),
            ]
            .join(sep),
        }
    }
}
