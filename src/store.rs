//! Result store: cached-envelope reads and the atomic write-then-publish.

use std::time::Duration;

use fred::clients::Pool;
use fred::interfaces::{KeysInterface, LuaInterface};
use tracing::{debug, trace};

use crate::error::Result;
use crate::keys::KeySet;
use crate::payload::Envelope;

/// PSETEX the result and PUBLISH it on the notification channel as one
/// server-side unit, so a waiter woken by the publish always finds the data
/// on a subsequent read.
const PUT_AND_PUBLISH: &str = r#"
    redis.call('PSETEX', KEYS[1], ARGV[1], ARGV[2])
    return redis.call('PUBLISH', KEYS[2], ARGV[2])
"#;

/// Fetch the cached envelope under `data_key`.  `Ok(None)` on a miss.
pub async fn get(pool: &Pool, data_key: &str) -> Result<Option<Envelope>> {
    let raw: Option<String> = pool.get(data_key).await?;
    match raw {
        Some(raw) => {
            trace!(key = data_key, "result cache hit");
            Ok(Some(Envelope::decode(&raw)?))
        }
        None => {
            trace!(key = data_key, "result cache miss");
            Ok(None)
        }
    }
}

/// Write the envelope under the data key with `ttl` and publish it to all
/// subscribers of the notification channel.
///
/// Returns the number of subscribers the publish reached.
pub async fn put(pool: &Pool, keys: &KeySet, envelope: &Envelope, ttl: Duration) -> Result<i64> {
    let payload = envelope.encode()?;
    let receivers: i64 = pool
        .eval(
            PUT_AND_PUBLISH,
            vec![keys.data.clone(), keys.notif.clone()],
            vec![ttl.as_millis().to_string(), payload],
        )
        .await?;
    debug!(
        key = %keys.data,
        channel = %keys.notif,
        ttl_ms = ttl.as_millis() as u64,
        receivers,
        "result stored and published"
    );
    Ok(receivers)
}
