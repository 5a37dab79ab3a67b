//! Distributed work lease.

use std::time::Duration;

use fred::clients::Pool;
use fred::interfaces::KeysInterface;
use fred::types::{Expiration, SetOptions};
use tracing::debug;

use crate::error::Result;

/// Attempt to acquire the work lease for `lock_key` using SET NX PX.
///
/// Returns `true` if this caller now holds the lease, `false` if another
/// holder is active.  There is no release operation: the lease expires on its
/// own, bounding duplicate work after a crash to `lease`.
pub async fn acquire_lease(
    pool: &Pool,
    lock_key: &str,
    lease: Duration,
    holder: &str,
) -> Result<bool> {
    // The value is informational only; ownership is never checked because the
    // lease is never explicitly released.
    let value = format!("{holder}:{}", chrono::Utc::now().timestamp_millis());
    let result: Option<String> = pool
        .set(
            lock_key,
            value.as_str(),
            Some(Expiration::PX(lease.as_millis() as i64)),
            Some(SetOptions::NX),
            false,
        )
        .await?;
    // SET … NX returns "OK" when the key was set, nil otherwise.
    let acquired = result.is_some();
    debug!(key = lock_key, holder, acquired, "lease attempt");
    Ok(acquired)
}
