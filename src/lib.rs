//! Redis-coordinated single-flight deduplication for expensive async
//! operations.
//!
//! Wrap an async operation and every concurrent invocation with the same
//! logical arguments — in this process or any other process sharing the same
//! Redis — executes it at most once per time window.  The winner of a SET NX
//! lease performs the work, caches the result with a TTL, and publishes it;
//! everyone else either reads the cache or is woken by the publication.
//!
//! ```no_run
//! use distributed_promise::{Config, DistributedPromise, RedisSettings, WrapConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = distributed_promise::redis::create_pool(&RedisSettings {
//!     endpoint: "redis://127.0.0.1:6379".into(),
//!     tls: false,
//!     auth_token_env: None,
//!     pool_size: 4,
//! })
//! .await?;
//!
//! let flight = DistributedPromise::connect(pool, Config::default()).await?;
//!
//! let fetch_user = flight.wrap(
//!     |id: u64| async move { anyhow::Ok(format!("user-{id}")) },
//!     WrapConfig::new("fetch-user"),
//! )?;
//!
//! // Concurrent calls with id 42 across all processes run the closure once.
//! let user: String = fetch_user.call(42).await?;
//! # let _ = user;
//! # flight.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod keys;
pub mod lock;
pub mod payload;
pub mod redis;
pub mod signature;
pub mod store;
pub mod wrapper;

pub use config::{load_config, Config, WrapConfig};
pub use error::{Error, Result};
pub use keys::KeySet;
pub use payload::Envelope;
pub use redis::RedisSettings;
pub use signature::argument_signature;
pub use wrapper::{DistributedPromise, Wrapped};
