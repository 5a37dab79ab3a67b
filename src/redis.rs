//! Redis / KeyDB connection plumbing.
//!
//! Builds the command [`Pool`] used for GET / SET NX / EVAL traffic and the
//! dedicated [`SubscriberClient`] the notification channel requires (Redis
//! connections in subscriber mode cannot issue ordinary commands).

use fred::clients::{Pool, SubscriberClient};
use fred::interfaces::ClientLike;
use fred::types::config::{Config as FredConfig, ReconnectPolicy, ServerConfig, TlsConnector};
use fred::types::Builder;
use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

/// Connection settings for the backing store.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Connection string, e.g. `redis://cache.local:6379` or `host:port`.
    pub endpoint: String,
    /// Enable TLS (rustls) for the connection.
    #[serde(default)]
    pub tls: bool,
    /// Name of the environment variable holding the auth token, if any.
    #[serde(default)]
    pub auth_token_env: Option<String>,
    /// Number of connections in the command pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    4
}

/// Create a connected command pool from the settings.
///
/// The pool is initialised (connected + PING verified) before being returned,
/// with an exponential reconnect policy.
pub async fn create_pool(settings: &RedisSettings) -> Result<Pool> {
    let endpoint = settings
        .endpoint
        .trim_start_matches("rediss://")
        .trim_start_matches("redis://");
    let (host, port) = parse_host_port(endpoint)?;

    let mut fred_config = FredConfig {
        server: ServerConfig::new_centralized(host, port),
        ..FredConfig::default()
    };

    if settings.tls {
        fred_config.tls = Some(TlsConnector::default_rustls()?.into());
    }

    if let Some(ref env_name) = settings.auth_token_env {
        if let Ok(token) = std::env::var(env_name) {
            fred_config.password = Some(token);
        }
    }

    let mut builder = Builder::from_config(fred_config);
    builder.set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2));

    let pool = builder.build_pool(settings.pool_size)?;
    pool.init().await?;

    let _: String = pool.ping(None).await?;

    info!(
        host,
        port,
        tls = settings.tls,
        pool_size = settings.pool_size,
        "redis pool created and verified"
    );

    Ok(pool)
}

/// Create a connected subscriber client sharing the pool's configuration and
/// reconnect policy.
pub async fn create_subscriber(pool: &Pool) -> Result<SubscriberClient> {
    let client = pool.next();
    let subscriber = SubscriberClient::new(
        client.client_config(),
        None,
        None,
        client.client_reconnect_policy(),
    );
    let _connect = subscriber.connect();
    subscriber.wait_for_connect().await?;
    Ok(subscriber)
}

/// Parse a `host:port` string.  If the port is omitted, defaults to `6379`.
pub fn parse_host_port(endpoint: &str) -> Result<(&str, u16)> {
    // Strip any trailing path segments (e.g. from URIs).
    let endpoint = endpoint.split('/').next().unwrap_or(endpoint);

    if let Some((host, port_str)) = endpoint.rsplit_once(':') {
        let port: u16 = port_str
            .parse()
            .map_err(|_| Error::Configuration(format!("invalid port in endpoint: {endpoint}")))?;
        Ok((host, port))
    } else {
        Ok((endpoint, 6379))
    }
}

/// Derive a stable-ish identifier for this process, embedded in lock token
/// values so a stuck lease can be traced to its holder.
pub fn client_id() -> String {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let suffix = &uuid::Uuid::new_v4().to_string()[..8];
    format!("{hostname}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_with_port() {
        let (host, port) = parse_host_port("cache.local:6380").unwrap();
        assert_eq!(host, "cache.local");
        assert_eq!(port, 6380);
    }

    #[test]
    fn test_parse_endpoint_default_port() {
        let (host, port) = parse_host_port("cache.local").unwrap();
        assert_eq!(host, "cache.local");
        assert_eq!(port, 6379);
    }

    #[test]
    fn test_parse_endpoint_strips_path() {
        let (host, port) = parse_host_port("cache.local:6379/0").unwrap();
        assert_eq!(host, "cache.local");
        assert_eq!(port, 6379);
    }

    #[test]
    fn test_parse_endpoint_rejects_bad_port() {
        assert!(parse_host_port("cache.local:notaport").is_err());
    }

    #[test]
    fn test_client_ids_are_unique_per_process() {
        assert_ne!(client_id(), client_id());
    }
}
