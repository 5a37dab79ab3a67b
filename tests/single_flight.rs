//! End-to-end single-flight behaviour against a live Redis / KeyDB.
//!
//! These tests require a running instance and are ignored by default.
//! Point `REDIS_URL` at one (default `redis://127.0.0.1:6379`) and run:
//!
//! ```text
//! cargo test --test single_flight -- --ignored
//! ```
//!
//! Each test uses a fresh random key prefix so runs never interfere with
//! each other or with leftover keys.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fred::clients::Pool;

use distributed_promise::{
    argument_signature, lock, redis, store, Config, DistributedPromise, Envelope, Error, KeySet,
    RedisSettings, WrapConfig,
};

async fn connect() -> (DistributedPromise, Pool) {
    let endpoint =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let pool = redis::create_pool(&RedisSettings {
        endpoint,
        tls: false,
        auth_token_env: None,
        pool_size: 4,
    })
    .await
    .expect("redis pool");

    let config = Config {
        key_prefix: format!("dp-test-{}", uuid::Uuid::new_v4()),
        ..Config::default()
    };
    let flight = DistributedPromise::connect(pool.clone(), config)
        .await
        .expect("instance");
    (flight, pool)
}

/// A counting work function: sleeps briefly so concurrent callers overlap,
/// then returns a value derived from the argument.
fn counting_work(
    calls: Arc<AtomicUsize>,
) -> impl FnOnce(u64) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<String>> + Send>>
{
    move |id: u64| {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(format!("user-{id}"))
        })
    }
}

#[tokio::test]
#[ignore = "requires a live redis (REDIS_URL)"]
async fn concurrent_equal_calls_execute_the_work_once() {
    let (flight, _pool) = connect().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let wrap = WrapConfig::new("fetch-user");

    let (a, b) = tokio::join!(
        flight.run(&wrap, 42u64, counting_work(calls.clone())),
        flight.run(&wrap, 42u64, counting_work(calls.clone())),
    );

    assert_eq!(a.unwrap(), "user-42");
    assert_eq!(b.unwrap(), "user-42");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    flight.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live redis (REDIS_URL)"]
async fn different_arguments_do_not_share_results() {
    let (flight, _pool) = connect().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let wrap = WrapConfig::new("fetch-user");

    let (a, b) = tokio::join!(
        flight.run(&wrap, 1u64, counting_work(calls.clone())),
        flight.run(&wrap, 2u64, counting_work(calls.clone())),
    );

    assert_eq!(a.unwrap(), "user-1");
    assert_eq!(b.unwrap(), "user-2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    flight.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live redis (REDIS_URL)"]
async fn failing_winner_leaves_the_waiter_to_time_out() {
    let (flight, _pool) = connect().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let wrap = WrapConfig::new("flaky-op").with_timeout(Duration::from_millis(300));

    let failing_work = |calls: Arc<AtomicUsize>| {
        move |_id: u64| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(anyhow::anyhow!("upstream exploded"))
        }
    };

    let (a, b) = tokio::join!(
        flight.run(&wrap, 7u64, failing_work(calls.clone())),
        flight.run(&wrap, 7u64, failing_work(calls.clone())),
    );

    // Whichever call won the lease fails with the work error; nothing is
    // stored or published, so the other rejects with WaitTimeout instead of
    // hanging or receiving a false success.
    let results = [a.unwrap_err(), b.unwrap_err()];
    assert_eq!(
        results
            .iter()
            .filter(|e| matches!(e, Error::Work(_)))
            .count(),
        1,
        "exactly one caller should see the work failure: {results:?}"
    );
    assert_eq!(
        results
            .iter()
            .filter(|e| matches!(e, Error::WaitTimeout { .. }))
            .count(),
        1,
        "exactly one caller should time out: {results:?}"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    flight.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live redis (REDIS_URL)"]
async fn waiter_resolves_when_the_result_is_published_mid_wait() {
    let (flight, pool) = connect().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let wrap = WrapConfig::new("slow-op").with_timeout(Duration::from_secs(5));

    let signature = argument_signature(&7u64).unwrap();
    let keys = KeySet::build(flight.config(), "slow-op", &signature);

    // Hold the lease externally so the call under test must take the
    // waiting path.
    assert!(
        lock::acquire_lease(&pool, &keys.lock, Duration::from_secs(30), "external-holder")
            .await
            .unwrap()
    );

    let waiter = tokio::spawn({
        let flight = flight.clone();
        let wrap = wrap.clone();
        let calls = calls.clone();
        async move {
            flight
                .run(&wrap, 7u64, move |_id: u64| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(0u64)
                })
                .await
        }
    });

    // Let the waiter subscribe, then publish the result on its behalf, as
    // the external lease holder would.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let envelope = Envelope::ok(&99u64).unwrap();
    store::put(&pool, &keys, &envelope, Duration::from_secs(60))
        .await
        .unwrap();

    let value: u64 = waiter.await.unwrap().unwrap();
    assert_eq!(value, 99);
    // The waiter never executed the work itself.
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    flight.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live redis (REDIS_URL)"]
async fn late_caller_resolves_from_cache_after_the_winner_published() {
    let (flight, _pool) = connect().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let wrap = WrapConfig::new("fetch-user");

    let first: String = flight
        .run(&wrap, 42u64, counting_work(calls.clone()))
        .await
        .unwrap();

    // The winner already wrote and published; a later call with the same
    // arguments must hit the cache without re-executing.
    let second: String = flight
        .run(&wrap, 42u64, counting_work(calls.clone()))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    flight.close().await.unwrap();
}
