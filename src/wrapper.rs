//! The wrapper orchestrator and its waiting state machine.
//!
//! A call resolves through exactly one of four paths: direct cache hit,
//! lease-and-compute, notification from the process that did the work, or
//! timeout.  The post-subscribe re-check closes the race where the winner
//! published before this call's subscription was registered.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use fred::clients::{Pool, SubscriberClient};
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{validate_config, Config, WrapConfig};
use crate::dispatch::WaiterRegistry;
use crate::error::{Error, Result};
use crate::keys::KeySet;
use crate::payload::Envelope;
use crate::{lock, redis, signature, store};

struct Inner {
    config: Config,
    pool: Pool,
    subscriber: SubscriberClient,
    registry: WaiterRegistry,
    /// Serializes registry mutations paired with SUBSCRIBE / UNSUBSCRIBE so
    /// a finishing waiter's unsubscribe cannot interleave with a new
    /// waiter's subscribe and drop a live subscription.
    sub_gate: tokio::sync::Mutex<()>,
    client_id: String,
    dispatch_task: StdMutex<Option<JoinHandle<()>>>,
}

/// Distributed single-flight coordinator.
///
/// One instance per process; cheap to clone.  Owns the shared subscriber
/// connection, the pending-waiter registry, and the dispatch task that routes
/// incoming notifications to waiters.  Teardown is explicit via
/// [`DistributedPromise::close`].
#[derive(Clone)]
pub struct DistributedPromise {
    inner: Arc<Inner>,
}

impl DistributedPromise {
    /// Validate `config`, open the dedicated subscriber connection, and spawn
    /// the notification dispatch task.
    pub async fn connect(pool: Pool, config: Config) -> Result<Self> {
        validate_config(&config)?;
        let subscriber = redis::create_subscriber(&pool).await?;
        let client_id = redis::client_id();

        let inner = Arc::new(Inner {
            config,
            pool,
            subscriber,
            registry: WaiterRegistry::new(),
            sub_gate: tokio::sync::Mutex::new(()),
            client_id,
            dispatch_task: StdMutex::new(None),
        });

        let task = tokio::spawn(run_dispatch(Arc::clone(&inner)));
        *inner
            .dispatch_task
            .lock()
            .expect("dispatch task slot poisoned") = Some(task);

        info!(client_id = %inner.client_id, "distributed promise instance connected");
        Ok(Self { inner })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Bind `work` to the deduplication machinery.
    ///
    /// The returned [`Wrapped`] has the same input/output contract as `work`;
    /// calls with equal argument signatures within the TTL / lease window are
    /// executed once across all coordinating processes.
    pub fn wrap<F>(&self, work: F, config: WrapConfig) -> Result<Wrapped<F>> {
        config.validate()?;
        let timeout = config.timeout(&self.inner.config);
        Ok(Wrapped {
            flight: self.clone(),
            work,
            key: config.key,
            timeout,
        })
    }

    /// One-shot variant of [`DistributedPromise::wrap`]: run `work(args)`
    /// under deduplication without constructing a [`Wrapped`].
    pub async fn run<A, T, F, Fut>(&self, config: &WrapConfig, args: A, work: F) -> Result<T>
    where
        A: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        config.validate()?;
        let timeout = config.timeout(&self.inner.config);
        let sig = signature::argument_signature(&args)?;
        self.execute(&config.key, timeout, &sig, || work(args)).await
    }

    /// Explicit teardown: rejects every pending waiter with
    /// [`Error::Shutdown`], stops the dispatch task, and closes the
    /// subscriber connection.
    pub async fn close(&self) -> Result<()> {
        let task = self
            .inner
            .dispatch_task
            .lock()
            .expect("dispatch task slot poisoned")
            .take();
        if let Some(task) = task {
            task.abort();
        }

        // Dropping the senders settles every pending call with Shutdown.
        let pending = self.inner.registry.drain_all();
        if !pending.is_empty() {
            warn!(count = pending.len(), "closing with pending waiters");
        }
        drop(pending);

        self.inner.subscriber.quit().await?;
        info!(client_id = %self.inner.client_id, "distributed promise instance closed");
        Ok(())
    }

    /// The full state machine for one invocation.
    async fn execute<T, Fut>(
        &self,
        key: &str,
        timeout: Duration,
        sig: &str,
        work: impl FnOnce() -> Fut,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let inner = &self.inner;
        let keys = KeySet::build(&inner.config, key, sig);

        // Fast path: the result may already be cached.
        if let Some(envelope) = store::get(&inner.pool, &keys.data).await? {
            debug!(key, "resolved from cache");
            return envelope.into_value();
        }

        // Miss: race for the work lease.
        let have_lease = lock::acquire_lease(
            &inner.pool,
            &keys.lock,
            inner.config.lock_timeout(),
            &inner.client_id,
        )
        .await?;

        if have_lease {
            // A failure here propagates to this caller only; nothing is
            // stored or published, so waiters fall to their own timeouts.
            let value = work().await.map_err(Error::Work)?;
            let envelope = Envelope::ok(&value)?;
            store::put(&inner.pool, &keys, &envelope, inner.config.result_ttl()).await?;
            debug!(key, "work executed and result published");
            return Ok(value);
        }

        // Another process holds the lease: register as a waiter.
        let waiter_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let _gate = inner.sub_gate.lock().await;
            let first = inner.registry.add(&keys.notif, waiter_id, tx);
            if first {
                if let Err(e) = inner.subscriber.subscribe(&keys.notif).await {
                    inner.registry.remove(&keys.notif, waiter_id);
                    return Err(e.into());
                }
            }
        }
        debug!(key, %waiter_id, channel = %keys.notif, "waiting for another process");

        // Re-check once: the winner may have published before our
        // subscription was active.
        match store::get(&inner.pool, &keys.data).await {
            Ok(Some(envelope)) => {
                self.release_waiter(&keys.notif, waiter_id).await;
                debug!(key, "resolved from cache on post-subscribe re-check");
                return envelope.into_value();
            }
            Ok(None) => {}
            Err(e) => {
                self.release_waiter(&keys.notif, waiter_id).await;
                return Err(e);
            }
        }

        // Pend until notification, timeout, or shutdown.  Cleanup runs on
        // every arm and is idempotent.
        let outcome = wait_for_notification(rx, timeout).await;
        self.release_waiter(&keys.notif, waiter_id).await;

        match outcome {
            WaitOutcome::Notified(envelope) => {
                debug!(key, %waiter_id, "resolved from notification");
                envelope.into_value()
            }
            WaitOutcome::Shutdown => Err(Error::Shutdown),
            WaitOutcome::TimedOut => {
                warn!(key, %waiter_id, ?timeout, "timed out waiting for another process");
                Err(Error::WaitTimeout {
                    key: keys.data,
                    waited: timeout,
                })
            }
        }
    }

    /// Deregister a waiter, dropping the channel subscription when it was the
    /// last one.  Safe to call after the dispatch task already drained the
    /// waiter.
    async fn release_waiter(&self, channel: &str, waiter_id: Uuid) {
        let inner = &self.inner;
        let _gate = inner.sub_gate.lock().await;
        if inner.registry.remove(channel, waiter_id) {
            // The call is already settled; an unsubscribe failure only means
            // a stray subscription until the connection drops.
            if let Err(e) = inner.subscriber.unsubscribe(channel).await {
                warn!(channel, error = %e, "unsubscribe failed");
            }
        }
    }
}

/// Terminal outcome of the pending phase, determined before cleanup runs.
#[derive(Debug)]
enum WaitOutcome {
    Notified(Envelope),
    Shutdown,
    TimedOut,
}

/// Await the waiter's one-shot delivery under the per-call timeout.
async fn wait_for_notification(rx: oneshot::Receiver<Envelope>, timeout: Duration) -> WaitOutcome {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(envelope)) => WaitOutcome::Notified(envelope),
        // The sender is only dropped when the instance shuts down and the
        // registry is drained.
        Ok(Err(_)) => WaitOutcome::Shutdown,
        Err(_) => WaitOutcome::TimedOut,
    }
}

/// Receive the next broadcast message, riding out lag.
///
/// fred fans incoming pub/sub traffic out through a bounded broadcast
/// channel, so a burst of notifications can lag the receiver.  Waiters whose
/// messages were dropped still recover through the re-check and timeout
/// paths; the dispatch loop must keep serving everyone else.  Returns `None`
/// only when the channel is closed.
async fn next_broadcast<T: Clone>(messages: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match messages.recv().await {
            Ok(msg) => return Some(msg),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "notification stream lagged");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Route incoming notifications to the matching waiters.
async fn run_dispatch(inner: Arc<Inner>) {
    let mut messages = inner.subscriber.message_rx();
    while let Some(msg) = next_broadcast(&mut messages).await {
        let channel = msg.channel.to_string();
        let Some(text) = msg.value.as_str() else {
            warn!(channel, "dropping non-text notification payload");
            continue;
        };
        let envelope = match Envelope::decode(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Waiters fall through to their re-check / timeout paths.
                warn!(channel, error = %e, "dropping undecodable notification payload");
                continue;
            }
        };

        let _gate = inner.sub_gate.lock().await;
        let woken = inner.registry.dispatch(&channel, &envelope);
        if woken > 0 {
            debug!(channel, woken, "notification dispatched");
            if let Err(e) = inner.subscriber.unsubscribe(&channel).await {
                warn!(channel, error = %e, "unsubscribe after dispatch failed");
            }
        }
    }
}

/// An operation bound to the deduplication machinery by
/// [`DistributedPromise::wrap`].
pub struct Wrapped<F> {
    flight: DistributedPromise,
    work: F,
    key: String,
    timeout: Duration,
}

impl<F> Wrapped<F> {
    /// Invoke the wrapped operation with distributed deduplication.
    pub async fn call<A, T, Fut>(&self, args: A) -> Result<T>
    where
        A: Serialize,
        T: Serialize + DeserializeOwned,
        F: Fn(A) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let sig = signature::argument_signature(&args)?;
        self.flight
            .execute(&self.key, self.timeout, &sig, || (self.work)(args))
            .await
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
