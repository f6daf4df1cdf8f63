//! C8 — cloud client: typed get/update/delete against the remote shadow
//! service, rate-limited, plus a subscription manager that turns incoming
//! `update/accepted`/`delete/accepted` events into queued sync requests. The
//! MQTT transport itself is an out-of-scope collaborator (§1); this module
//! owns the typed verbs, the rate limiter, and the subscription bookkeeping
//! around whatever transport is plugged in.

pub mod rate_limiter;
pub mod transport;

pub use rate_limiter::RateLimiter;
pub use transport::{CloudTransport, TransportError, TransportEvent};

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ConfigHandle;
use crate::error::{Error, Result};
use crate::ids::ShadowKey;
use crate::queue::{RequestQueue, SyncRequest};

/// The three remote verbs C6 drives against the cloud (§4.8).
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn get(&self, thing: &str, shadow: &str) -> Result<Option<Value>>;
    async fn update(&self, thing: &str, shadow: &str, payload: Value, expected_version: u64) -> Result<Value>;
    async fn delete(&self, thing: &str, shadow: &str) -> Result<()>;
}

/// Rate-limited wrapper around a [`CloudTransport`]. Every outbound call
/// blocks on the shared token-bucket limiter before reaching the transport
/// (§4.8, Design Note 9: "a token-bucket keyed by process, not per shadow").
pub struct RateLimitedCloudClient<T: CloudTransport> {
    transport: T,
    limiter: RateLimiter,
}

impl<T: CloudTransport> RateLimitedCloudClient<T> {
    pub fn new(transport: T, config: &ConfigHandle) -> Self {
        let rate = config.snapshot().synchronize.max_outbound_sync_updates_per_second;
        Self {
            transport,
            limiter: RateLimiter::new(rate.max(1)),
        }
    }
}

#[async_trait]
impl<T: CloudTransport> CloudClient for RateLimitedCloudClient<T> {
    async fn get(&self, thing: &str, shadow: &str) -> Result<Option<Value>> {
        self.limiter.acquire().await;
        match self.transport.get(thing, shadow).await {
            Ok(doc) => Ok(Some(doc)),
            Err(TransportError::NotFound) => Ok(None),
            Err(e) => Err(transport_error(e)),
        }
    }

    async fn update(&self, thing: &str, shadow: &str, payload: Value, expected_version: u64) -> Result<Value> {
        self.limiter.acquire().await;
        self.transport
            .update(thing, shadow, payload, expected_version)
            .await
            .map_err(transport_error)
    }

    async fn delete(&self, thing: &str, shadow: &str) -> Result<()> {
        self.limiter.acquire().await;
        self.transport.delete(thing, shadow).await.map_err(transport_error)
    }
}

fn transport_error(e: TransportError) -> Error {
    match e {
        TransportError::NotFound => Error::ShadowNotFound {
            thing: String::new(),
            shadow: String::new(),
        },
        TransportError::Conflict { expected, actual } => Error::VersionConflict { expected, actual },
        TransportError::Unauthorized => Error::Unauthorized,
        TransportError::Transport(msg) | TransportError::Throttled(msg) => Error::Storage(msg),
    }
}

/// Tracks the live subscription set and keeps it converged with the
/// configured sync set, pushing incoming events into C5 (§4.8).
pub struct SubscriptionManager<T: CloudTransport> {
    transport: Arc<T>,
    queue: Arc<RequestQueue>,
    subscribed: parking_lot::Mutex<HashSet<ShadowKey>>,
}

impl<T: CloudTransport> SubscriptionManager<T> {
    pub fn new(transport: Arc<T>, queue: Arc<RequestQueue>) -> Self {
        Self {
            transport,
            queue,
            subscribed: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    /// Converge subscriptions to exactly `shadows`: subscribe to anything
    /// new, unsubscribe from anything dropped (§4.8).
    pub async fn update_subscriptions(&self, shadows: &[ShadowKey], direction: crate::config::Direction) {
        let current: HashSet<ShadowKey> = self.subscribed.lock().clone();
        let desired: HashSet<ShadowKey> = shadows.iter().cloned().collect();

        for key in desired.difference(&current) {
            self.subscribe_with_retry(key, direction).await;
        }
        for key in current.difference(&desired) {
            let _ = self.transport.unsubscribe(&key.0, &key.1).await;
            info!(thing = %key.0, shadow = %key.1, "unsubscribed from shadow topics");
        }

        *self.subscribed.lock() = desired;
    }

    /// Subscribe to one shadow's update/delete topics, retrying indefinitely
    /// with backoff on transport failure until success or interruption.
    async fn subscribe_with_retry(&self, key: &ShadowKey, _direction: crate::config::Direction) {
        let mut backoff = std::time::Duration::from_millis(100);
        loop {
            match self.transport.subscribe(&key.0, &key.1).await {
                Ok(()) => {
                    info!(thing = %key.0, shadow = %key.1, "subscribed to shadow topics");
                    return;
                }
                Err(e) => {
                    warn!(thing = %key.0, shadow = %key.1, error = %e, "subscription attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(std::time::Duration::from_secs(30));
                }
            }
        }
    }

    /// Translate a received transport event into a queued sync request.
    pub fn on_event(&self, event: TransportEvent, direction: crate::config::Direction) {
        let key = (event.thing.clone(), event.shadow.clone());
        let req = match event.kind {
            transport::EventKind::UpdateAccepted { payload, cloud_version } => {
                SyncRequest::CloudUpdate {
                    key: key.clone(),
                    payload,
                    cloud_version,
                }
            }
            transport::EventKind::DeleteAccepted { cloud_version } => {
                SyncRequest::CloudDelete {
                    key: key.clone(),
                    cloud_version,
                }
            }
        };
        self.queue.put(req, direction);
    }
}
