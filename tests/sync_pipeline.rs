//! End-to-end coverage of the queue + executor pipeline (§8 scenarios 6-8):
//! queue merge-coalescing and a cloud conflict escalating to a full resync.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use shadow_manager::cloud::transport::{CloudTransport, TransportError};
use shadow_manager::cloud::RateLimitedCloudClient;
use shadow_manager::config::{Config, ConfigHandle, Direction};
use shadow_manager::handlers::ShadowManager;
use shadow_manager::ids::ShadowKey;
use shadow_manager::notify::NullSink;
use shadow_manager::queue::{RequestQueue, SyncRequest};
use shadow_manager::store::memory::InMemoryStore;
use shadow_manager::sync::{self, Outcome, SyncContext};

#[derive(Default)]
struct FakeTransport {
    docs: Mutex<HashMap<ShadowKey, Value>>,
    next_update_error: Mutex<Option<TransportError>>,
}

#[async_trait]
impl CloudTransport for FakeTransport {
    async fn get(&self, thing: &str, shadow: &str) -> Result<Value, TransportError> {
        self.docs
            .lock()
            .get(&(thing.to_string(), shadow.to_string()))
            .cloned()
            .ok_or(TransportError::NotFound)
    }

    async fn update(
        &self,
        thing: &str,
        shadow: &str,
        payload: Value,
        _expected_version: u64,
    ) -> Result<Value, TransportError> {
        if let Some(err) = self.next_update_error.lock().take() {
            return Err(err);
        }
        self.docs
            .lock()
            .insert((thing.to_string(), shadow.to_string()), payload.clone());
        Ok(payload)
    }

    async fn delete(&self, thing: &str, shadow: &str) -> Result<(), TransportError> {
        self.docs.lock().remove(&(thing.to_string(), shadow.to_string()));
        Ok(())
    }

    async fn subscribe(&self, _thing: &str, _shadow: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn unsubscribe(&self, _thing: &str, _shadow: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

fn key() -> ShadowKey {
    ("thing-1".to_string(), "".to_string())
}

#[test]
fn scenario_6_two_local_updates_coalesce_into_one_queue_entry() {
    let queue = RequestQueue::default();
    queue.put(
        SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 1}),
        },
        Direction::Between,
    );
    queue.put(
        SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 2, "b": 3}),
        },
        Direction::Between,
    );

    assert_eq!(queue.len(), 1);
    match queue.take() {
        SyncRequest::LocalUpdate { patch, .. } => assert_eq!(patch, json!({"a": 2, "b": 3})),
        other => panic!("unexpected request left in queue: {other:?}"),
    }
}

#[test]
fn scenario_7_update_then_delete_collapses_to_delete_only() {
    let queue = RequestQueue::default();
    queue.put(
        SyncRequest::LocalUpdate {
            key: key(),
            patch: json!({"a": 1}),
        },
        Direction::Between,
    );
    queue.put(SyncRequest::LocalDelete { key: key(), version: 9 }, Direction::Between);

    assert_eq!(queue.len(), 1);
    assert_eq!(
        queue.take(),
        SyncRequest::LocalDelete { key: key(), version: 9 }
    );
}

#[tokio::test]
async fn scenario_8_cloud_conflict_escalates_to_a_full_resync() {
    let config = ConfigHandle::new(Config::default());
    let queue = Arc::new(RequestQueue::default());
    let manager = Arc::new(ShadowManager::new(
        Arc::new(InMemoryStore::new()),
        queue.clone(),
        Arc::new(NullSink),
        config.clone(),
    ));

    let transport = FakeTransport::default();
    *transport.next_update_error.lock() = Some(TransportError::Conflict { expected: 2, actual: 5 });
    let cloud: Arc<dyn shadow_manager::cloud::CloudClient> =
        Arc::new(RateLimitedCloudClient::new(transport, &config));

    let ctx = SyncContext { manager: manager.clone(), cloud, config };

    manager
        .update("thing-1", "", br#"{"state":{"reported":{"x":1}}}"#, 1)
        .unwrap();
    manager.store().put_sync(shadow_manager::store::SyncRecord::new("thing-1", "")).unwrap();

    let req = SyncRequest::LocalUpdate {
        key: key(),
        patch: json!({"reported": {"x": 2}}),
    };
    let outcome = sync::execute(&req, &ctx).await;
    assert!(matches!(outcome, Outcome::Conflict(_)));

    let recovery = sync::conflict_recovery(Direction::Between, &key());
    assert_eq!(recovery, SyncRequest::Full { key: key() });
}

/// Retrying a request whose cloud push already succeeded must be a no-op on
/// the sync record (idempotence under at-least-once delivery, §8).
#[tokio::test]
async fn retrying_a_successful_push_leaves_the_sync_record_unchanged() {
    let config = ConfigHandle::new(Config::default());
    let queue = Arc::new(RequestQueue::default());
    let manager = Arc::new(ShadowManager::new(
        Arc::new(InMemoryStore::new()),
        queue.clone(),
        Arc::new(NullSink),
        config.clone(),
    ));
    let cloud: Arc<dyn shadow_manager::cloud::CloudClient> = Arc::new(RateLimitedCloudClient::new(
        FakeTransport::default(),
        &config,
    ));
    let ctx = SyncContext { manager: manager.clone(), cloud, config };

    manager
        .update("thing-1", "", br#"{"state":{"reported":{"x":1}}}"#, 1)
        .unwrap();
    manager.store().put_sync(shadow_manager::store::SyncRecord::new("thing-1", "")).unwrap();

    let req = SyncRequest::LocalUpdate {
        key: key(),
        patch: json!({"reported": {"x": 1}}),
    };
    assert!(matches!(sync::execute(&req, &ctx).await, Outcome::Success));
    let first = manager.store().get_sync("thing-1", "").unwrap().unwrap();

    assert!(matches!(sync::execute(&req, &ctx).await, Outcome::Success));
    let second = manager.store().get_sync("thing-1", "").unwrap().unwrap();

    assert_eq!(first.last_synced_document, second.last_synced_document);
    assert_eq!(first.cloud_version, second.cloud_version);
}
