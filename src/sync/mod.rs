//! C6 — sync executor: drains C5 one request at a time and runs each
//! request's typed execution against C2/C4/C8 (§4.6).

pub mod strategy;

pub use strategy::Strategy;

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::cloud::CloudClient;
use crate::config::{ConfigHandle, Direction};
use crate::document::{three_way_merge, DataOwner};
use crate::error::Error;
use crate::handlers::ShadowManager;
use crate::ids::ShadowKey;
use crate::queue::{RequestQueue, SyncRequest};
use crate::store::{Store, SyncRecord};

/// How a request execution concluded (§4.6, §7). Never surfaced to local
/// callers — only the executor acts on it.
#[derive(Debug)]
pub enum Outcome {
    Success,
    Retryable(Error),
    Skip(Error),
    Conflict(Error),
    Interrupt,
}

/// Handles to C2, C4, and C8 that a request's execution needs (Design Note 9:
/// "a single `SyncContext` value is passed to `execute`").
pub struct SyncContext {
    pub manager: Arc<ShadowManager>,
    pub cloud: Arc<dyn CloudClient>,
    pub config: ConfigHandle,
}

impl SyncContext {
    fn now(&self) -> u64 {
        crate::document::now_epoch_secs()
    }

    fn direction(&self) -> Direction {
        self.config.snapshot().synchronize.direction
    }

    fn owner(&self) -> DataOwner {
        self.direction().default_owner()
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.manager.store()
    }
}

/// Execute one request; the executor classifies the result and decides
/// whether to requeue, escalate, or drop (§4.6).
pub async fn execute(req: &SyncRequest, ctx: &SyncContext) -> Outcome {
    match req {
        SyncRequest::LocalUpdate { key, patch } => execute_local_update(key, patch, ctx).await,
        SyncRequest::LocalDelete { key, version } => execute_local_delete(key, *version, ctx).await,
        SyncRequest::CloudUpdate { key, payload, cloud_version } => {
            execute_cloud_update(key, payload, *cloud_version, ctx).await
        }
        SyncRequest::CloudDelete { key, cloud_version } => execute_cloud_delete(key, *cloud_version, ctx).await,
        SyncRequest::Full { key } => execute_full(key, ctx).await,
        SyncRequest::OverwriteLocal { key } => execute_overwrite_local(key, ctx).await,
        SyncRequest::OverwriteCloud { key } => execute_overwrite_cloud(key, ctx).await,
    }
}

fn sync_record_or_default(ctx: &SyncContext, key: &ShadowKey) -> crate::error::Result<SyncRecord> {
    Ok(ctx.store().get_sync(&key.0, &key.1)?.unwrap_or_else(|| SyncRecord::new(&key.0, &key.1)))
}

async fn execute_local_update(key: &ShadowKey, patch: &serde_json::Value, ctx: &SyncContext) -> Outcome {
    let mut sync = match sync_record_or_default(ctx, key) {
        Ok(s) => s,
        Err(e) => return Outcome::Retryable(e),
    };

    let local_version = match ctx.store().get(&key.0, &key.1) {
        Ok(Some(record)) => record.version,
        Ok(None) => return Outcome::Skip(Error::ShadowNotFound { thing: key.0.clone(), shadow: key.1.clone() }),
        Err(e) => return Outcome::Retryable(e),
    };

    // Already pushed this local version: a replay has nothing new to sync
    // and must leave the sync record untouched (§8 retry idempotence).
    if local_version == sync.local_version {
        return Outcome::Success;
    }

    let next_cloud_version = sync.cloud_version + 1;
    match ctx.cloud.update(&key.0, &key.1, patch.clone(), next_cloud_version).await {
        Ok(new_doc) => {
            let now = ctx.now();
            sync.last_synced_document = Some(serde_json::to_vec(&new_doc).unwrap_or_default());
            sync.cloud_version = next_cloud_version;
            sync.local_version = local_version;
            sync.last_sync_time = now;
            if let Err(e) = ctx.store().put_sync(sync) {
                return Outcome::Retryable(e);
            }
            Outcome::Success
        }
        Err(e @ Error::VersionConflict { .. }) => Outcome::Conflict(e),
        Err(e @ Error::Storage(_)) => Outcome::Retryable(e),
        Err(e) => Outcome::Skip(e),
    }
}

async fn execute_local_delete(key: &ShadowKey, version: u64, ctx: &SyncContext) -> Outcome {
    let mut sync = match sync_record_or_default(ctx, key) {
        Ok(s) => s,
        Err(e) => return Outcome::Retryable(e),
    };

    match ctx.cloud.delete(&key.0, &key.1).await {
        Ok(()) => {
            sync.cloud_deleted = true;
            sync.cloud_version += 1;
            sync.last_synced_document = None;
            sync.local_version = version;
            sync.last_sync_time = ctx.now();
            if let Err(e) = ctx.store().put_sync(sync) {
                return Outcome::Retryable(e);
            }
            Outcome::Success
        }
        Err(e @ Error::VersionConflict { .. }) => Outcome::Conflict(e),
        Err(e @ Error::Storage(_)) => Outcome::Retryable(e),
        Err(e) => Outcome::Skip(e),
    }
}

async fn execute_cloud_update(
    key: &ShadowKey,
    payload: &serde_json::Value,
    cloud_version: u64,
    ctx: &SyncContext,
) -> Outcome {
    let now = ctx.now();
    match ctx.manager.apply_cloud_update(&key.0, &key.1, payload, cloud_version, now) {
        Ok(doc) => {
            let mut sync = match sync_record_or_default(ctx, key) {
                Ok(s) => s,
                Err(e) => return Outcome::Retryable(e),
            };
            sync.cloud_version = cloud_version;
            sync.local_version = doc.version;
            sync.last_synced_document = Some(doc.to_bytes());
            sync.last_sync_time = now;
            if let Err(e) = ctx.store().put_sync(sync) {
                return Outcome::Retryable(e);
            }
            Outcome::Success
        }
        Err(e @ Error::Storage(_)) => Outcome::Retryable(e),
        Err(e) => Outcome::Skip(e),
    }
}

async fn execute_cloud_delete(key: &ShadowKey, cloud_version: u64, ctx: &SyncContext) -> Outcome {
    let now = ctx.now();
    match ctx.manager.apply_cloud_delete(&key.0, &key.1, cloud_version, now) {
        Ok(()) => {
            let mut sync = match sync_record_or_default(ctx, key) {
                Ok(s) => s,
                Err(e) => return Outcome::Retryable(e),
            };
            sync.cloud_deleted = true;
            sync.cloud_version = cloud_version;
            sync.last_synced_document = None;
            sync.last_sync_time = now;
            if let Err(e) = ctx.store().put_sync(sync) {
                return Outcome::Retryable(e);
            }
            Outcome::Success
        }
        Err(e @ Error::Storage(_)) => Outcome::Retryable(e),
        Err(e) => Outcome::Skip(e),
    }
}

/// Full three-way reconciliation against the last-synced base (§4.6).
async fn execute_full(key: &ShadowKey, ctx: &SyncContext) -> Outcome {
    let now = ctx.now();
    let sync = match sync_record_or_default(ctx, key) {
        Ok(s) => s,
        Err(e) => return Outcome::Retryable(e),
    };

    let local_record = match ctx.store().get(&key.0, &key.1) {
        Ok(r) => r,
        Err(e) => return Outcome::Retryable(e),
    };
    let local_doc = match &local_record {
        Some(r) if !r.is_tombstone() => {
            match crate::document::ShadowDocument::from_stored_json(r.document_bytes.as_deref().unwrap_or(b"{}")) {
                Ok(d) => Some(d.to_json()),
                Err(e) => return Outcome::Retryable(e),
            }
        }
        _ => None,
    };

    // A cloud 404 surfaces as "cloud absent" (§7), not an error.
    let cloud_doc = match ctx.cloud.get(&key.0, &key.1).await {
        Ok(doc) => doc,
        Err(Error::Storage(_)) => return Outcome::Retryable(Error::Storage("cloud get failed".into())),
        Err(_) => None,
    };

    let base = sync
        .last_synced_document
        .as_deref()
        .and_then(|b| crate::document::ShadowDocument::from_stored_json(b).ok())
        .map(|d| d.to_json());

    if local_doc.is_none() && cloud_doc.is_none() {
        let mut sync = sync;
        sync.last_synced_document = None;
        if let Err(e) = ctx.store().put_sync(sync) {
            return Outcome::Retryable(e);
        }
        return Outcome::Success;
    }

    let resolved = three_way_merge(local_doc.as_ref(), cloud_doc.as_ref(), base.as_ref(), ctx.owner());

    let resolved = resolved.unwrap_or(json!({}));
    let next_cloud_version = sync.cloud_version + 1;

    if cloud_doc.as_ref() != Some(&resolved) {
        if let Err(e) = ctx.cloud.update(&key.0, &key.1, resolved.clone(), next_cloud_version).await {
            return match e {
                Error::VersionConflict { .. } => Outcome::Conflict(e),
                Error::Storage(_) => Outcome::Retryable(e),
                _ => Outcome::Skip(e),
            };
        }
    }
    if local_doc.as_ref() != Some(&resolved) {
        if let Err(e) = ctx.manager.apply_cloud_update(&key.0, &key.1, &resolved, next_cloud_version, now) {
            return Outcome::Retryable(e);
        }
    }

    let mut sync = sync;
    sync.cloud_version = next_cloud_version;
    sync.last_synced_document = Some(serde_json::to_vec(&resolved).unwrap_or_default());
    sync.last_sync_time = now;
    if let Err(e) = ctx.store().put_sync(sync) {
        return Outcome::Retryable(e);
    }
    Outcome::Success
}

/// Read the cloud's copy, write it over the local copy wholesale (§4.6).
async fn execute_overwrite_local(key: &ShadowKey, ctx: &SyncContext) -> Outcome {
    let now = ctx.now();
    let cloud_doc = match ctx.cloud.get(&key.0, &key.1).await {
        Ok(doc) => doc,
        Err(Error::Storage(_)) => return Outcome::Retryable(Error::Storage("cloud get failed".into())),
        Err(e) => return Outcome::Skip(e),
    };

    let mut sync = match sync_record_or_default(ctx, key) {
        Ok(s) => s,
        Err(e) => return Outcome::Retryable(e),
    };

    match cloud_doc {
        Some(doc) => {
            let next_version = sync.local_version + 1;
            if let Err(e) = ctx.manager.apply_cloud_update(&key.0, &key.1, &doc, next_version, now) {
                return Outcome::Retryable(e);
            }
            sync.local_version = next_version;
            sync.last_synced_document = Some(serde_json::to_vec(&doc).unwrap_or_default());
        }
        None => {
            if let Err(e) = ctx.manager.apply_cloud_delete(&key.0, &key.1, sync.cloud_version, now) {
                return Outcome::Retryable(e);
            }
            sync.last_synced_document = None;
        }
    }
    sync.last_sync_time = now;
    if let Err(e) = ctx.store().put_sync(sync) {
        return Outcome::Retryable(e);
    }
    Outcome::Success
}

/// Read the local copy, write it over the cloud's copy wholesale (§4.6).
async fn execute_overwrite_cloud(key: &ShadowKey, ctx: &SyncContext) -> Outcome {
    let now = ctx.now();
    let local_record = match ctx.store().get(&key.0, &key.1) {
        Ok(r) => r,
        Err(e) => return Outcome::Retryable(e),
    };

    let mut sync = match sync_record_or_default(ctx, key) {
        Ok(s) => s,
        Err(e) => return Outcome::Retryable(e),
    };

    let next_cloud_version = sync.cloud_version + 1;
    match local_record {
        Some(r) if !r.is_tombstone() => {
            let doc = match crate::document::ShadowDocument::from_stored_json(
                r.document_bytes.as_deref().unwrap_or(b"{}"),
            ) {
                Ok(d) => d,
                Err(e) => return Outcome::Retryable(e),
            };
            let json = doc.to_json();
            if let Err(e) = ctx.cloud.update(&key.0, &key.1, json.clone(), next_cloud_version).await {
                return match e {
                    Error::VersionConflict { .. } => Outcome::Conflict(e),
                    Error::Storage(_) => Outcome::Retryable(e),
                    _ => Outcome::Skip(e),
                };
            }
            sync.last_synced_document = Some(serde_json::to_vec(&json).unwrap_or_default());
        }
        _ => {
            if let Err(e) = ctx.cloud.delete(&key.0, &key.1).await {
                return match e {
                    Error::Storage(_) => Outcome::Retryable(e),
                    _ => Outcome::Skip(e),
                };
            }
            sync.last_synced_document = None;
        }
    }
    sync.cloud_version = next_cloud_version;
    sync.last_sync_time = now;
    if let Err(e) = ctx.store().put_sync(sync) {
        return Outcome::Retryable(e);
    }
    Outcome::Success
}

/// The recovery request a conflict escalates to, per the active direction
/// (§4.6, testable property "Conflict escalation").
pub fn conflict_recovery(direction: Direction, key: &ShadowKey) -> SyncRequest {
    match direction {
        Direction::Between => SyncRequest::Full { key: key.clone() },
        Direction::DeviceToCloud => SyncRequest::OverwriteCloud { key: key.clone() },
        Direction::CloudToDevice => SyncRequest::OverwriteLocal { key: key.clone() },
    }
}

/// Drain `queue` once via `take()`, running `execute` and applying §4.6/§7's
/// disposition: requeue retryables at the head, drop skips with a warning,
/// and enqueue the directional recovery request on conflict.
pub async fn run_one(queue: &Arc<RequestQueue>, ctx: &SyncContext) {
    let req = queue.take();
    dispatch(req, queue, ctx).await;
}

/// Run `execute` on an already-dequeued request and apply its disposition.
/// Shared by [`run_one`] and the [`strategy`] workers.
async fn dispatch(req: SyncRequest, queue: &Arc<RequestQueue>, ctx: &SyncContext) {
    let key = req.key().clone();
    let direction = ctx.direction();

    match execute(&req, ctx).await {
        Outcome::Success => {}
        Outcome::Retryable(e) => {
            warn!(thing = %key.0, shadow = %key.1, error = %e, "retryable sync failure, requeuing");
            // `offer_and_take` gives a same-key collision head priority by
            // merging at the front, and otherwise leaves `req` (or whatever
            // it displaced) already queued — except when the queue is empty,
            // where it hands `req` straight back without inserting it. Only
            // that case needs a follow-up `put`; doing it unconditionally
            // would merge an already-requeued request into itself a second
            // time and could clobber a concurrently merged newer arrival.
            let was_empty = queue.is_empty();
            let requeued = queue.offer_and_take(req, false, direction);
            if was_empty {
                queue.put(requeued, direction);
            }
        }
        Outcome::Skip(e) => {
            warn!(thing = %key.0, shadow = %key.1, error = %e, "skipping sync request");
        }
        Outcome::Conflict(e) => {
            warn!(thing = %key.0, shadow = %key.1, error = %e, "sync conflict, escalating to recovery");
            queue.put(conflict_recovery(direction, &key), direction);
        }
        Outcome::Interrupt => {}
    }
}
