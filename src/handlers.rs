//! C4 — request handlers: get/update/delete, under the write gate, enforcing
//! version and size rules, emitting notifications, and enqueueing cloud-bound
//! sync work (§4.4). The authorization check against `thing/<name>/shadow[/<shadowName>]`
//! is the external collaborator named in §6; callers are expected to have
//! already authorized the request before reaching these operations.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::ConfigHandle;
use crate::document::{self, DataOwner, ShadowDocument};
use crate::error::{Error, Result};
use crate::ids::{self, ShadowKey};
use crate::notify::{
    AcceptedNotification, DeltaNotification, DocumentSnapshot, DocumentsNotification,
    NotificationSink,
};
use crate::queue::{RequestQueue, SyncRequest};
use crate::store::Store;
use crate::write_gate::WriteGate;

/// Ties together C2 (store), C3 (write gate), C5 (request queue), and the
/// notification sink behind the three local operations (§4.4).
pub struct ShadowManager {
    store: Arc<dyn Store>,
    write_gate: WriteGate,
    queue: Arc<RequestQueue>,
    notifications: Arc<dyn NotificationSink>,
    config: ConfigHandle,
}

/// Result of a successful update: the serialized new document.
#[derive(Debug)]
pub struct UpdateOutcome {
    pub document_bytes: Vec<u8>,
    pub version: u64,
}

impl ShadowManager {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<RequestQueue>,
        notifications: Arc<dyn NotificationSink>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            store,
            write_gate: WriteGate::new(),
            queue,
            notifications,
            config,
        }
    }

    /// Whether `(thing, shadow)` is in the configured sync set (§4.4 step 10/6).
    fn is_synced(&self, thing: &str, shadow: &str) -> Result<bool> {
        Ok(self.store.get_sync(thing, shadow)?.is_some())
    }

    /// §4.4 "Update".
    pub fn update(
        &self,
        thing: &str,
        shadow: &str,
        payload_bytes: &[u8],
        now: u64,
    ) -> Result<UpdateOutcome> {
        ids::validate_identity(thing, shadow)?;
        let patch = document::parse_update_payload(payload_bytes)?;

        let _lock = self.write_gate.acquire(thing, shadow);

        let record = self.store.get(thing, shadow)?;
        // A missing record or a tombstone reads as an empty document whose
        // version compares as 0 (§4.4 step 3) — but the record's actual
        // version (if it's a tombstone) still anchors the next version, so a
        // re-created shadow's version keeps climbing rather than restarting
        // at 1 (§3: "version is preserved and incremented across re-creations").
        let (stored_doc, record_version, compare_version) = match &record {
            Some(r) if !r.is_tombstone() => {
                let bytes = r.document_bytes.as_deref().unwrap_or(b"{}");
                (ShadowDocument::from_stored_json(bytes)?, r.version, r.version)
            }
            Some(r) => (ShadowDocument::empty(), r.version, 0),
            None => (ShadowDocument::empty(), 0, 0),
        };

        if let Some(expected) = patch.version {
            if expected != compare_version {
                return Err(Error::VersionConflict {
                    expected: compare_version,
                    actual: expected,
                });
            }
        }

        let next_version = record_version + 1;
        let outcome = document::apply_patch(&stored_doc, &patch, next_version, now);
        let document_bytes = outcome.document.to_bytes();

        let limit = self.config.snapshot().effective_document_size_limit();
        if document_bytes.len() > limit {
            return Err(Error::PayloadTooLarge {
                limit,
                actual: document_bytes.len(),
            });
        }

        self.store.put(thing, shadow, document_bytes.clone(), next_version, now)?;

        self.emit_update_notifications(thing, shadow, &stored_doc, &outcome.document, &outcome.metadata_patch, &patch, now);

        drop(_lock);

        if self.is_synced(thing, shadow)? {
            let state_patch = json!({
                "reported": patch.reported,
                "desired": patch.desired,
            });
            self.queue.put(
                SyncRequest::LocalUpdate {
                    key: ids::key(thing, shadow),
                    patch: state_patch,
                },
                self.config.snapshot().synchronize.direction,
            );
        }

        Ok(UpdateOutcome {
            document_bytes,
            version: next_version,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_update_notifications(
        &self,
        thing: &str,
        shadow: &str,
        previous: &ShadowDocument,
        current: &ShadowDocument,
        metadata_patch: &Value,
        patch: &crate::document::UpdatePatch,
        now: u64,
    ) {
        self.notifications.accepted(
            thing,
            shadow,
            AcceptedNotification {
                state: current.to_json()["state"].clone(),
                metadata: metadata_patch.clone(),
                version: current.version,
                client_token: patch.client_token.clone(),
                timestamp: now,
            },
        );

        let delta = document::compute_delta(current.reported.as_ref(), current.desired.as_ref());
        if document::is_meaningful(&delta) {
            self.notifications.delta(
                thing,
                shadow,
                DeltaNotification {
                    state: delta.unwrap_or(Value::Null),
                    metadata: current.metadata_desired.clone().unwrap_or(Value::Null),
                    version: current.version,
                    timestamp: now,
                },
            );
        }

        let previous_snapshot = if previous.version == 0 {
            None
        } else {
            Some(DocumentSnapshot {
                state: previous.to_json()["state"].clone(),
                version: previous.version,
            })
        };

        self.notifications.documents(
            thing,
            shadow,
            DocumentsNotification {
                previous: previous_snapshot,
                current: Some(DocumentSnapshot {
                    state: current.to_json()["state"].clone(),
                    version: current.version,
                }),
                timestamp: now,
                client_token: patch.client_token.clone(),
            },
        );
    }

    /// §4.4 "Delete".
    pub fn delete(&self, thing: &str, shadow: &str, now: u64) -> Result<()> {
        ids::validate_identity(thing, shadow)?;

        let _lock = self.write_gate.acquire(thing, shadow);

        let record = self.store.get(thing, shadow)?;
        let record = match record {
            Some(r) if !r.is_tombstone() => r,
            _ => {
                return Err(Error::ShadowNotFound {
                    thing: thing.to_string(),
                    shadow: shadow.to_string(),
                })
            }
        };

        let previous_doc = ShadowDocument::from_stored_json(
            record.document_bytes.as_deref().unwrap_or(b"{}"),
        )?;
        let new_version = record.version + 1;

        self.store.soft_delete(thing, shadow, new_version, now)?;

        self.notifications.accepted(
            thing,
            shadow,
            AcceptedNotification {
                state: Value::Object(Default::default()),
                metadata: Value::Object(Default::default()),
                version: new_version,
                client_token: None,
                timestamp: now,
            },
        );
        self.notifications.documents(
            thing,
            shadow,
            DocumentsNotification {
                previous: Some(DocumentSnapshot {
                    state: previous_doc.to_json()["state"].clone(),
                    version: previous_doc.version,
                }),
                current: None,
                timestamp: now,
                client_token: None,
            },
        );

        drop(_lock);

        if self.is_synced(thing, shadow)? {
            self.queue.put(
                SyncRequest::LocalDelete {
                    key: ids::key(thing, shadow),
                    version: new_version,
                },
                self.config.snapshot().synchronize.direction,
            );
        }

        Ok(())
    }

    /// §4.4 "Get".
    pub fn get(&self, thing: &str, shadow: &str) -> Result<Value> {
        ids::validate_identity(thing, shadow)?;

        let record = self.store.get(thing, shadow)?;
        let record = match record {
            Some(r) if !r.is_tombstone() => r,
            _ => {
                return Err(Error::ShadowNotFound {
                    thing: thing.to_string(),
                    shadow: shadow.to_string(),
                })
            }
        };

        let doc = ShadowDocument::from_stored_json(record.document_bytes.as_deref().unwrap_or(b"{}"))?;
        let mut wire = doc.to_json();

        let delta = document::compute_delta(doc.reported.as_ref(), doc.desired.as_ref());
        if document::is_meaningful(&delta) {
            if let Some(state) = wire.get_mut("state").and_then(Value::as_object_mut) {
                state.insert("delta".to_string(), delta.unwrap_or(Value::Null));
            }
        }

        Ok(wire)
    }

    /// `ListNamedShadowsForThing` (§6).
    pub fn list_named_shadows(&self, thing: &str, offset: usize, limit: usize) -> Result<Vec<String>> {
        ids::validate_thing_name(thing)?;
        self.store.list_named_shadows(thing, offset, limit)
    }

    /// Apply an incoming cloud update locally, used by C6's
    /// `CloudUpdateSyncRequest` execution (§4.6). Bypasses the queueing step
    /// of the public `update` since this *is* the sync path.
    pub fn apply_cloud_update(
        &self,
        thing: &str,
        shadow: &str,
        payload: &Value,
        cloud_version: u64,
        now: u64,
    ) -> Result<ShadowDocument> {
        let _lock = self.write_gate.acquire(thing, shadow);

        let record = self.store.get(thing, shadow)?;
        let stored_doc = match &record {
            Some(r) if !r.is_tombstone() => {
                ShadowDocument::from_stored_json(r.document_bytes.as_deref().unwrap_or(b"{}"))?
            }
            _ => ShadowDocument::empty(),
        };

        let patch = document::UpdatePatch {
            reported: payload.get("reported").cloned(),
            desired: payload.get("desired").cloned(),
            version: None,
            client_token: None,
        };

        let outcome = document::apply_patch(&stored_doc, &patch, cloud_version, now);
        let bytes = outcome.document.to_bytes();
        self.store.put(thing, shadow, bytes, cloud_version, now)?;

        Ok(outcome.document)
    }

    /// Soft-delete locally in response to a cloud delete event, used by
    /// C6's `CloudDeleteSyncRequest` execution.
    pub fn apply_cloud_delete(&self, thing: &str, shadow: &str, cloud_version: u64, now: u64) -> Result<()> {
        let _lock = self.write_gate.acquire(thing, shadow);
        self.store.soft_delete(thing, shadow, cloud_version, now)?;
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }
}

/// Default tie-breaker a shadow's sync configuration uses when none is
/// supplied explicitly, mirroring the active direction (§6, Design Note 9).
pub fn default_owner_for(key: &ShadowKey, config: &ConfigHandle) -> DataOwner {
    let _ = key;
    config.snapshot().synchronize.direction.default_owner()
}
