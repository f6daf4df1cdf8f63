//! Local notification shapes C4 emits on every successful update/delete
//! (§4.4, step 8): `accepted`, `delta`, and `documents`. Delivery is
//! best-effort and at-most-once per operation — the sink is an out-of-scope
//! collaborator (§1's local IPC surface); this module only defines the
//! payloads and the trait C4 publishes them through.

use serde::Serialize;
use serde_json::Value;

use crate::error::Rejection;

/// `accepted` — echoes the merged state plus the metadata patch that
/// resulted from applying the request.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedNotification {
    pub state: Value,
    pub metadata: Value,
    pub version: u64,
    #[serde(rename = "clientToken", skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    pub timestamp: u64,
}

/// `delta` — emitted only when a non-null delta exists after the update.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaNotification {
    pub state: Value,
    pub metadata: Value,
    pub version: u64,
    pub timestamp: u64,
}

/// One side of a `documents` notification: absent for a freshly created
/// document's `previous`, or for a deleted document's `current`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSnapshot {
    pub state: Value,
    pub version: u64,
}

/// `documents` — before/after snapshot of every successful update or delete.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentsNotification {
    pub previous: Option<DocumentSnapshot>,
    pub current: Option<DocumentSnapshot>,
    pub timestamp: u64,
    #[serde(rename = "clientToken", skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

/// `rejected` — the `{errorCode, message}` body for a failed call, included
/// here since it shares the same publish path as the three success shapes.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedNotification {
    #[serde(flatten)]
    pub rejection: Rejection,
    #[serde(rename = "clientToken", skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

/// A sink for the four notification shapes a shadow emits. The local IPC
/// transport that actually delivers these over MQTT-shaped topics is an
/// out-of-scope collaborator (§1); implementations here just need to accept
/// the payload for a given `(thing, shadow)`.
pub trait NotificationSink: Send + Sync {
    fn accepted(&self, thing: &str, shadow: &str, notification: AcceptedNotification);
    fn delta(&self, thing: &str, shadow: &str, notification: DeltaNotification);
    fn documents(&self, thing: &str, shadow: &str, notification: DocumentsNotification);
    fn rejected(&self, thing: &str, shadow: &str, notification: RejectedNotification);
}

/// A sink that drops every notification. Useful where a caller has no
/// transport wired up yet (tests, or a disabled `provideSyncStatus`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn accepted(&self, _thing: &str, _shadow: &str, _notification: AcceptedNotification) {}
    fn delta(&self, _thing: &str, _shadow: &str, _notification: DeltaNotification) {}
    fn documents(&self, _thing: &str, _shadow: &str, _notification: DocumentsNotification) {}
    fn rejected(&self, _thing: &str, _shadow: &str, _notification: RejectedNotification) {}
}
