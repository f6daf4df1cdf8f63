//! The MQTT transport is an out-of-scope collaborator (§1); this trait is
//! the seam [`super::CloudClient`] and [`super::SubscriptionManager`] consume
//! it through, plus an in-memory fake used by tests.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("resource not found")]
    NotFound,
    #[error("version conflict: expected {expected}, got {actual}")]
    Conflict { expected: u64, actual: u64 },
    #[error("unauthorized")]
    Unauthorized,
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// A received `update/accepted` or `delete/accepted` event for one shadow.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub thing: String,
    pub shadow: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    UpdateAccepted { payload: Value, cloud_version: u64 },
    DeleteAccepted { cloud_version: u64 },
}

/// Request/response plus topic subscription surface against the remote
/// shadow service (§6's "remote wire").
#[async_trait]
pub trait CloudTransport: Send + Sync {
    async fn get(&self, thing: &str, shadow: &str) -> Result<Value, TransportError>;
    async fn update(
        &self,
        thing: &str,
        shadow: &str,
        payload: Value,
        expected_version: u64,
    ) -> Result<Value, TransportError>;
    async fn delete(&self, thing: &str, shadow: &str) -> Result<(), TransportError>;

    async fn subscribe(&self, thing: &str, shadow: &str) -> Result<(), TransportError>;
    async fn unsubscribe(&self, thing: &str, shadow: &str) -> Result<(), TransportError>;
}
