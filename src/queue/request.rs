//! Typed sync requests (§4.6) — a tagged sum type standing in for the
//! original's inheritance tree (Design Note 9).

use serde_json::{Map, Value};

use crate::ids::ShadowKey;

/// One pending unit of sync work for a `(thing, shadow)`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRequest {
    /// A local update not yet pushed to the cloud. `patch` is the state-only
    /// patch that was applied locally (§4.4 step 10).
    LocalUpdate { key: ShadowKey, patch: Value },
    /// An update received from the cloud's `update/accepted` topic, not yet
    /// applied locally.
    CloudUpdate {
        key: ShadowKey,
        payload: Value,
        cloud_version: u64,
    },
    /// A local delete not yet pushed to the cloud.
    LocalDelete { key: ShadowKey, version: u64 },
    /// A delete received from the cloud's `delete/accepted` topic.
    CloudDelete { key: ShadowKey, cloud_version: u64 },
    /// Full three-way reconciliation against the last-synced base.
    Full { key: ShadowKey },
    /// Read the cloud's copy, write it over the local copy wholesale.
    OverwriteLocal { key: ShadowKey },
    /// Read the local copy, write it over the cloud's copy wholesale.
    OverwriteCloud { key: ShadowKey },
}

impl SyncRequest {
    pub fn key(&self) -> &ShadowKey {
        match self {
            SyncRequest::LocalUpdate { key, .. }
            | SyncRequest::CloudUpdate { key, .. }
            | SyncRequest::LocalDelete { key, .. }
            | SyncRequest::CloudDelete { key, .. }
            | SyncRequest::Full { key }
            | SyncRequest::OverwriteLocal { key }
            | SyncRequest::OverwriteCloud { key } => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncRequest::LocalUpdate { .. } => "LocalUpdate",
            SyncRequest::CloudUpdate { .. } => "CloudUpdate",
            SyncRequest::LocalDelete { .. } => "LocalDelete",
            SyncRequest::CloudDelete { .. } => "CloudDelete",
            SyncRequest::Full { .. } => "Full",
            SyncRequest::OverwriteLocal { .. } => "OverwriteLocal",
            SyncRequest::OverwriteCloud { .. } => "OverwriteCloud",
        }
    }
}

/// Deep-merge JSON patch `b` on top of patch `a`: objects union recursively
/// with `b`'s keys taking precedence, `null` deletes the key, everything else
/// replaces wholesale. Used to combine two `LocalUpdate`/`CloudUpdate`
/// payloads queued back to back for the same shadow (§4.5).
pub(crate) fn layer_patch(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Object(am), Value::Object(bm)) => {
            let mut out: Map<String, Value> = am.clone();
            for (k, v) in bm {
                match v {
                    Value::Null => {
                        out.remove(k);
                    }
                    Value::Object(_) => {
                        let merged = match out.get(k) {
                            Some(existing) => layer_patch(existing, v),
                            None => v.clone(),
                        };
                        out.insert(k.clone(), merged);
                    }
                    other => {
                        out.insert(k.clone(), other.clone());
                    }
                }
            }
            Value::Object(out)
        }
        (_, b) => b.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn layering_combines_distinct_keys() {
        let a = json!({"a": 1});
        let b = json!({"a": 2, "b": 3});
        assert_eq!(layer_patch(&a, &b), json!({"a": 2, "b": 3}));
    }

    #[test]
    fn layering_applies_null_delete() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"a": null});
        assert_eq!(layer_patch(&a, &b), json!({"b": 2}));
    }

    #[test]
    fn layering_recurses_into_nested_objects() {
        let a = json!({"a": {"x": 1, "y": 2}});
        let b = json!({"a": {"x": 9}});
        assert_eq!(layer_patch(&a, &b), json!({"a": {"x": 9, "y": 2}}));
    }
}
