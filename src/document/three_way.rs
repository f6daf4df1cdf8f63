//! Three-way merge used by the `FullShadowSyncRequest` (C6) to reconcile
//! `local` and `cloud` state against their common `base` (the last-synced
//! document).

use serde_json::{Map, Value};

use super::semantic_eq;

/// Tie-breaker when both `local` and `cloud` changed the same leaf since `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOwner {
    Local,
    Cloud,
}

/// Reconcile `local` against `cloud` using `base` as the common ancestor, per
/// §4.1. Recurses only through the "pure-object" case — `local`, `cloud`, and
/// `base` all present and all JSON objects; anything else (including a
/// brand-new subtree with no `base` counterpart) is a leaf decision.
pub fn three_way_merge(
    local: Option<&Value>,
    cloud: Option<&Value>,
    base: Option<&Value>,
    owner: DataOwner,
) -> Option<Value> {
    if local.is_none() && cloud.is_none() {
        return None;
    }

    if let (Some(Value::Object(lm)), Some(Value::Object(cm)), Some(Value::Object(bm))) =
        (local, cloud, base)
    {
        let mut keys: Vec<&String> = lm.keys().chain(cm.keys()).collect();
        keys.sort();
        keys.dedup();

        let mut out = Map::new();
        for k in keys {
            let merged = three_way_merge(lm.get(k), cm.get(k), bm.get(k), owner);
            if let Some(v) = merged {
                out.insert(k.clone(), v);
            }
        }
        return if out.is_empty() {
            None
        } else {
            Some(Value::Object(out))
        };
    }

    leaf_merge(local, cloud, base, owner)
}

fn leaf_merge(
    local: Option<&Value>,
    cloud: Option<&Value>,
    base: Option<&Value>,
    owner: DataOwner,
) -> Option<Value> {
    let has_local_changed = !opt_semantic_eq(local, base);
    let has_cloud_changed = !opt_semantic_eq(cloud, base);

    match (has_local_changed, has_cloud_changed) {
        (true, true) => owner_value(local, cloud, owner),
        (true, false) => local.cloned(),
        (false, true) => cloud.cloned(),
        (false, false) => owner_value(local, cloud, owner),
    }
}

fn owner_value(local: Option<&Value>, cloud: Option<&Value>, owner: DataOwner) -> Option<Value> {
    match owner {
        DataOwner::Local => local.or(cloud).cloned(),
        DataOwner::Cloud => cloud.or(local).cloned(),
    }
}

fn opt_semantic_eq(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => semantic_eq(x, y),
        _ => false,
    }
}
