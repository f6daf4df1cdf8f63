//! Update semantics (§4.1, steps 1-4): deep-merge a patch into stored state
//! with null-as-delete, bottom-up pruning of emptied objects, a mirrored
//! metadata patch, and the version bump.

use serde_json::{json, Map, Value};

use super::{ShadowDocument, UpdatePatch};

/// Result of applying an update patch: the new document (version already
/// bumped to the caller-supplied `next_version`) and the metadata patch that
/// feeds the `accepted` notification.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub document: ShadowDocument,
    pub metadata_patch: Value,
}

/// Apply `patch` to `stored`, producing the next document.
pub fn apply_patch(
    stored: &ShadowDocument,
    patch: &UpdatePatch,
    next_version: u64,
    now: u64,
) -> PatchOutcome {
    let mut document = stored.clone();
    let mut metadata_patch = Map::new();

    if let Some(rp) = &patch.reported {
        let (new_state, new_meta) = merge_with_metadata(
            stored.reported.as_ref(),
            stored.metadata_reported.as_ref(),
            rp,
            now,
        );
        document.reported = new_state;
        document.metadata_reported = new_meta;
        metadata_patch.insert("reported".to_string(), metadata_shape(rp, now));
    }

    if let Some(dp) = &patch.desired {
        let (new_state, new_meta) = merge_with_metadata(
            stored.desired.as_ref(),
            stored.metadata_desired.as_ref(),
            dp,
            now,
        );
        document.desired = new_state;
        document.metadata_desired = new_meta;
        metadata_patch.insert("desired".to_string(), metadata_shape(dp, now));
    }

    document.version = next_version;

    PatchOutcome {
        document,
        metadata_patch: Value::Object(metadata_patch),
    }
}

/// Deep-merge `patch` into `(stored_state, stored_meta)` together, producing
/// the new state and the new metadata in lockstep: an explicit `null` removes
/// the key (in both), objects merge recursively, everything else (array,
/// number, string, bool) replaces wholesale. Objects that become empty are
/// pruned to absent.
///
/// Walking state and metadata together — rather than merging metadata
/// against the old metadata tree independently — is what makes a runtime
/// type change (scalar → object or back) replace the metadata subtree instead
/// of splicing a stale sibling key into it (§4.1, step 3).
fn merge_with_metadata(
    stored_state: Option<&Value>,
    stored_meta: Option<&Value>,
    patch: &Value,
    now: u64,
) -> (Option<Value>, Option<Value>) {
    match patch {
        Value::Null => (None, None),
        Value::Object(patch_map) => {
            let prior_was_object = matches!(stored_state, Some(Value::Object(_)));

            let mut state_result = match stored_state {
                Some(Value::Object(sm)) => sm.clone(),
                _ => Map::new(),
            };
            let mut meta_result = if prior_was_object {
                match stored_meta {
                    Some(Value::Object(mm)) => mm.clone(),
                    _ => Map::new(),
                }
            } else {
                Map::new()
            };

            for (k, v) in patch_map {
                let child_state = state_result.get(k);
                let child_meta = meta_result.get(k);
                let (new_state, new_meta) = merge_with_metadata(child_state, child_meta, v, now);

                match new_state {
                    Some(s) => {
                        state_result.insert(k.clone(), s);
                    }
                    None => {
                        state_result.remove(k);
                    }
                }
                match new_meta {
                    Some(m) => {
                        meta_result.insert(k.clone(), m);
                    }
                    None => {
                        meta_result.remove(k);
                    }
                }
            }

            let state_out = (!state_result.is_empty()).then(|| Value::Object(state_result));
            let meta_out = (!meta_result.is_empty()).then(|| Value::Object(meta_result));
            (state_out, meta_out)
        }
        other => (Some(other.clone()), Some(json!({ "timestamp": now }))),
    }
}

/// Transform a state patch into the shape of its metadata patch: every leaf
/// becomes `{timestamp: now}`, nulls are preserved (so `merge_side` deletes
/// the mirrored metadata entry), and objects recurse to stay shape-aligned.
/// Arrays are leaves here too — they replace wholesale, never diffed by index.
fn metadata_shape(patch: &Value, now: u64) -> Value {
    match patch {
        Value::Null => Value::Null,
        Value::Object(m) => {
            Value::Object(m.iter().map(|(k, v)| (k.clone(), metadata_shape(v, now))).collect())
        }
        _ => json!({ "timestamp": now }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(reported: Option<Value>, desired: Option<Value>) -> UpdatePatch {
        UpdatePatch {
            reported,
            desired,
            version: None,
            client_token: None,
        }
    }

    #[test]
    fn create_from_empty() {
        let stored = ShadowDocument::empty();
        let p = patch(Some(json!({"x": 1})), None);
        let outcome = apply_patch(&stored, &p, 1, 1000);
        assert_eq!(outcome.document.reported, Some(json!({"x": 1})));
        assert_eq!(outcome.document.version, 1);
        assert_eq!(
            outcome.document.metadata_reported,
            Some(json!({"x": {"timestamp": 1000}}))
        );
    }

    #[test]
    fn null_deletes_leaf_and_its_metadata() {
        let stored = ShadowDocument {
            reported: Some(json!({"x": 1, "y": 2})),
            metadata_reported: Some(json!({"x": {"timestamp": 1}, "y": {"timestamp": 1}})),
            version: 5,
            ..Default::default()
        };
        let p = patch(Some(json!({"x": null})), None);
        let outcome = apply_patch(&stored, &p, 6, 2000);
        assert_eq!(outcome.document.reported, Some(json!({"y": 2})));
        assert_eq!(
            outcome.document.metadata_reported,
            Some(json!({"y": {"timestamp": 1}}))
        );
        assert_eq!(outcome.document.version, 6);
    }

    #[test]
    fn deleting_the_only_key_prunes_side_to_absent() {
        let stored = ShadowDocument {
            reported: Some(json!({"x": 1})),
            metadata_reported: Some(json!({"x": {"timestamp": 1}})),
            version: 1,
            ..Default::default()
        };
        let p = patch(Some(json!({"x": null})), None);
        let outcome = apply_patch(&stored, &p, 2, 3000);
        assert_eq!(outcome.document.reported, None);
        assert_eq!(outcome.document.metadata_reported, None);
    }

    #[test]
    fn nested_object_merges_recursively() {
        let stored = ShadowDocument {
            reported: Some(json!({"a": {"x": 1, "y": 2}})),
            version: 1,
            ..Default::default()
        };
        let p = patch(Some(json!({"a": {"x": 9}})), None);
        let outcome = apply_patch(&stored, &p, 2, 0);
        assert_eq!(outcome.document.reported, Some(json!({"a": {"x": 9, "y": 2}})));
    }

    #[test]
    fn array_replaces_wholesale() {
        let stored = ShadowDocument {
            reported: Some(json!({"a": [1, 2, 3]})),
            version: 1,
            ..Default::default()
        };
        let p = patch(Some(json!({"a": [9]})), None);
        let outcome = apply_patch(&stored, &p, 2, 0);
        assert_eq!(outcome.document.reported, Some(json!({"a": [9]})));
    }

    #[test]
    fn type_change_replaces_metadata_subtree() {
        let stored = ShadowDocument {
            reported: Some(json!({"a": 1})),
            metadata_reported: Some(json!({"a": {"timestamp": 1}})),
            version: 1,
            ..Default::default()
        };
        let p = patch(Some(json!({"a": {"nested": 2}})), None);
        let outcome = apply_patch(&stored, &p, 2, 500);
        assert_eq!(outcome.document.reported, Some(json!({"a": {"nested": 2}})));
        assert_eq!(
            outcome.document.metadata_reported,
            Some(json!({"a": {"nested": {"timestamp": 500}}}))
        );
    }
}
