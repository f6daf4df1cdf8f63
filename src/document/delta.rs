//! Delta computation: the structural difference where `desired` diverges from `reported`.

use serde_json::{Map, Value};

use super::semantic_eq;

/// `δ = diff(reported, desired)` per §4.1. Structural recursion: at a leaf,
/// include `desired` when it differs from `reported`. A key present on only
/// one side recurses against an absent counterpart — `reported`-absent yields
/// the whole `desired` subtree, `desired`-absent yields a `null` (mirroring
/// the document model's own null-as-delete convention).
///
/// Returns `None` when there is truly nothing to report (both sides absent, or
/// an object comparison where every key converged). A delta that reduces to
/// `Some(Value::Null)` only ever happens at the root, when `desired` is
/// entirely absent — callers treat that the same as "no delta" (§4.1, §4.4).
pub fn compute_delta(reported: Option<&Value>, desired: Option<&Value>) -> Option<Value> {
    diff(reported, desired)
}

fn diff(reported: Option<&Value>, desired: Option<&Value>) -> Option<Value> {
    match (reported, desired) {
        (None, None) => None,
        (None, Some(d)) => Some(d.clone()),
        (Some(_), None) => Some(Value::Null),
        (Some(r), Some(d)) => match (r, d) {
            (Value::Object(rm), Value::Object(dm)) => {
                let mut keys: Vec<&String> = rm.keys().chain(dm.keys()).collect();
                keys.sort();
                keys.dedup();

                let mut out = Map::new();
                for k in keys {
                    if let Some(v) = diff(rm.get(k), dm.get(k)) {
                        out.insert(k.clone(), v);
                    }
                }
                if out.is_empty() {
                    None
                } else {
                    Some(Value::Object(out))
                }
            }
            _ => {
                if semantic_eq(r, d) {
                    None
                } else {
                    Some(d.clone())
                }
            }
        },
    }
}

/// Whether a computed delta is meaningful enough to emit a `delta` notification
/// for — both `None` and the degenerate root `Value::Null` count as "no delta".
pub fn is_meaningful(delta: &Option<Value>) -> bool {
    matches!(delta, Some(v) if !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_sides_have_no_delta() {
        let r = json!({"v": 1});
        let d = json!({"v": 1});
        assert_eq!(compute_delta(Some(&r), Some(&d)), None);
    }

    #[test]
    fn numeric_semantic_equality_avoids_false_delta() {
        let r = json!({"v": 1});
        let d = json!({"v": 1.0});
        assert_eq!(compute_delta(Some(&r), Some(&d)), None);
    }

    #[test]
    fn divergent_leaf_reports_desired_value() {
        let r = json!({"v": 1});
        let d = json!({"v": 2});
        assert_eq!(compute_delta(Some(&r), Some(&d)), Some(json!({"v": 2})));
    }

    #[test]
    fn key_only_in_desired_is_included_wholesale() {
        let r = json!({"a": 1});
        let d = json!({"a": 1, "b": 2});
        assert_eq!(compute_delta(Some(&r), Some(&d)), Some(json!({"b": 2})));
    }

    #[test]
    fn absent_reported_yields_desired_entirely() {
        let d = json!({"v": 2});
        assert_eq!(compute_delta(None, Some(&d)), Some(d));
    }

    #[test]
    fn absent_desired_is_not_meaningful() {
        let r = json!({"v": 1});
        let delta = compute_delta(Some(&r), None);
        assert!(!is_meaningful(&delta));
    }

    #[test]
    fn both_absent_is_no_delta() {
        assert_eq!(compute_delta(None, None), None);
    }

    #[test]
    fn soundness_every_leaf_differs() {
        let r = json!({"a": 1, "b": {"c": 3}});
        let d = json!({"a": 1, "b": {"c": 4}, "e": 5});
        let delta = compute_delta(Some(&r), Some(&d)).unwrap();
        assert_eq!(delta, json!({"b": {"c": 4}, "e": 5}));
    }
}
