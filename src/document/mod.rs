//! C1 — shadow document model: parse/serialize, update semantics, delta, three-way merge.

mod delta;
mod merge;
mod three_way;

pub use delta::{compute_delta, is_meaningful};
pub use merge::{apply_patch, PatchOutcome};
pub use three_way::{three_way_merge, DataOwner};

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Root-counted-as-0 nesting limit on `state.{reported,desired}` (§3).
pub const MAX_STATE_DEPTH: usize = 6;

/// Default/hard-ceiling document size, in bytes (§3, §6).
pub const DEFAULT_DOCUMENT_SIZE_LIMIT: usize = 8 * 1024;
pub const MAX_DOCUMENT_SIZE_LIMIT: usize = 30 * 1024;

const TOP_LEVEL_KEYS: &[&str] = &["state", "metadata", "version", "clientToken", "timestamp"];

/// One side (`reported` or `desired`) of `state` or `metadata`.
pub type Side = Option<Value>;

/// The logical shadow document: reported/desired state, their metadata mirror, and version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShadowDocument {
    pub reported: Side,
    pub desired: Side,
    pub metadata_reported: Side,
    pub metadata_desired: Side,
    pub version: u64,
}

impl ShadowDocument {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Serialize to the wire shape: `{state: {reported, desired}, metadata: {...}, version}`.
    pub fn to_json(&self) -> Value {
        let mut state = Map::new();
        if let Some(r) = &self.reported {
            state.insert("reported".into(), r.clone());
        }
        if let Some(d) = &self.desired {
            state.insert("desired".into(), d.clone());
        }

        let mut metadata = Map::new();
        if let Some(r) = &self.metadata_reported {
            metadata.insert("reported".into(), r.clone());
        }
        if let Some(d) = &self.metadata_desired {
            metadata.insert("desired".into(), d.clone());
        }

        let mut root = Map::new();
        root.insert("state".into(), Value::Object(state));
        root.insert("metadata".into(), Value::Object(metadata));
        root.insert("version".into(), Value::from(self.version));
        Value::Object(root)
    }

    /// Parse a stored document back from its serialized wire shape. Tolerant of
    /// absent `state`/`metadata` objects (an empty document serializes to `{}`/`{}`).
    pub fn from_stored_json(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::InvalidJson("stored document root is not an object".into()))?;

        let state = obj.get("state").and_then(Value::as_object);
        let metadata = obj.get("metadata").and_then(Value::as_object);
        let version = obj
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or_default();

        Ok(Self {
            reported: state.and_then(|s| s.get("reported")).cloned(),
            desired: state.and_then(|s| s.get("desired")).cloned(),
            metadata_reported: metadata.and_then(|m| m.get("reported")).cloned(),
            metadata_desired: metadata.and_then(|m| m.get("desired")).cloned(),
            version,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_json()).expect("shadow document always serializes")
    }
}

/// A parsed, validated update request body.
#[derive(Debug, Clone)]
pub struct UpdatePatch {
    pub reported: Side,
    pub desired: Side,
    /// Caller-supplied expected version, if any.
    pub version: Option<u64>,
    pub client_token: Option<String>,
}

/// Parse and validate an incoming update payload per §4.1's parse/serialize rules.
pub fn parse_update_payload(bytes: &[u8]) -> Result<UpdatePatch> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::InvalidJson(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidJson("payload root must be an object".into()))?;

    for k in obj.keys() {
        if !TOP_LEVEL_KEYS.contains(&k.as_str()) {
            return Err(Error::InvalidJson(format!("unknown top-level key: {k}")));
        }
    }

    let state = obj
        .get("state")
        .ok_or_else(|| Error::InvalidJson("missing `state`".into()))?
        .as_object()
        .ok_or_else(|| Error::InvalidJson("`state` must be an object".into()))?;

    let reported = state.get("reported").cloned();
    let desired = state.get("desired").cloned();

    if let Some(r) = &reported {
        check_depth(r, 0)?;
    }
    if let Some(d) = &desired {
        check_depth(d, 0)?;
    }

    let version = obj.get("version").and_then(Value::as_u64);
    let client_token = obj
        .get("clientToken")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(UpdatePatch {
        reported,
        desired,
        version,
        client_token,
    })
}

/// `state` nests to at most 6 levels below the root (root counted as 0). A `null`
/// leaf terminates recursion immediately — it deletes, it never nests further.
fn check_depth(value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_STATE_DEPTH {
        return Err(Error::TooDeep {
            max: MAX_STATE_DEPTH,
        });
    }
    if let Value::Object(map) = value {
        for v in map.values() {
            check_depth(v, depth + 1)?;
        }
    }
    Ok(())
}

/// Structural equality with numeric semantic equality at leaves: `1` and `1.0`
/// compare equal even though they are different `serde_json::Number` reprs.
pub(crate) fn semantic_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
                if xi == yi {
                    return true;
                }
            }
            if let (Some(xu), Some(yu)) = (x.as_u64(), y.as_u64()) {
                if xu == yu {
                    return true;
                }
            }
            matches!((x.as_f64(), y.as_f64()), (Some(xf), Some(yf)) if xf == yf)
        }
        (Value::Object(x), Value::Object(y)) => {
            if x.len() != y.len() {
                return false;
            }
            x.iter()
                .all(|(k, v)| y.get(k).is_some_and(|w| semantic_eq(v, w)))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(v, w)| semantic_eq(v, w))
        }
        _ => a == b,
    }
}

pub(crate) fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
