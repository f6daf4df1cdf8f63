//! Shadow identity: `(thing_name, shadow_name)` validation per §3.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9:_-]+$").expect("static regex"));

/// The unnamed, "classic" shadow of a thing.
pub const CLASSIC_SHADOW: &str = "";

/// Validate a thing name: `[A-Za-z0-9:_-]{1,128}`.
pub fn validate_thing_name(thing: &str) -> Result<()> {
    if thing.is_empty() || thing.len() > 128 || !NAME_CHARS.is_match(thing) {
        return Err(Error::InvalidName(format!("invalid thing name: {thing}")));
    }
    Ok(())
}

/// Validate a shadow name: empty (classic) or `[A-Za-z0-9:_-]{1,64}`.
pub fn validate_shadow_name(shadow: &str) -> Result<()> {
    if shadow.is_empty() {
        return Ok(());
    }
    if shadow.len() > 64 || !NAME_CHARS.is_match(shadow) {
        return Err(Error::InvalidName(format!("invalid shadow name: {shadow}")));
    }
    Ok(())
}

/// Validate both halves of a shadow identity.
pub fn validate_identity(thing: &str, shadow: &str) -> Result<()> {
    validate_thing_name(thing)?;
    validate_shadow_name(shadow)?;
    Ok(())
}

/// A `(thing, shadow)` key, used throughout the queue, write gate, and store.
pub type ShadowKey = (String, String);

pub fn key(thing: &str, shadow: &str) -> ShadowKey {
    (thing.to_string(), shadow.to_string())
}
