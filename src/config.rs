//! A.3 — process-wide configuration surface (§6). Loading from a file and
//! watching it for changes are out-of-scope collaborators; this module owns
//! only the struct, its defaults, and an atomically-swappable snapshot handle
//! (Design Note 9: "a configuration snapshot handed to C6 workers at loop
//! entry, replaced on config change via atomic swap, not captured on
//! per-request creation").

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

use crate::document::DataOwner;
use crate::document::{DEFAULT_DOCUMENT_SIZE_LIMIT, MAX_DOCUMENT_SIZE_LIMIT};

/// Which side wins a two-sided conflict, and which side a directional
/// recovery request pushes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Between,
    DeviceToCloud,
    CloudToDevice,
}

impl Direction {
    /// The tie-breaker a three-way merge uses under this direction. `Between`
    /// has no fixed owner at the config level; callers pick one explicitly
    /// (full reconcile requests carry their own `DataOwner`, conventionally
    /// `Cloud` to prefer the server's view absent a merge result).
    pub fn default_owner(self) -> DataOwner {
        match self {
            Direction::Between => DataOwner::Cloud,
            Direction::DeviceToCloud => DataOwner::Local,
            Direction::CloudToDevice => DataOwner::Cloud,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Strategy {
    #[default]
    Realtime,
    Periodic { delay: u64 },
}

/// The device-thing's own shadows: `synchronize.coreThing`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreThing {
    #[serde(default = "default_true")]
    pub classic: bool,
    #[serde(default, rename = "namedShadows")]
    pub named_shadows: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// A sibling device's shadows to synchronize: `synchronize.shadowDocuments`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShadowDocuments {
    pub thing: String,
    #[serde(default)]
    pub classic: bool,
    #[serde(default, rename = "namedShadows")]
    pub named_shadows: Vec<String>,
}

/// One entry of `synchronize.shadowDocumentsMap` — the same shape as
/// [`ShadowDocuments`] with the thing name supplied by the map key instead of
/// a field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShadowDocumentsEntry {
    #[serde(default)]
    pub classic: bool,
    #[serde(default, rename = "namedShadows")]
    pub named_shadows: Vec<String>,
}

/// `synchronize.*` and top-level keys of §6, one struct per recognized key.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default, rename = "synchronize")]
    pub synchronize: SynchronizeConfig,

    #[serde(default = "default_document_size_limit", rename = "shadowDocumentSizeLimitBytes")]
    pub shadow_document_size_limit_bytes: usize,

    #[serde(default = "default_disk_limit_mb", rename = "maxDiskUtilizationMegaBytes")]
    pub max_disk_utilization_mega_bytes: u64,
}

fn default_document_size_limit() -> usize {
    DEFAULT_DOCUMENT_SIZE_LIMIT
}

fn default_disk_limit_mb() -> u64 {
    16
}

impl Default for Config {
    fn default() -> Self {
        Self {
            synchronize: SynchronizeConfig::default(),
            shadow_document_size_limit_bytes: default_document_size_limit(),
            max_disk_utilization_mega_bytes: default_disk_limit_mb(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynchronizeConfig {
    #[serde(default, rename = "coreThing")]
    pub core_thing: CoreThing,
    #[serde(default, rename = "shadowDocuments")]
    pub shadow_documents: Vec<ShadowDocuments>,
    #[serde(default, rename = "shadowDocumentsMap")]
    pub shadow_documents_map: HashMap<String, ShadowDocumentsEntry>,
    #[serde(default, rename = "direction")]
    pub direction: Direction,
    #[serde(default, rename = "strategy")]
    pub strategy: Strategy,
    #[serde(default, rename = "provideSyncStatus")]
    pub provide_sync_status: bool,
    #[serde(
        default = "default_max_outbound_rate",
        rename = "maxOutboundSyncUpdatesPerSecond"
    )]
    pub max_outbound_sync_updates_per_second: u32,
}

fn default_max_outbound_rate() -> u32 {
    400
}

impl Default for SynchronizeConfig {
    fn default() -> Self {
        Self {
            core_thing: CoreThing::default(),
            shadow_documents: Vec::new(),
            shadow_documents_map: HashMap::new(),
            direction: Direction::default(),
            strategy: Strategy::default(),
            provide_sync_status: false,
            max_outbound_sync_updates_per_second: default_max_outbound_rate(),
        }
    }
}

impl SynchronizeConfig {
    /// `shadowDocuments` and `shadowDocumentsMap` are two equivalent wire
    /// shapes for the same setting (§6); callers that need the combined set
    /// of sibling things to synchronize should use this rather than reading
    /// `shadow_documents` alone.
    pub fn effective_shadow_documents(&self) -> Vec<ShadowDocuments> {
        let mut docs = self.shadow_documents.clone();
        docs.extend(self.shadow_documents_map.iter().map(|(thing, entry)| ShadowDocuments {
            thing: thing.clone(),
            classic: entry.classic,
            named_shadows: entry.named_shadows.clone(),
        }));
        docs
    }
}

impl Config {
    /// Clamp the configured document size limit to the hard ceiling (§3, §6).
    pub fn effective_document_size_limit(&self) -> usize {
        self.shadow_document_size_limit_bytes.min(MAX_DOCUMENT_SIZE_LIMIT)
    }
}

/// An atomically-swappable `Config` snapshot. Readers call [`ConfigHandle::snapshot`]
/// once per operation rather than holding the lock across I/O.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.read().clone()
    }

    pub fn replace(&self, config: Config) {
        *self.inner.write() = Arc::new(config);
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
