//! Shard bookkeeping owned by the parent registry.

use crate::ids::Identity;
use serde::{Deserialize, Serialize};

/// Kind of module running on a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanisterType {
    /// Created but nothing installed.
    Empty,
    /// Foundation module.
    Foundation,
    /// Custom module.
    Custom,
    /// Child shard of a scalable store.
    ScalableChild,
    /// Parent of a scalable store.
    Scalable,
}

/// Version of the module installed on a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WasmVersion {
    /// Nothing installed.
    None,
    /// Numbered registry release.
    Version(u64),
    /// A module that does not match any registry release.
    Custom,
}

impl WasmVersion {
    /// The release that follows this one.
    pub fn next(&self) -> WasmVersion {
        match self {
            WasmVersion::Version(n) => WasmVersion::Version(n.saturating_add(1)),
            WasmVersion::None | WasmVersion::Custom => WasmVersion::Version(1),
        }
    }
}

/// Logical entry indices a shard is responsible for.
///
/// `end == None` means the shard is open and still accepting writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryRange {
    /// First entry index owned by the shard.
    pub start: u64,
    /// Last entry index, once closed.
    pub end: Option<u64>,
}

impl EntryRange {
    /// An open range starting at `start`.
    pub fn open(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Whether the range still accepts writes.
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// The registry's record of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    /// Shard identity.
    pub principal: Identity,
    /// Module kind.
    pub canister_type: CanisterType,
    /// Entry indices the shard owns.
    pub entry_range: EntryRange,
    /// Installed module version.
    pub wasm_version: WasmVersion,
    /// Whether new writes may be routed here.
    pub is_available: bool,
}

impl ShardDescriptor {
    /// Whether the shard can take new entries.
    pub fn accepts_writes(&self) -> bool {
        self.is_available && self.entry_range.is_open()
    }
}

/// Module the registry installs on new child shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildModule {
    /// Human label.
    pub label: String,
    /// Module bytes.
    pub bytes: Vec<u8>,
    /// Registry release.
    pub wasm_version: WasmVersion,
    /// When the first module was stored.
    pub created_at: u64,
    /// When this release was stored.
    pub updated_at: u64,
}

/// Init arguments passed to a freshly deployed child shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInit {
    /// Registry that owns the shard.
    pub parent: Identity,
    /// Name of the scalable store.
    pub name: String,
    /// First entry index the shard assigns.
    pub start_index: u64,
}
