//! The parent registry: shard descriptors, write routing and spawning.
//!
//! Descriptors are keyed by shard identity and projected in
//! `(entry_range.start, principal)` order. Exactly one descriptor is open at
//! any time once the first child exists; replacing it is a two step
//! operation (deploy, then swap under one write guard) so readers never see
//! zero or two open shards.

use crate::client::ChildClient;
use crate::config::ParentConfig;
use crate::deployer::ShardDeployer;
use shard_core::{Clock, MonotonicClock};
use shard_types::{
    ApiError, CanisterType, ChildModule, EntryRange, Identity, ShardDescriptor, ShardInit, WasmVersion,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    pub(crate) shards: HashMap<Identity, ShardDescriptor>,
    pub(crate) child_module: Option<ChildModule>,
    pub(crate) spawning: bool,
}

impl RegistryState {
    pub(crate) fn ordered(&self) -> Vec<&ShardDescriptor> {
        let mut shards: Vec<&ShardDescriptor> = self.shards.values().collect();
        shards.sort_by_key(|d| (d.entry_range.start, d.principal));
        shards
    }

    fn open_shard_except(&self, caller: &Identity) -> Option<&ShardDescriptor> {
        self.ordered()
            .into_iter()
            .find(|d| d.accepts_writes() && d.principal != *caller)
    }
}

/// Parent of a scalable attendee store.
#[derive(Debug)]
pub struct ShardRegistry {
    pub(crate) identity: Identity,
    pub(crate) config: ParentConfig,
    deployer: Arc<dyn ShardDeployer>,
    pub(crate) client: Arc<dyn ChildClient>,
    clock: Arc<dyn Clock>,
    pub(crate) state: RwLock<RegistryState>,
    spawn_lock: Mutex<()>,
}

impl ShardRegistry {
    /// Create an empty registry.
    pub fn new(
        identity: Identity,
        config: ParentConfig,
        deployer: Arc<dyn ShardDeployer>,
        client: Arc<dyn ChildClient>,
    ) -> Self {
        Self {
            identity,
            config,
            deployer,
            client,
            clock: Arc::new(MonotonicClock::new()),
            state: RwLock::new(RegistryState::default()),
            spawn_lock: Mutex::new(()),
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Identity children see as their parent.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Registry configuration.
    pub fn config(&self) -> &ParentConfig {
        &self.config
    }

    fn finish<T>(&self, operation: &str, result: Result<T, ApiError>) -> Result<T, ApiError> {
        result.map_err(|err| {
            let err = err.at(format!("{}/{}", self.config.name, operation));
            if err.is_recoverable() {
                tracing::debug!(registry = %self.identity, operation, error = %err, "call rejected");
            } else {
                tracing::error!(registry = %self.identity, operation, error = %err, "unexpected registry fault");
            }
            err
        })
    }

    fn init_for(&self, start_index: u64) -> ShardInit {
        ShardInit {
            parent: self.identity,
            name: self.config.name.clone(),
            start_index,
        }
    }

    /// Deploy with the spawn flag raised. Must be called under `spawn_lock`.
    async fn deploy_flagged(&self, module: &ChildModule, init: ShardInit) -> Result<Identity, ApiError> {
        self.state.write().await.spawning = true;
        let deployed = self.deployer.deploy(module, init).await;
        self.state.write().await.spawning = false;
        deployed
    }

    // -- child module -----------------------------------------------------

    /// Store a new child module release.
    ///
    /// Returns the version assigned to it.
    pub async fn upload_child_module(&self, bytes: Vec<u8>) -> Result<WasmVersion, ApiError> {
        let result: Result<_, ApiError> = async {
            if bytes.is_empty() {
                return Err(ApiError::validation("bytes", "module must not be empty"));
            }
            let mut state = self.state.write().await;
            let now = self.clock.now();
            let module = match state.child_module.take() {
                Some(current) if current.bytes == bytes => {
                    state.child_module = Some(current);
                    return Err(ApiError::bad_request(
                        "WASM_UNCHANGED",
                        "module is identical to the current release",
                    ));
                }
                Some(current) => ChildModule {
                    label: self.config.module_label.clone(),
                    bytes,
                    wasm_version: current.wasm_version.next(),
                    created_at: current.created_at,
                    updated_at: now,
                },
                None => ChildModule {
                    label: self.config.module_label.clone(),
                    bytes,
                    wasm_version: WasmVersion::None.next(),
                    created_at: now,
                    updated_at: now,
                },
            };
            let version = module.wasm_version;
            state.child_module = Some(module);
            tracing::info!(registry = %self.identity, ?version, "child module uploaded");
            Ok(version)
        }
        .await;
        self.finish("upload_child_module", result)
    }

    /// Version of the stored child module, `WasmVersion::None` if none.
    pub async fn get_latest_wasm_version(&self) -> WasmVersion {
        self.state
            .read()
            .await
            .child_module
            .as_ref()
            .map(|m| m.wasm_version)
            .unwrap_or(WasmVersion::None)
    }

    // -- shards -----------------------------------------------------------

    /// Deploy shard 0 if a module is stored and no shard exists yet.
    ///
    /// Returns the new shard, or `None` when there was nothing to do.
    pub async fn initialize_first_child(&self) -> Result<Option<Identity>, ApiError> {
        let _spawn = self.spawn_lock.lock().await;
        let result: Result<_, ApiError> = async {
            let module = {
                let state = self.state.read().await;
                if !state.shards.is_empty() {
                    return Ok(None);
                }
                match state.child_module.clone() {
                    Some(module) => module,
                    None => {
                        tracing::warn!(registry = %self.identity, "no child module stored, first child not deployed");
                        return Ok(None);
                    }
                }
            };

            let principal = self.deploy_flagged(&module, self.init_for(0)).await?;
            self.state.write().await.shards.insert(
                principal,
                ShardDescriptor {
                    principal,
                    canister_type: CanisterType::ScalableChild,
                    entry_range: EntryRange::open(0),
                    wasm_version: module.wasm_version,
                    is_available: true,
                },
            );
            tracing::info!(registry = %self.identity, shard = %principal, "first child deployed");
            Ok(Some(principal))
        }
        .await;
        self.finish("initialize_first_child", result)
    }

    /// The shard new entries should be written to.
    ///
    /// The caller is skipped so a full shard is never routed to itself.
    pub async fn get_available_canister(&self, caller: Identity) -> Result<ShardDescriptor, ApiError> {
        let result = {
            let state = self.state.read().await;
            match state.open_shard_except(&caller) {
                Some(shard) => Ok(shard.clone()),
                None if state.spawning => Err(ApiError::at_capacity(
                    "SPAWN_IN_PROGRESS",
                    "a new shard is being deployed, retry shortly",
                )),
                None => Err(ApiError::not_found(
                    "NO_AVAILABLE_CANISTER",
                    "no shard is accepting writes",
                )),
            }
        };
        self.finish("get_available_canister", result)
    }

    /// Close `caller` at `last_entry_index` and open a sibling after it.
    ///
    /// `wasm_module` overrides the stored child module when non-empty.
    /// Returns the shard that now accepts writes.
    pub async fn close_child_canister_and_spawn_sibling(
        &self,
        caller: Identity,
        last_entry_index: u64,
        wasm_module: Vec<u8>,
    ) -> Result<Identity, ApiError> {
        let _spawn = self.spawn_lock.lock().await;
        let result: Result<_, ApiError> = async {
            let module = {
                let state = self.state.read().await;
                let current = state.shards.get(&caller).ok_or_else(|| {
                    ApiError::bad_request("UNKNOWN_CANISTER", "caller is not a registered shard")
                })?;

                if !current.entry_range.is_open() {
                    return match state.open_shard_except(&caller) {
                        Some(open) => {
                            tracing::debug!(shard = %caller, sibling = %open.principal, "close retried, sibling already open");
                            Ok(open.principal)
                        }
                        None => Err(ApiError::bad_request(
                            "CANISTER_ALREADY_CLOSED",
                            "shard is closed and no sibling is open",
                        )),
                    };
                }

                let module = resolve_module(
                    state.child_module.as_ref(),
                    wasm_module,
                    &self.config.module_label,
                    self.clock.now(),
                )?;

                if last_entry_index < current.entry_range.start {
                    return Err(ApiError::validation(
                        "last_entry_index",
                        format!(
                            "{} is before the shard start {}",
                            last_entry_index, current.entry_range.start
                        ),
                    ));
                }
                module
            };

            let next_start = last_entry_index.checked_add(1).ok_or_else(|| {
                ApiError::validation("last_entry_index", "no entry index left after this one")
            })?;

            let principal = self.deploy_flagged(&module, self.init_for(next_start)).await?;

            {
                let mut state = self.state.write().await;
                if let Some(closed) = state.shards.get_mut(&caller) {
                    closed.entry_range.end = Some(last_entry_index);
                    closed.is_available = false;
                }
                state.shards.insert(
                    principal,
                    ShardDescriptor {
                        principal,
                        canister_type: CanisterType::ScalableChild,
                        entry_range: EntryRange::open(next_start),
                        wasm_version: module.wasm_version,
                        is_available: true,
                    },
                );
            }

            match self.client.close_shard(caller).await {
                Ok(last) if last > last_entry_index => tracing::warn!(
                    shard = %caller,
                    reported = last_entry_index,
                    last,
                    "closed shard handed out entries past its reported end"
                ),
                Ok(_) => {}
                Err(err) => tracing::warn!(shard = %caller, error = %err, "closed shard did not acknowledge"),
            }
            tracing::info!(
                registry = %self.identity,
                closed = %caller,
                last_entry_index,
                spawned = %principal,
                "shard closed, sibling spawned"
            );
            Ok(principal)
        }
        .await;
        self.finish("close_child_canister_and_spawn_sibling", result)
    }

    /// All shards ordered by range start.
    pub async fn get_canisters(&self) -> Vec<ShardDescriptor> {
        self.state.read().await.ordered().into_iter().cloned().collect()
    }

    /// Reinstall the stored module on `shard`.
    pub async fn upgrade_child_canister(&self, shard: Identity) -> Result<ShardDescriptor, ApiError> {
        let result: Result<_, ApiError> = async {
            let (current, module) = {
                let state = self.state.read().await;
                let current = state.shards.get(&shard).cloned().ok_or_else(|| {
                    ApiError::not_found("NO_CHILDREN", "shard is not registered here")
                })?;
                let module = state.child_module.clone().ok_or_else(|| {
                    ApiError::bad_request("NO_WASM_SPECIFIED", "no child module stored")
                })?;
                (current, module)
            };

            if current.wasm_version == module.wasm_version {
                return Err(ApiError::bad_request(
                    "CANISTER_UP_TO_DATE",
                    "shard already runs the latest module",
                ));
            }

            self.deployer.upgrade(shard, &module).await?;

            let mut state = self.state.write().await;
            let descriptor = state.shards.get_mut(&shard).ok_or_else(|| {
                ApiError::unexpected("NO_CHILDREN", "shard disappeared during upgrade")
            })?;
            descriptor.wasm_version = module.wasm_version;
            tracing::info!(registry = %self.identity, shard = %shard, version = ?module.wasm_version, "shard upgraded");
            Ok(descriptor.clone())
        }
        .await;
        self.finish("upgrade_child_canister", result)
    }

    /// Upgrade every shard that does not run the stored module.
    ///
    /// Each outcome is logged and returned; one failure does not stop the rest.
    pub async fn upgrade_children(&self) -> Vec<(Identity, Result<ShardDescriptor, ApiError>)> {
        let latest = self.get_latest_wasm_version().await;
        let outdated: Vec<Identity> = self
            .get_canisters()
            .await
            .into_iter()
            .filter(|d| d.wasm_version != latest)
            .map(|d| d.principal)
            .collect();

        let mut outcomes = Vec::with_capacity(outdated.len());
        for shard in outdated {
            let outcome = self.upgrade_child_canister(shard).await;
            if let Err(err) = &outcome {
                tracing::warn!(shard = %shard, error = %err, "shard upgrade failed");
            }
            outcomes.push((shard, outcome));
        }
        outcomes
    }
}

/// Pick the module a new sibling is deployed with.
fn resolve_module(
    stored: Option<&ChildModule>,
    wasm_module: Vec<u8>,
    label: &str,
    now: u64,
) -> Result<ChildModule, ApiError> {
    match (stored, wasm_module.is_empty()) {
        (Some(stored), true) => Ok(stored.clone()),
        (None, true) => Err(ApiError::bad_request(
            "NO_WASM_SPECIFIED",
            "no module given and none stored",
        )),
        (Some(stored), false) if stored.bytes == wasm_module => Ok(stored.clone()),
        (_, false) => Ok(ChildModule {
            label: label.to_string(),
            bytes: wasm_module,
            wasm_version: WasmVersion::Custom,
            created_at: now,
            updated_at: now,
        }),
    }
}
