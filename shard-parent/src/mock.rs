//! Mock collaborators for registry tests.
//!
//! The deployer records every deploy and upgrade and can be told to fail or
//! to hold deploys until released. The client serves canned per-shard lists.

use crate::client::ChildClient;
use crate::deployer::ShardDeployer;
use async_trait::async_trait;
use shard_core::ChunkedPayload;
use shard_types::{
    codec, ApiError, ChildModule, ChunkResponse, Identity, InviteAttendeeResponse,
    JoinedAttendeeResponse, ShardInit,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct DeployerInner {
    deployed: Vec<(ShardInit, Vec<u8>)>,
    upgraded: Vec<Identity>,
    fail_next_deploy: Option<String>,
    failing_upgrades: HashSet<Identity>,
    gate: Option<Arc<Notify>>,
}

/// Deployer that records calls instead of creating shards.
#[derive(Debug, Default)]
pub struct MockDeployer {
    inner: Mutex<DeployerInner>,
}

impl MockDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Init arguments of every successful deploy, in order.
    pub fn deployed(&self) -> Vec<ShardInit> {
        let inner = self.inner.lock().unwrap();
        inner.deployed.iter().map(|(init, _)| init.clone()).collect()
    }

    /// Module bytes of every successful deploy, in order.
    pub fn deployed_modules(&self) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.deployed.iter().map(|(_, bytes)| bytes.clone()).collect()
    }

    /// Shards upgraded so far.
    pub fn upgraded(&self) -> Vec<Identity> {
        self.inner.lock().unwrap().upgraded.clone()
    }

    /// Cause the next deploy to fail with the given message.
    pub fn fail_next_deploy(&self, message: &str) {
        self.inner.lock().unwrap().fail_next_deploy = Some(message.to_string());
    }

    /// Cause every upgrade of `shard` to fail.
    pub fn fail_upgrade_of(&self, shard: Identity) {
        self.inner.lock().unwrap().failing_upgrades.insert(shard);
    }

    /// Block deploys until the returned handle is notified once.
    pub fn hold_deploys(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.inner.lock().unwrap().gate = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl ShardDeployer for MockDeployer {
    async fn deploy(&self, module: &ChildModule, init: ShardInit) -> Result<Identity, ApiError> {
        let gate = self.inner.lock().unwrap().gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = inner.fail_next_deploy.take() {
            return Err(ApiError::unexpected("DEPLOY_FAILED", message));
        }
        inner.deployed.push((init, module.bytes.clone()));
        Ok(Identity::random())
    }

    async fn upgrade(&self, shard: Identity, _module: &ChildModule) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_upgrades.contains(&shard) {
            return Err(ApiError::unexpected("UPGRADE_FAILED", "install rejected"));
        }
        inner.upgraded.push(shard);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ClientInner {
    joined: HashMap<(Identity, Identity), Vec<JoinedAttendeeResponse>>,
    invites: HashMap<(Identity, Identity), Vec<InviteAttendeeResponse>>,
    failing: HashSet<Identity>,
    closed: Vec<Identity>,
    requests: usize,
}

/// Child client serving canned lists.
#[derive(Debug, Default)]
pub struct MockChildClient {
    inner: Mutex<ClientInner>,
}

impl MockChildClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `list` as the attendees of `event` on `shard`.
    pub fn set_joined(&self, shard: Identity, event: Identity, list: Vec<JoinedAttendeeResponse>) {
        self.inner.lock().unwrap().joined.insert((shard, event), list);
    }

    /// Serve `list` as the invites of `event` on `shard`.
    pub fn set_invites(&self, shard: Identity, event: Identity, list: Vec<InviteAttendeeResponse>) {
        self.inner.lock().unwrap().invites.insert((shard, event), list);
    }

    /// Make every request to `shard` fail.
    pub fn fail_shard(&self, shard: Identity) {
        self.inner.lock().unwrap().failing.insert(shard);
    }

    /// Shards told to close, in order.
    pub fn closed(&self) -> Vec<Identity> {
        self.inner.lock().unwrap().closed.clone()
    }

    /// Number of requests served or refused.
    pub fn requests(&self) -> usize {
        self.inner.lock().unwrap().requests
    }

    fn check(&self, shard: &Identity) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests += 1;
        if inner.failing.contains(shard) {
            return Err(ApiError::unexpected("SHARD_UNREACHABLE", "shard did not answer"));
        }
        Ok(())
    }
}

fn serve<T: serde::Serialize>(list: &[T], chunk: u64, max_bytes: usize) -> Result<ChunkResponse, ApiError> {
    let payload = ChunkedPayload::new(codec::encode(list)?, max_bytes)?;
    let (index, bytes) = payload.chunk(chunk)?;
    Ok(ChunkResponse {
        index,
        total_chunks: payload.total_chunks(),
        bytes: bytes.to_vec(),
    })
}

#[async_trait]
impl ChildClient for MockChildClient {
    async fn chunked_join_data(
        &self,
        shard: Identity,
        event: Identity,
        chunk: u64,
        max_bytes: usize,
    ) -> Result<ChunkResponse, ApiError> {
        self.check(&shard)?;
        let list = self
            .inner
            .lock()
            .unwrap()
            .joined
            .get(&(shard, event))
            .cloned()
            .unwrap_or_default();
        serve(&list, chunk, max_bytes)
    }

    async fn chunked_invite_data(
        &self,
        shard: Identity,
        event: Identity,
        chunk: u64,
        max_bytes: usize,
    ) -> Result<ChunkResponse, ApiError> {
        self.check(&shard)?;
        let list = self
            .inner
            .lock()
            .unwrap()
            .invites
            .get(&(shard, event))
            .cloned()
            .unwrap_or_default();
        serve(&list, chunk, max_bytes)
    }

    async fn attendees_count(
        &self,
        shard: Identity,
        events: Vec<Identity>,
    ) -> Result<Vec<(Identity, usize)>, ApiError> {
        self.check(&shard)?;
        let inner = self.inner.lock().unwrap();
        Ok(events
            .into_iter()
            .map(|event| (event, inner.joined.get(&(shard, event)).map_or(0, Vec::len)))
            .collect())
    }

    async fn invites_count(
        &self,
        shard: Identity,
        events: Vec<Identity>,
    ) -> Result<Vec<(Identity, usize)>, ApiError> {
        self.check(&shard)?;
        let inner = self.inner.lock().unwrap();
        Ok(events
            .into_iter()
            .map(|event| (event, inner.invites.get(&(shard, event)).map_or(0, Vec::len)))
            .collect())
    }

    async fn close_shard(&self, shard: Identity) -> Result<u64, ApiError> {
        self.check(&shard)?;
        self.inner.lock().unwrap().closed.push(shard);
        Ok(0)
    }
}
