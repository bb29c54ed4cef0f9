//! Background monitor for abandoned transfers.
//!
//! Transfers never expire on their own. This task periodically reports any
//! channel that has been open longer than the configured threshold so an
//! operator can clear it.

use crate::backup::TransferStatus;
use crate::config::MonitorConfig;
use crate::shard::ChildShard;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Channels of `status` older than `stale_after`, with their age.
pub fn stale_channels(status: &TransferStatus, stale_after: Duration) -> Vec<(&'static str, Duration)> {
    [("upload", status.upload_age), ("backup", status.backup_age)]
        .into_iter()
        .filter_map(|(channel, age)| age.filter(|age| *age >= stale_after).map(|age| (channel, age)))
        .collect()
}

/// Spawn a background transfer monitor for `shard`.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_transfer_monitor(
    shard: Arc<ChildShard>,
    config: MonitorConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Transfer monitor disabled");
            return;
        }

        let stale_after = Duration::from_secs(config.stale_after_secs);
        tracing::info!(
            "Transfer monitor started for {} (interval: {}s)",
            shard.identity(),
            config.interval_secs
        );

        let mut timer = interval(Duration::from_secs(config.interval_secs.max(1)));

        loop {
            timer.tick().await;

            let status = shard.transfer_status().await;
            for (channel, age) in stale_channels(&status, stale_after) {
                tracing::warn!(
                    shard = %shard.identity(),
                    channel,
                    age_secs = age.as_secs(),
                    "Transfer open longer than {}s, clear it if abandoned",
                    stale_after.as_secs()
                );
            }

            let entries = shard.entry_count().await;
            let metrics = shard.metrics().snapshot();
            tracing::debug!(
                shard = %shard.identity(),
                entries,
                ?metrics,
                "Shard metrics"
            );
        }
    })
}
