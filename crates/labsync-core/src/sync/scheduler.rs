//! Background loop that turns timer ticks and reconnects into passes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::events::{SyncEvent, SyncTrigger};
use super::orchestrator::SyncOrchestrator;
use crate::network::{ConnectivityChange, NetworkMonitor};

/// Spawn the scheduler.
///
/// Runs a pass on start, every `interval`, and whenever the network comes
/// back. Connectivity transitions are forwarded to the orchestrator's
/// listeners. Cancellation is observed between passes; a pass in flight
/// always runs to completion.
pub fn spawn_scheduler(
    orchestrator: Arc<SyncOrchestrator>,
    network: NetworkMonitor,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut changes = network.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Sync scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(change) => {
                        orchestrator.emit(SyncEvent::ConnectivityChanged(change));
                        if change == ConnectivityChange::WentOnline {
                            orchestrator.run_pass(SyncTrigger::Reconnect).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Scheduler missed connectivity changes");
                        if network.is_online() {
                            orchestrator.run_pass(SyncTrigger::Reconnect).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    orchestrator.run_pass(SyncTrigger::Timer).await;
                }
            }
        }
        info!("Sync scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::config::SyncSettings;
    use crate::queue::OperationQueue;
    use crate::remote::MemoryRemote;
    use crate::resolver::LastWriteWins;
    use crate::storage::{LocalStore, PlatformCapabilities};
    use crate::types::Operation;
    use serde_json::json;

    fn setup(online: bool) -> (Arc<SyncOrchestrator>, OperationQueue, NetworkMonitor, MemoryRemote) {
        let store = LocalStore::new(PlatformCapabilities::in_memory());
        store.initialize().unwrap();
        let queue = OperationQueue::new(store.clone());
        let network = NetworkMonitor::new(online);
        let remote = MemoryRemote::new();
        let orchestrator = Arc::new(SyncOrchestrator::new(
            queue.clone(),
            CacheManager::new(store),
            Arc::new(remote.clone()),
            Arc::new(LastWriteWins),
            network.clone(),
            SyncSettings::default(),
        ));
        (orchestrator, queue, network, remote)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_triggers_pass() {
        let (orchestrator, queue, network, remote) = setup(false);
        queue
            .enqueue("patients", "p1", Operation::Create, json!({"name": "Jane"}))
            .unwrap();

        let cancel = CancellationToken::new();
        let task = spawn_scheduler(
            orchestrator.clone(),
            network.clone(),
            Duration::from_secs(3600),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(remote.get("patients", "p1").is_none());

        network.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(remote.get("patients", "p1").is_some());
        assert_eq!(queue.pending_count().unwrap(), 0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_triggers_pass() {
        let (orchestrator, queue, network, remote) = setup(true);
        let cancel = CancellationToken::new();
        let task = spawn_scheduler(orchestrator, network, Duration::from_secs(30), cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        queue
            .enqueue("orders", "o1", Operation::Create, json!({}))
            .unwrap();
        assert!(remote.get("orders", "o1").is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(remote.get("orders", "o1").is_some());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connectivity_changes_are_forwarded() {
        let (orchestrator, _queue, network, _remote) = setup(true);
        let mut events = orchestrator.subscribe();
        let cancel = CancellationToken::new();
        let task = spawn_scheduler(
            orchestrator.clone(),
            network.clone(),
            Duration::from_secs(3600),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        network.set_online(false);

        let forwarded = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(SyncEvent::ConnectivityChanged(change)) = events.recv().await {
                    return change;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(forwarded, ConnectivityChange::WentOffline);

        cancel.cancel();
        task.await.unwrap();
    }
}
