//! Keep-alive ticker: a `KeepAlive` to every viewer at a fixed period, so
//! idle connections are not reaped by proxies.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::hub::HubHandle;

/// Submit a heartbeat every `period` until the hub stops.
///
/// The first heartbeat goes out one period after start.
pub async fn run_heartbeat(hub: HubHandle, period: Duration) {
    let mut ticks = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticks.tick().await;

    loop {
        ticks.tick().await;
        if hub.heartbeat().await.is_err() {
            info!("Hub closed, heartbeat stopping");
            return;
        }
    }
}

/// Spawn [`run_heartbeat`] on its own task.
pub fn spawn_heartbeat(hub: HubHandle, period: Duration) -> JoinHandle<()> {
    tokio::spawn(run_heartbeat(hub, period))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use lotsync_store::{CounterStore, MemoryCounterStore};

    use super::*;
    use crate::hub::Hub;
    use crate::model::{Counter, ViewerMessage};

    #[tokio::test(start_paused = true)]
    async fn viewers_receive_keep_alive() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let hub = Hub::new([Counter::new("A", 0, 10)], store, Duration::from_millis(500));
        let (handle, _task) = hub.spawn(16);
        let (_, mut inbox) = handle.connect_viewer(8).await.unwrap();
        assert!(matches!(
            inbox.recv().await,
            Some(ViewerMessage::FullStateUpdate { .. })
        ));

        let _beat = spawn_heartbeat(handle, Duration::from_secs(5));
        assert_eq!(inbox.recv().await, Some(ViewerMessage::KeepAlive));
        assert_eq!(inbox.recv().await, Some(ViewerMessage::KeepAlive));
    }
}
