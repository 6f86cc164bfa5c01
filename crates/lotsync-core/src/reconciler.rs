//! Periodic reconciliation trigger.
//!
//! Reconciliation is the safety net for notifications the store dropped.
//! This module only decides *when* to run it: the first firing lands on the
//! next occurrence of a wall-clock time in the local time zone (midnight by
//! default), then repeats at a fixed interval. The work itself happens on the
//! hub as a [`HubEvent::Reconcile`](crate::hub::HubEvent).

use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::{ConfigError, ReconcileConfig};
use crate::hub::HubHandle;

/// When reconciliations fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSchedule {
    /// Local wall-clock time of the first firing.
    pub at: NaiveTime,
    /// Time between firings.
    pub interval: Duration,
}

impl ReconcileSchedule {
    /// Build a schedule from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `at` is not a valid time of day.
    pub fn from_config(config: &ReconcileConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            at: config.at_time()?,
            interval: config.interval(),
        })
    }
}

/// Time from `now` until the next occurrence of `at`, strictly in the future.
///
/// A wall-clock time skipped by a daylight-saving jump moves to the next day
/// on which it exists; a repeated one fires at its earlier instance.
pub fn next_delay<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> Duration {
    let today = now.date_naive();
    for offset in 0..=2 {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        let Some(fire) = now
            .timezone()
            .from_local_datetime(&date.and_time(at))
            .earliest()
        else {
            continue;
        };
        if fire > *now {
            return fire
                .signed_duration_since(now)
                .to_std()
                .unwrap_or(Duration::ZERO);
        }
    }
    Duration::from_secs(86_400)
}

/// Submit a reconciliation on `schedule` until the hub stops.
pub async fn run_reconciler(hub: HubHandle, schedule: ReconcileSchedule) {
    let delay = next_delay(&Local::now(), schedule.at);
    info!(
        at = %schedule.at,
        first_in_secs = delay.as_secs(),
        interval_secs = schedule.interval.as_secs(),
        "Reconciler scheduled"
    );

    let start = Instant::now().checked_add(delay).unwrap_or_else(Instant::now);
    let mut ticks = tokio::time::interval_at(start, schedule.interval.max(Duration::from_secs(1)));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;
        debug!("Requesting scheduled reconciliation");
        if hub.request_reconcile().await.is_err() {
            info!("Hub closed, reconciler stopping");
            return;
        }
    }
}

/// Spawn [`run_reconciler`] on its own task.
pub fn spawn_reconciler(hub: HubHandle, schedule: ReconcileSchedule) -> JoinHandle<()> {
    tokio::spawn(run_reconciler(hub, schedule))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::{FixedOffset, Utc};
    use lotsync_store::{CounterStore, MemoryCounterStore};

    use super::*;
    use crate::hub::Hub;
    use crate::model::{Counter, ViewerMessage};

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn delay_until_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 23, 0, 0).unwrap();
        assert_eq!(next_delay(&now, time(0, 0)), Duration::from_secs(3600));
    }

    #[test]
    fn delay_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 1, 30, 0).unwrap();
        assert_eq!(next_delay(&now, time(2, 0)), Duration::from_secs(1800));
    }

    #[test]
    fn exact_time_waits_a_full_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(next_delay(&now, time(0, 0)), Duration::from_secs(86_400));
    }

    #[test]
    fn respects_local_offset() {
        let tz = FixedOffset::west_opt(18_000).unwrap();
        let now = tz.with_ymd_and_hms(2024, 6, 1, 22, 15, 0).unwrap();
        assert_eq!(next_delay(&now, time(0, 0)), Duration::from_secs(6300));
    }

    #[test]
    fn schedule_from_config() {
        let config = ReconcileConfig {
            at: String::from("04:45"),
            interval_secs: 600,
        };
        let schedule = ReconcileSchedule::from_config(&config).unwrap();
        assert_eq!(schedule.at, time(4, 45));
        assert_eq!(schedule.interval, Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_run_heals_the_mirror() {
        let store = Arc::new(MemoryCounterStore::new());
        let hub = Hub::new(
            [Counter::new("A", 0, 10)],
            Arc::clone(&store) as Arc<dyn CounterStore>,
            Duration::from_millis(500),
        );
        let (handle, _task) = hub.spawn(16);
        let (_, mut inbox) = handle.connect_viewer(8).await.unwrap();
        let _ = inbox.recv().await;

        store.set_silently("A", 3).unwrap();
        let schedule = ReconcileSchedule {
            at: Local::now().time(),
            interval: Duration::from_secs(60),
        };
        let _reconciler = spawn_reconciler(handle.clone(), schedule);

        let message = inbox.recv().await.unwrap();
        assert_eq!(
            message,
            ViewerMessage::DiffUpdate {
                lot: String::from("A"),
                occupancy: 3
            }
        );
        assert_eq!(handle.snapshot().await.unwrap().occupancy("A"), Some(3));
    }
}
