//! ReaperLoop - Lease 期限切れの回収
//!
//! # フロー
//! 1. TaskStore::scan() で Locked ∧ 未完了 ∧ now - lease_time > timeout の task を取得
//! 2. 1 件ずつ cas_update() で Unlocked + lease_time=None に戻す
//! 3. 1 件の失敗（読み込み・CAS 競合）は他の task の回収を止めない
//!
//! 完了済み task はロック状態に関わらず触らない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::{CotalkError, StoreError, TaskRecord};
use crate::ports::{Clock, TaskStore};

pub struct LeaseReaper {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl LeaseReaper {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// One pass over the store. Returns how many leases were reclaimed.
    pub async fn sweep(&self, timeout: Duration) -> Result<usize, CotalkError> {
        let now = self.clock.now();
        let expired = |task: &TaskRecord| task.lease_expired(now, timeout);
        let stale = self.store.scan(&expired).await?;

        let mut reclaimed = 0;
        for task in stale {
            let result = self
                .store
                .cas_update(&task.id, task.version, Box::new(|t: &mut TaskRecord| t.unlock()))
                .await;
            match result {
                Ok(_) => {
                    reclaimed += 1;
                    tracing::info!(task_id = %task.id, leased_at = ?task.lease_time, "stale lease reclaimed");
                }
                // touched since the scan; the next sweep re-evaluates it
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(task_id = %task.id, "task changed during sweep, skipping");
                }
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "failed to reclaim lease");
                }
            }
        }
        Ok(reclaimed)
    }
}

/// Handle of the background sweep task.
/// - `request_shutdown()` で次の tick を待たずに止まる
/// - `shutdown_and_join()` で終了まで待てる
pub struct ReaperLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperLoop {
    /// Start sweeping every `interval`. The first sweep runs immediately.
    pub fn spawn(reaper: Arc<LeaseReaper>, interval: Duration, timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tracing::info!(
            interval_secs = interval.as_secs(),
            timeout_secs = timeout.as_secs(),
            "starting lease reaper"
        );
        let join = tokio::spawn(reaper_loop(reaper, interval, timeout, shutdown_rx));
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "lease reaper task failed");
        }
    }
}

async fn reaper_loop(
    reaper: Arc<LeaseReaper>,
    interval: Duration,
    timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped: nobody can stop us any more, so stop now
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match reaper.sweep(timeout).await {
            Ok(0) => {}
            Ok(reclaimed) => tracing::info!(reclaimed, "sweep finished"),
            Err(e) => tracing::warn!(error = %e, "sweep failed"),
        }
    }
    tracing::info!("lease reaper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LeaseStatus, TaskId};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};

    const TIMEOUT: Duration = Duration::from_secs(15 * 60);

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn task(id: &str) -> TaskRecord {
        TaskRecord::new(TaskId::parse(id).unwrap(), format!("{id}.png"))
    }

    fn locked_at(id: &str, at: DateTime<Utc>) -> TaskRecord {
        let mut t = task(id);
        t.lock(at);
        t
    }

    #[tokio::test]
    async fn reclaims_exactly_the_expired_leases() {
        let mut completed_locked = locked_at("done", noon() - chrono::Duration::hours(2));
        completed_locked.mark_completed();
        let originals = vec![
            locked_at("stale", noon() - chrono::Duration::minutes(16)),
            locked_at("boundary", noon() - chrono::Duration::minutes(15)),
            locked_at("fresh", noon() - chrono::Duration::minutes(1)),
            task("idle"),
            completed_locked,
        ];
        let store = Arc::new(InMemoryTaskStore::with_records(originals.clone()));
        let reaper = LeaseReaper::new(store.clone(), Arc::new(FixedClock::new(noon())));

        assert_eq!(reaper.sweep(TIMEOUT).await.unwrap(), 1);

        for original in originals {
            let now = store.get(&original.id).await.unwrap();
            if original.id.as_str() == "stale" {
                assert_eq!(now.status, LeaseStatus::Unlocked);
                assert_eq!(now.lease_time, None);
                assert_eq!(now.version, original.version + 1);
            } else {
                assert_eq!(now, original, "{} must not be touched", original.id);
            }
        }
    }

    #[tokio::test]
    async fn locked_without_lease_time_is_reclaimed() {
        // hand-edited record: Locked but no lock_time, so its age is unknown
        let mut legacy = task("legacy");
        legacy.status = LeaseStatus::Locked;
        let mut legacy_done = task("legacy-done");
        legacy_done.status = LeaseStatus::Locked;
        legacy_done.mark_completed();
        let store = Arc::new(InMemoryTaskStore::with_records([legacy.clone(), legacy_done.clone()]));
        let reaper = LeaseReaper::new(store.clone(), Arc::new(FixedClock::new(noon())));

        assert_eq!(reaper.sweep(TIMEOUT).await.unwrap(), 1);

        let reclaimed = store.get(&legacy.id).await.unwrap();
        assert_eq!(reclaimed.status, LeaseStatus::Unlocked);
        assert_eq!(reclaimed.version, legacy.version + 1);
        assert_eq!(store.get(&legacy_done.id).await.unwrap(), legacy_done);
    }

    #[tokio::test]
    async fn second_sweep_is_a_no_op() {
        let store = Arc::new(InMemoryTaskStore::with_records([locked_at(
            "stale",
            noon() - chrono::Duration::hours(1),
        )]));
        let reaper = LeaseReaper::new(store, Arc::new(FixedClock::new(noon())));

        assert_eq!(reaper.sweep(TIMEOUT).await.unwrap(), 1);
        assert_eq!(reaper.sweep(TIMEOUT).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lease_expires_as_the_clock_advances() {
        let clock = Arc::new(FixedClock::new(noon()));
        let store = Arc::new(InMemoryTaskStore::with_records([locked_at("a", noon())]));
        let reaper = LeaseReaper::new(store, clock.clone());

        clock.advance(chrono::Duration::minutes(15));
        assert_eq!(reaper.sweep(TIMEOUT).await.unwrap(), 0);
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(reaper.sweep(TIMEOUT).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn loop_sweeps_and_stops_on_request() {
        let store = Arc::new(InMemoryTaskStore::with_records([locked_at(
            "stale",
            noon() - chrono::Duration::hours(1),
        )]));
        let reaper = Arc::new(LeaseReaper::new(store.clone(), Arc::new(FixedClock::new(noon()))));

        let handle = ReaperLoop::spawn(reaper, Duration::from_millis(10), TIMEOUT);
        let id = TaskId::parse("stale").unwrap();
        let reclaimed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if store.get(&id).await.unwrap().status == LeaseStatus::Unlocked {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reclaimed.is_ok(), "reaper never reclaimed the lease");

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown_and_join())
            .await
            .expect("reaper did not stop");
    }
}
