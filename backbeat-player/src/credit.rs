//! Replay-credit renewal
//!
//! Overplay protection: playing a song costs a credit, and wall-clock time
//! grants them back. The renewal task wakes hourly, works out how many full
//! renewal periods elapsed since the persisted checkpoint, and grants that
//! many credits in one atomic store operation. The checkpoint only ever
//! advances by whole periods, so downtime shorter than a period is never
//! rounded away.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Persistence for the renewal checkpoint and the credit grant itself.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// The persisted renewal checkpoint, if one exists.
    async fn checkpoint(&self) -> Result<Option<DateTime<Utc>>>;

    /// Persist the very first checkpoint.
    async fn init_checkpoint(&self, now: DateTime<Utc>) -> Result<()>;

    /// Advance the checkpoint and grant `intervals` credits to every song,
    /// capped. Both writes must land atomically: a crash must never grant
    /// credits twice or lose a granted interval.
    async fn apply_renewal(&self, new_checkpoint: DateTime<Utc>, intervals: i64) -> Result<()>;
}

/// Periodic credit renewal driver.
pub struct CreditRenewer {
    store: Arc<dyn CreditStore>,
    period: Duration,
}

impl CreditRenewer {
    pub fn new(store: Arc<dyn CreditStore>, renew_hours: u32) -> Self {
        Self {
            store,
            period: Duration::hours(i64::from(renew_hours)),
        }
    }

    /// One renewal check at the given instant.
    ///
    /// Grants one credit per full period elapsed since the checkpoint and
    /// advances the checkpoint by exactly the granted intervals. A clock
    /// that moved backwards grants nothing.
    pub async fn step(&self, now: DateTime<Utc>) -> Result<()> {
        let Some(last) = self.store.checkpoint().await? else {
            self.store.init_checkpoint(now).await?;
            info!("credit checkpoint initialized at {}", now);
            return Ok(());
        };

        let period_secs = self.period.num_seconds();
        let intervals = (now - last).num_seconds().div_euclid(period_secs);
        if intervals <= 0 {
            return Ok(());
        }

        let new_checkpoint = last + Duration::seconds(intervals * period_secs);
        self.store.apply_renewal(new_checkpoint, intervals).await?;
        info!(
            "granted {} credit interval(s), checkpoint advanced to {}",
            intervals, new_checkpoint
        );
        Ok(())
    }

    /// Hourly check loop. The first check runs immediately so a fresh
    /// database gets its checkpoint at startup.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.step(Utc::now()).await {
                warn!("credit renewal failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        inner: Mutex<MemoryInner>,
    }

    #[derive(Default)]
    struct MemoryInner {
        checkpoint: Option<DateTime<Utc>>,
        grants: Vec<i64>,
    }

    #[async_trait]
    impl CreditStore for MemoryStore {
        async fn checkpoint(&self) -> Result<Option<DateTime<Utc>>> {
            Ok(self.inner.lock().unwrap().checkpoint)
        }

        async fn init_checkpoint(&self, now: DateTime<Utc>) -> Result<()> {
            self.inner.lock().unwrap().checkpoint = Some(now);
            Ok(())
        }

        async fn apply_renewal(&self, new_checkpoint: DateTime<Utc>, intervals: i64) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.checkpoint = Some(new_checkpoint);
            inner.grants.push(intervals);
            Ok(())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_first_step_initializes_checkpoint() {
        let store = Arc::new(MemoryStore::default());
        let renewer = CreditRenewer::new(store.clone(), 24);

        renewer.step(at(1_000_000)).await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), Some(at(1_000_000)));
        assert!(store.inner.lock().unwrap().grants.is_empty());
    }

    #[tokio::test]
    async fn test_no_grant_within_one_period() {
        let store = Arc::new(MemoryStore::default());
        store.init_checkpoint(at(0)).await.unwrap();
        let renewer = CreditRenewer::new(store.clone(), 24);

        renewer.step(at(24 * 3600 - 1)).await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), Some(at(0)));
        assert!(store.inner.lock().unwrap().grants.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_elapsed_periods_grant_at_once() {
        let store = Arc::new(MemoryStore::default());
        store.init_checkpoint(at(0)).await.unwrap();
        let renewer = CreditRenewer::new(store.clone(), 24);

        // 2.5 periods later: two intervals granted, half a period kept
        renewer.step(at(60 * 3600)).await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), Some(at(48 * 3600)));
        assert_eq!(store.inner.lock().unwrap().grants, vec![2]);

        // the remaining 12 hours still count towards the next interval
        renewer.step(at(72 * 3600)).await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), Some(at(72 * 3600)));
        assert_eq!(store.inner.lock().unwrap().grants, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_backwards_clock_grants_nothing() {
        let store = Arc::new(MemoryStore::default());
        store.init_checkpoint(at(1_000_000)).await.unwrap();
        let renewer = CreditRenewer::new(store.clone(), 24);

        renewer.step(at(500_000)).await.unwrap();
        assert_eq!(store.checkpoint().await.unwrap(), Some(at(1_000_000)));
        assert!(store.inner.lock().unwrap().grants.is_empty());
    }
}
