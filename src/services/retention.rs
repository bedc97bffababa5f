//! Periodic cleanup of checkout state nobody came back for: drafts the
//! customer walked away from and payments whose gateway never returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::checkout::DraftStore;
use crate::payment::PendingPaymentStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Retention {
    /// How long a draft may sit untouched.
    pub draft_ttl: Duration,
    /// How long to wait for a gateway to send the customer back.
    pub pending_payment_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            draft_ttl: Duration::from_secs(2 * 60 * 60),
            pending_payment_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

fn cutoff(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl).ok().and_then(|ttl| now.checked_sub_signed(ttl))
}

/// One pass over both stores; returns `(drafts, pending payments)` evicted.
pub async fn sweep(drafts: &DraftStore, pending: &dyn PendingPaymentStore, retention: &Retention, now: DateTime<Utc>) -> (usize, usize) {
    let stale_drafts = match cutoff(now, retention.draft_ttl) {
        Some(cutoff) => drafts.evict_idle(cutoff).await,
        None => 0,
    };
    let stale_payments = cutoff(now, retention.pending_payment_ttl).map_or(0, |cutoff| pending.evict_before(cutoff));
    if stale_drafts + stale_payments > 0 {
        info!(drafts = stale_drafts, pending_payments = stale_payments, "Evicted stale checkout state");
    } else {
        debug!("Nothing to evict");
    }
    (stale_drafts, stale_payments)
}

pub fn spawn_sweeper(drafts: Arc<DraftStore>, pending: Arc<dyn PendingPaymentStore>, retention: Retention) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(retention.sweep_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            sweep(&drafts, pending.as_ref(), &retention, Utc::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::customer;
    use crate::domain::aggregates::cart::tests::item;
    use crate::domain::aggregates::{CheckoutDraft, PaymentMethod};
    use crate::domain::value_objects::Money;
    use crate::payment::{InMemoryPendingStore, PendingPayment};

    fn pending_payment(order_id: &str, created_at: DateTime<Utc>) -> PendingPayment {
        PendingPayment {
            order_id: order_id.into(), session_id: "s1".into(), method: PaymentMethod::Vnpay,
            amount: Money::default(), transaction_ref: None, created_at,
        }
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_expired_state() {
        let drafts = DraftStore::new();
        drafts.insert(&customer(), CheckoutDraft::new("s1", "VND", vec![item("P1", 100_000, 1, true)]).unwrap()).await;
        let pending = InMemoryPendingStore::new();
        let now = Utc::now();
        pending.remember(pending_payment("old", now - chrono::Duration::hours(25)));
        pending.remember(pending_payment("recent", now - chrono::Duration::hours(1)));
        let retention = Retention::default();

        assert_eq!(sweep(&drafts, &pending, &retention, now).await, (0, 1));
        assert_eq!(drafts.len().await, 1);
        assert!(pending.find("recent").is_some());

        let later = now + chrono::Duration::hours(3);
        assert_eq!(sweep(&drafts, &pending, &retention, later).await, (1, 0));
        assert_eq!(drafts.len().await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_runs_on_its_own() {
        let drafts = Arc::new(DraftStore::new());
        drafts.insert(&customer(), CheckoutDraft::new("s1", "VND", vec![item("P1", 100_000, 1, true)]).unwrap()).await;
        let retention = Retention { draft_ttl: Duration::ZERO, sweep_interval: Duration::from_millis(10), ..Retention::default() };
        let handle = spawn_sweeper(drafts.clone(), Arc::new(InMemoryPendingStore::new()), retention);
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        assert_eq!(drafts.len().await, 0);
    }
}
