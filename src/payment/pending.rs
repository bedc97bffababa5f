//! Identifiers kept between the gateway redirect and the return callback.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::domain::aggregates::PaymentMethod;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayment {
    pub order_id: String,
    pub session_id: String,
    pub method: PaymentMethod,
    pub amount: Money,
    /// Gateway-side reference, when the gateway uses its own id in the return URL.
    pub transaction_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub trait PendingPaymentStore: Send + Sync {
    fn remember(&self, payment: PendingPayment);
    /// Looks a payment up by order id or gateway reference.
    fn find(&self, reference: &str) -> Option<PendingPayment>;
    fn forget(&self, order_id: &str) -> Option<PendingPayment>;
    /// Drops records created before `cutoff`; returns how many went.
    fn evict_before(&self, cutoff: DateTime<Utc>) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryPendingStore {
    payments: Mutex<HashMap<String, PendingPayment>>,
}

impl InMemoryPendingStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.payments().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Every write is a single map operation, so a poisoned map is still usable.
    fn payments(&self) -> MutexGuard<'_, HashMap<String, PendingPayment>> {
        self.payments.lock().unwrap_or_else(|poisoned| {
            warn!("Pending payment store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl PendingPaymentStore for InMemoryPendingStore {
    fn remember(&self, payment: PendingPayment) {
        self.payments().insert(payment.order_id.clone(), payment);
    }

    fn find(&self, reference: &str) -> Option<PendingPayment> {
        let payments = self.payments();
        payments.get(reference).cloned().or_else(|| {
            payments.values().find(|p| p.transaction_ref.as_deref() == Some(reference)).cloned()
        })
    }

    fn forget(&self, order_id: &str) -> Option<PendingPayment> {
        self.payments().remove(order_id)
    }

    fn evict_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut payments = self.payments();
        let before = payments.len();
        payments.retain(|_, p| p.created_at >= cutoff);
        before - payments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    fn pending(order_id: &str, transaction_ref: Option<&str>) -> PendingPayment {
        PendingPayment {
            order_id: order_id.into(), session_id: "s1".into(), method: PaymentMethod::Zalopay,
            amount: Money::default(), transaction_ref: transaction_ref.map(str::to_string), created_at: Utc::now(),
        }
    }

    #[test]
    fn test_evicts_abandoned_payments() {
        let store = InMemoryPendingStore::new();
        store.remember(PendingPayment { created_at: Utc::now() - Duration::hours(30), ..pending("old", None) });
        store.remember(pending("fresh", None));
        assert_eq!(store.evict_before(Utc::now() - Duration::hours(24)), 1);
        assert!(store.find("old").is_none());
        assert!(store.find("fresh").is_some());
    }

    #[test]
    fn test_poisoned_lock_still_serves() {
        let store = std::sync::Arc::new(InMemoryPendingStore::new());
        store.remember(pending("o1", None));
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.payments.lock().unwrap();
            panic!("poison the lock");
        }).join();
        assert!(store.payments.is_poisoned());
        assert_eq!(store.find("o1").unwrap().order_id, "o1");
        store.remember(pending("o2", None));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_find_by_order_or_reference() {
        let store = InMemoryPendingStore::new();
        store.remember(pending("o1", Some("250101_o1")));
        assert_eq!(store.find("o1").unwrap().order_id, "o1");
        assert_eq!(store.find("250101_o1").unwrap().order_id, "o1");
        assert!(store.find("o2").is_none());
        assert!(store.forget("o1").is_some());
        assert!(store.is_empty());
    }
}
