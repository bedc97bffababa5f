//! Order history and lifecycle actions.
//!
//! The local state machine only screens requests; the backend decides.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::api::{Credentials, OrderQuery, Page, PaymentReport, StorefrontApi};
use crate::domain::aggregates::{Order, OrderStatus};
use crate::publisher::EventPublisher;
use crate::Result;

pub struct OrderService {
    api: Arc<dyn StorefrontApi>,
    publisher: Arc<dyn EventPublisher>,
}

impl OrderService {
    pub fn new(api: Arc<dyn StorefrontApi>, publisher: Arc<dyn EventPublisher>) -> Self { Self { api, publisher } }

    #[instrument(skip(self, auth))]
    pub async fn list(&self, auth: &Credentials, query: &OrderQuery) -> Result<Page<Order>> {
        Ok(self.api.list_orders(auth, &query.normalized()).await?)
    }

    #[instrument(skip(self, auth))]
    pub async fn get(&self, auth: &Credentials, order_id: &str) -> Result<Order> { Ok(self.api.get_order(auth, order_id).await?) }

    #[instrument(skip(self, auth))]
    pub async fn cancel(&self, auth: &Credentials, order_id: &str, reason: &str) -> Result<Order> {
        let mut order = self.api.get_order(auth, order_id).await?;
        order.cancel(reason)?;
        let updated = self.api.cancel_order(auth, order_id, reason.trim()).await?;
        if updated.status() != OrderStatus::Cancelled {
            warn!(status = %updated.status(), "Backend accepted cancellation but order is not cancelled");
        }
        info!(order_number = %updated.order_number(), "Order cancelled");
        self.publisher.publish_all(order.take_events()).await;
        Ok(updated)
    }

    /// Admin status change; the backend decides whether `auth` may make it.
    #[instrument(skip(self, auth))]
    pub async fn transition(&self, auth: &Credentials, order_id: &str, next: OrderStatus) -> Result<Order> {
        let mut order = self.api.get_order(auth, order_id).await?;
        let from = order.status();
        order.transition_to(next)?;
        let updated = self.api.update_order_status(auth, order_id, next).await?;
        info!(%from, to = %updated.status(), "Order status updated");
        self.publisher.publish_all(order.take_events()).await;
        Ok(updated)
    }

    #[instrument(skip(self, auth))]
    pub async fn payment_status(&self, auth: &Credentials, order_id: &str) -> Result<PaymentReport> {
        Ok(self.api.payment_status(auth, order_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{customer, FakeApi};
    use crate::domain::aggregates::order::tests::order;
    use crate::domain::aggregates::{OrderError, PaymentMethod, PaymentStatus};
    use crate::publisher::RecordingPublisher;
    use crate::StorefrontError;

    fn service(api: Arc<FakeApi>) -> (OrderService, Arc<RecordingPublisher>) {
        let events = Arc::new(RecordingPublisher::default());
        (OrderService::new(api, events.clone()), events)
    }

    #[tokio::test]
    async fn test_cancel_pending_order() {
        let api = Arc::new(FakeApi::default());
        api.insert_order(order(OrderStatus::Pending, PaymentMethod::Cod));
        let (svc, events) = service(api.clone());
        let cancelled = svc.cancel(&customer(), "ord-1", "  changed mind ").await.unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason(), Some("changed mind"));
        assert_eq!(events.kinds(), vec!["order.status_changed", "order.cancelled"]);
    }

    #[tokio::test]
    async fn test_cancel_shipped_order_is_refused_locally() {
        let api = Arc::new(FakeApi::default());
        api.insert_order(order(OrderStatus::Shipped, PaymentMethod::Cod));
        let (svc, events) = service(api.clone());
        let err = svc.cancel(&customer(), "ord-1", "too late").await.unwrap_err();
        assert_eq!(err, StorefrontError::Order(OrderError::CannotCancel(OrderStatus::Shipped)));
        assert_eq!(api.order("ord-1").unwrap().status(), OrderStatus::Shipped);
        assert!(events.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_requires_reason() {
        let api = Arc::new(FakeApi::default());
        api.insert_order(order(OrderStatus::Processing, PaymentMethod::Vnpay));
        let (svc, _) = service(api);
        assert_eq!(svc.cancel(&customer(), "ord-1", "   ").await.unwrap_err(), StorefrontError::Order(OrderError::MissingCancelReason));
    }

    #[tokio::test]
    async fn test_transition_follows_table() {
        let api = Arc::new(FakeApi::default());
        api.insert_order(order(OrderStatus::Pending, PaymentMethod::Cod));
        let (svc, _) = service(api);
        assert_eq!(svc.transition(&customer(), "ord-1", OrderStatus::Processing).await.unwrap().status(), OrderStatus::Processing);
        assert_eq!(svc.transition(&customer(), "ord-1", OrderStatus::Shipped).await.unwrap().status(), OrderStatus::Shipped);
        let err = svc.transition(&customer(), "ord-1", OrderStatus::Pending).await.unwrap_err();
        assert_eq!(err, StorefrontError::Order(OrderError::InvalidTransition { from: OrderStatus::Shipped, to: OrderStatus::Pending }));
    }

    #[tokio::test]
    async fn test_unknown_order_and_payment_status() {
        let api = Arc::new(FakeApi::default());
        let (svc, _) = service(api.clone());
        assert!(matches!(svc.get(&customer(), "missing").await, Err(StorefrontError::Api(crate::api::ApiError::NotFound(_)))));
        api.insert_order(order(OrderStatus::Pending, PaymentMethod::Momo));
        assert_eq!(svc.payment_status(&customer(), "ord-1").await.unwrap().status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_orders_are_scoped_to_caller() {
        let api = Arc::new(FakeApi::default());
        api.insert_order(order(OrderStatus::Pending, PaymentMethod::Cod));
        let (svc, _) = service(api.clone());
        let stranger = Credentials::bearer("stranger").unwrap();
        assert_eq!(svc.list(&stranger, &OrderQuery::default()).await.unwrap().total, 0);
        assert!(matches!(svc.cancel(&stranger, "ord-1", "not mine").await, Err(StorefrontError::Api(crate::api::ApiError::NotFound(_)))));
        assert_eq!(api.order("ord-1").unwrap().status(), OrderStatus::Pending);
        assert_eq!(svc.list(&customer(), &OrderQuery::default()).await.unwrap().total, 1);
    }
}
