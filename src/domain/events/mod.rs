//! Domain events
use crate::domain::aggregates::{OrderStatus, PaymentMethod};
use crate::domain::value_objects::CouponCode;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Checkout(CheckoutEvent),
}

impl DomainEvent {
    /// Subject suffix used when the event leaves the process.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
            Self::Order(OrderEvent::PaymentConfirmed { .. }) => "order.payment_confirmed",
            Self::Order(OrderEvent::PaymentFailed { .. }) => "order.payment_failed",
            Self::Checkout(CheckoutEvent::CouponApplied { .. }) => "checkout.coupon_applied",
            Self::Checkout(CheckoutEvent::CouponRemoved { .. }) => "checkout.coupon_removed",
            Self::Checkout(CheckoutEvent::PaymentDispatched { .. }) => "checkout.payment_dispatched",
            Self::Checkout(CheckoutEvent::Completed { .. }) => "checkout.completed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: String, total: Decimal, method: PaymentMethod },
    StatusChanged { order_id: String, from: OrderStatus, to: OrderStatus },
    Cancelled { order_id: String, reason: String },
    PaymentConfirmed { order_id: String },
    PaymentFailed { order_id: Option<String>, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CheckoutEvent {
    CouponApplied { session: String, code: CouponCode, discount: Decimal },
    CouponRemoved { session: String, code: CouponCode },
    PaymentDispatched { session: String, order_id: String, method: PaymentMethod },
    Completed { session: String, order_id: String },
}
