//! Order Aggregate
//!
//! Status graph:
//!
//! ```text
//! pending -> processing -> shipped -> delivered -> returned
//!    |            |           |
//!    +------------+-----------+--> cancelled --(admin)--> pending
//! ```

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{CouponCode, Money};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Processing, Shipped, Delivered, Cancelled, Returned }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod { Cod, Momo, Zalopay, Vnpay }

/// Badge color used by the storefront and the admin order table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor { Yellow, Blue, Purple, Green, Red, Orange, Gray }

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [Self::Pending, Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled, Self::Returned];

    pub fn allowed_next(self) -> &'static [OrderStatus] {
        match self {
            Self::Pending => &[Self::Processing, Self::Cancelled],
            Self::Processing => &[Self::Shipped, Self::Cancelled],
            Self::Shipped => &[Self::Delivered, Self::Cancelled],
            Self::Delivered => &[Self::Returned],
            Self::Cancelled => &[Self::Pending],
            Self::Returned => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool { self.allowed_next().contains(&next) }

    pub fn is_terminal(self) -> bool { self.allowed_next().is_empty() }

    /// Statuses a customer may still cancel from.
    pub fn is_cancellable(self) -> bool { matches!(self, Self::Pending | Self::Processing) }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Returned => "returned",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Awaiting confirmation",
            Self::Processing => "Processing",
            Self::Shipped => "Shipping",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
            Self::Returned => "Returned",
        }
    }

    pub fn color(self) -> StatusColor {
        match self {
            Self::Pending => StatusColor::Yellow,
            Self::Processing => StatusColor::Blue,
            Self::Shipped => StatusColor::Purple,
            Self::Delivered => StatusColor::Green,
            Self::Cancelled => StatusColor::Red,
            Self::Returned => StatusColor::Orange,
        }
    }
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self { Self::Pending => "pending", Self::Paid => "paid", Self::Failed => "failed", Self::Refunded => "refunded" }
    }
    pub fn label(self) -> &'static str {
        match self { Self::Pending => "Unpaid", Self::Paid => "Paid", Self::Failed => "Payment failed", Self::Refunded => "Refunded" }
    }
    pub fn color(self) -> StatusColor {
        match self { Self::Pending => StatusColor::Yellow, Self::Paid => StatusColor::Green, Self::Failed => StatusColor::Red, Self::Refunded => StatusColor::Gray }
    }
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [Self::Cod, Self::Momo, Self::Zalopay, Self::Vnpay];

    /// Methods settled through an external gateway.
    pub fn is_online(self) -> bool { !matches!(self, Self::Cod) }

    pub fn as_str(self) -> &'static str {
        match self { Self::Cod => "cod", Self::Momo => "momo", Self::Zalopay => "zalopay", Self::Vnpay => "vnpay" }
    }
    pub fn label(self) -> &'static str {
        match self { Self::Cod => "Cash on delivery", Self::Momo => "MoMo wallet", Self::Zalopay => "ZaloPay", Self::Vnpay => "VNPay" }
    }
}

macro_rules! str_enum {
    ($ty:ty, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
        }
        impl FromStr for $ty {
            type Err = UnknownVariant;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL.iter().copied().find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| UnknownVariant { kind: $what, value: s.to_string() })
            }
        }
    };
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [Self::Pending, Self::Paid, Self::Failed, Self::Refunded];
}

str_enum!(OrderStatus, "order status");
str_enum!(PaymentStatus, "payment status");
str_enum!(PaymentMethod, "payment method");

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant { pub kind: &'static str, pub value: String }

/// Recipient and delivery address collected in the shipping step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct ShippingInfo {
    #[validate(length(min = 1, max = 100, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "Email address is invalid"))]
    pub email: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(length(min = 1, max = 255, message = "Address is required"))]
    pub address: String,
    pub ward: Option<String>,
    #[validate(length(min = 1, message = "District is required"))]
    pub district: String,
    #[validate(length(min = 1, message = "Province is required"))]
    pub province: String,
    #[validate(length(max = 500, message = "Note is too long"))]
    pub note: Option<String>,
}

/// Vietnamese mobile numbers: `0` or `+84` followed by 9-10 digits.
fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let phone: String = phone.chars().filter(|c| !c.is_whitespace() && *c != '.' && *c != '-').collect();
    let digits = phone.strip_prefix("+84").or_else(|| phone.strip_prefix('0'));
    match digits {
        Some(rest) if (9..=10).contains(&rest.len()) && rest.chars().all(|c| c.is_ascii_digit()) => Ok(()),
        _ => {
            let mut err = ValidationError::new("phone");
            err.message = Some(Cow::from("Phone number is invalid"));
            Err(err)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub image: Option<String>,
    pub quantity: u32,
    pub price: Money,
}

impl OrderItem {
    pub fn line_total(&self) -> Money { self.price.multiply(self.quantity) }
}

/// Everything the backend reports about an order, already normalized.
#[derive(Clone, Debug)]
pub struct OrderParts {
    pub id: String,
    pub order_number: String,
    pub shipping: ShippingInfo,
    pub items: Vec<OrderItem>,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub shipping_fee: Money,
    pub discount: Money,
    pub total_amount: Money,
    pub coupon_code: Option<CouponCode>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: String,
    order_number: String,
    shipping: ShippingInfo,
    items: Vec<OrderItem>,
    order_status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: PaymentMethod,
    shipping_fee: Money,
    discount: Money,
    total_amount: Money,
    coupon_code: Option<CouponCode>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl Order {
    pub fn restore(parts: OrderParts) -> Self {
        Self {
            id: parts.id, order_number: parts.order_number, shipping: parts.shipping, items: parts.items,
            order_status: parts.order_status, payment_status: parts.payment_status, payment_method: parts.payment_method,
            shipping_fee: parts.shipping_fee, discount: parts.discount, total_amount: parts.total_amount,
            coupon_code: parts.coupon_code, cancel_reason: parts.cancel_reason,
            created_at: parts.created_at, updated_at: parts.updated_at, events: vec![],
        }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn shipping(&self) -> &ShippingInfo { &self.shipping }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn status(&self) -> OrderStatus { self.order_status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn shipping_fee(&self) -> &Money { &self.shipping_fee }
    pub fn discount(&self) -> &Money { &self.discount }
    pub fn total_amount(&self) -> &Money { &self.total_amount }
    pub fn coupon_code(&self) -> Option<&CouponCode> { self.coupon_code.as_ref() }
    pub fn cancel_reason(&self) -> Option<&str> { self.cancel_reason.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Advisory check; the backend has the final say.
    pub fn can_cancel(&self) -> bool { self.order_status.is_cancellable() }

    /// Customer cancellation.
    pub fn cancel(&mut self, reason: &str) -> Result<(), OrderError> {
        let reason = reason.trim();
        if reason.is_empty() { return Err(OrderError::MissingCancelReason); }
        if !self.can_cancel() { return Err(OrderError::CannotCancel(self.order_status)); }
        let from = self.order_status;
        self.order_status = OrderStatus::Cancelled;
        self.cancel_reason = Some(reason.to_string());
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id.clone(), from, to: OrderStatus::Cancelled }));
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id.clone(), reason: reason.to_string() }));
        Ok(())
    }

    /// Admin transition along the status graph.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        let from = self.order_status;
        if !from.can_transition_to(next) { return Err(OrderError::InvalidTransition { from, to: next }); }
        if next == OrderStatus::Delivered && self.payment_method.is_online() && self.payment_status != PaymentStatus::Paid {
            return Err(OrderError::PaymentRequired(self.payment_method));
        }
        self.order_status = next;
        if from == OrderStatus::Cancelled { self.cancel_reason = None; }
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id.clone(), from, to: next }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order can no longer be cancelled (status: {0})")]
    CannotCancel(OrderStatus),
    #[error("A cancellation reason is required")]
    MissingCancelReason,
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Order paid by {0} must be paid before delivery")]
    PaymentRequired(PaymentMethod),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal::Decimal;

    pub(crate) fn shipping() -> ShippingInfo {
        ShippingInfo {
            full_name: "Nguyen Van A".into(), email: "a@example.com".into(), phone: "0901234567".into(),
            address: "12 Le Loi".into(), ward: Some("Ben Nghe".into()), district: "Quan 1".into(),
            province: "Ho Chi Minh".into(), note: None,
        }
    }

    pub(crate) fn order(status: OrderStatus, method: PaymentMethod) -> Order {
        let now = Utc::now();
        Order::restore(OrderParts {
            id: "ord-1".into(), order_number: "YS-1001".into(), shipping: shipping(),
            items: vec![OrderItem { product_id: "p1".into(), name: "Yen tinh che".into(), image: None, quantity: 2, price: Money::vnd(Decimal::new(400_000, 0)) }],
            order_status: status, payment_status: PaymentStatus::Pending, payment_method: method,
            shipping_fee: Money::vnd(Decimal::new(30_000, 0)), discount: Money::default(), total_amount: Money::vnd(Decimal::new(830_000, 0)),
            coupon_code: None, cancel_reason: None, created_at: now, updated_at: now,
        })
    }

    #[test]
    fn test_transition_table() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Shipped.can_transition_to(Cancelled));
        assert!(Cancelled.can_transition_to(Pending));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Processing.can_transition_to(Pending));
        assert!(Returned.is_terminal());
        assert!(!Cancelled.is_terminal());
    }

    #[test]
    fn test_can_cancel_only_pending_or_processing() {
        for status in OrderStatus::ALL {
            let o = order(status, PaymentMethod::Cod);
            assert_eq!(o.can_cancel(), matches!(status, OrderStatus::Pending | OrderStatus::Processing), "{status}");
        }
        assert!(!order(OrderStatus::Shipped, PaymentMethod::Cod).can_cancel());
    }

    #[test]
    fn test_cancel_sets_reason() {
        let mut o = order(OrderStatus::Pending, PaymentMethod::Cod);
        o.cancel("changed mind").unwrap();
        assert_eq!(o.status(), OrderStatus::Cancelled);
        assert_eq!(o.cancel_reason(), Some("changed mind"));
        let events = o.take_events();
        assert!(events.contains(&DomainEvent::Order(OrderEvent::Cancelled { order_id: "ord-1".into(), reason: "changed mind".into() })));
    }

    #[test]
    fn test_cancel_rejected() {
        let mut o = order(OrderStatus::Shipped, PaymentMethod::Cod);
        assert_eq!(o.cancel("late"), Err(OrderError::CannotCancel(OrderStatus::Shipped)));
        let mut o = order(OrderStatus::Pending, PaymentMethod::Cod);
        assert_eq!(o.cancel("  "), Err(OrderError::MissingCancelReason));
        assert_eq!(o.status(), OrderStatus::Pending);
    }

    #[test]
    fn test_online_order_must_be_paid_before_delivery() {
        let mut o = order(OrderStatus::Shipped, PaymentMethod::Vnpay);
        assert_eq!(o.transition_to(OrderStatus::Delivered), Err(OrderError::PaymentRequired(PaymentMethod::Vnpay)));
        o.payment_status = PaymentStatus::Paid;
        o.transition_to(OrderStatus::Delivered).unwrap();

        let mut cod = order(OrderStatus::Shipped, PaymentMethod::Cod);
        cod.transition_to(OrderStatus::Delivered).unwrap();
    }

    #[test]
    fn test_revival_clears_reason() {
        let mut o = order(OrderStatus::Pending, PaymentMethod::Cod);
        o.cancel("duplicate").unwrap();
        o.transition_to(OrderStatus::Pending).unwrap();
        assert_eq!(o.cancel_reason(), None);
        assert_eq!(o.transition_to(OrderStatus::Shipped), Err(OrderError::InvalidTransition { from: OrderStatus::Pending, to: OrderStatus::Shipped }));
    }

    #[test]
    fn test_enum_parsing_and_labels() {
        assert_eq!("ZaloPay".parse::<PaymentMethod>().unwrap(), PaymentMethod::Zalopay);
        assert!("paypal".parse::<PaymentMethod>().is_err());
        assert_eq!(OrderStatus::Delivered.color(), StatusColor::Green);
        assert_eq!(PaymentStatus::Refunded.label(), "Refunded");
    }

    #[test]
    fn test_shipping_validation() {
        assert!(shipping().validate().is_ok());
        let bad = ShippingInfo { phone: "12345".into(), email: "nope".into(), ..shipping() };
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("phone"));
        assert!(fields.contains_key("email"));
        assert!(validate_phone("+84 912 345 678").is_ok());
    }
}
