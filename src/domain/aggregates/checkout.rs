//! Checkout draft: the in-progress order that lives only for one checkout session.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use validator::{Validate, ValidationErrors};

use crate::domain::aggregates::cart::CartItem;
use crate::domain::aggregates::coupon::{AppliedCoupon, CouponRejection};
use crate::domain::aggregates::order::{PaymentMethod, ShippingInfo};
use crate::domain::events::{CheckoutEvent, DomainEvent};
use crate::domain::value_objects::{CouponCode, CouponCodeError, Money, MoneyError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStep { #[default] Review, Shipping, Payment, Processing, Confirmation }

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Review => "review", Self::Shipping => "shipping", Self::Payment => "payment",
            Self::Processing => "processing", Self::Confirmation => "confirmation",
        };
        f.write_str(s)
    }
}

/// Backend request a draft is currently waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlight { ShippingFee, CouponApply, Submission }

/// The one place order totals are computed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub discount: Money,
    pub total: Money,
}

impl OrderTotals {
    /// `shipping_fee + Σ(price × quantity) − discount`, with the discount clamped to the subtotal.
    pub fn compute<I>(lines: I, shipping_fee: &Money, discount: &Money) -> Result<Self, MoneyError>
    where
        I: IntoIterator<Item = Money>,
    {
        let subtotal = lines.into_iter().try_fold(Money::zero(shipping_fee.currency()), |acc, line| acc.add(&line))?;
        let discount = discount.min(&subtotal)?;
        let total = subtotal.saturating_sub(&discount)?.add(shipping_fee)?;
        Ok(Self { subtotal, shipping_fee: shipping_fee.clone(), discount, total })
    }
}

/// Per-field validation messages, keyed by the camelCase field name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(pub BTreeMap<String, String>);

impl From<ValidationErrors> for FieldErrors {
    fn from(errors: ValidationErrors) -> Self {
        let map = errors.field_errors().into_iter().filter_map(|(field, errs)| {
            let first = errs.first()?;
            let message = first.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| first.code.to_string());
            Some((camel_case(field), message))
        }).collect();
        Self(map)
    }
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' { upper = true; continue; }
        if upper { out.extend(c.to_uppercase()); upper = false; } else { out.push(c); }
    }
    out
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.0.keys().map(String::as_str).collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

/// Order payload derived from a complete draft.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub shipping: ShippingInfo,
    pub items: Vec<CartItem>,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<CouponCode>,
    pub totals: OrderTotals,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutDraft {
    session_id: String,
    items: Vec<CartItem>,
    shipping: Option<ShippingInfo>,
    shipping_fee: Money,
    payment_method: Option<PaymentMethod>,
    coupon: Option<AppliedCoupon>,
    order_id: Option<String>,
    step: CheckoutStep,
    in_flight: Option<InFlight>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl CheckoutDraft {
    pub fn new(session_id: impl Into<String>, currency: &str, items: Vec<CartItem>) -> Result<Self, CheckoutError> {
        let items: Vec<CartItem> = items.into_iter().filter(|i| i.selected && i.quantity > 0).collect();
        if items.is_empty() { return Err(CheckoutError::EmptySelection); }
        let now = Utc::now();
        Ok(Self {
            session_id: session_id.into(), items, shipping: None, shipping_fee: Money::zero(currency),
            payment_method: None, coupon: None, order_id: None, step: CheckoutStep::Review,
            in_flight: None, created_at: now, updated_at: now, events: vec![],
        })
    }

    pub fn session_id(&self) -> &str { &self.session_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn shipping(&self) -> Option<&ShippingInfo> { self.shipping.as_ref() }
    pub fn shipping_fee(&self) -> &Money { &self.shipping_fee }
    pub fn payment_method(&self) -> Option<PaymentMethod> { self.payment_method }
    pub fn coupon(&self) -> Option<&AppliedCoupon> { self.coupon.as_ref() }
    pub fn order_id(&self) -> Option<&str> { self.order_id.as_deref() }
    pub fn step(&self) -> CheckoutStep { self.step }
    pub fn in_flight(&self) -> Option<InFlight> { self.in_flight }
    pub fn currency(&self) -> &str { self.shipping_fee.currency() }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn subtotal(&self) -> Result<Money, MoneyError> {
        self.items.iter().try_fold(Money::zero(self.currency()), |acc, i| acc.add(&i.line_total()))
    }

    pub fn totals(&self) -> Result<OrderTotals, MoneyError> {
        let discount = self.coupon.as_ref().map(|c| c.discount.clone()).unwrap_or_else(|| Money::zero(self.currency()));
        OrderTotals::compute(self.items.iter().map(CartItem::line_total), &self.shipping_fee, &discount)
    }

    pub fn validate_shipping(info: &ShippingInfo) -> Result<(), CheckoutError> {
        info.validate().map_err(|e| CheckoutError::InvalidShipping(e.into()))
    }

    pub fn set_shipping(&mut self, info: ShippingInfo) -> Result<(), CheckoutError> {
        self.ensure_editable()?;
        Self::validate_shipping(&info)?;
        self.shipping = Some(info);
        self.touch();
        Ok(())
    }

    pub fn set_shipping_fee(&mut self, fee: Money) -> Result<(), CheckoutError> {
        self.ensure_editable()?;
        if fee.currency() != self.currency() {
            return Err(MoneyError::CurrencyMismatch { left: self.currency().to_string(), right: fee.currency().to_string() }.into());
        }
        self.shipping_fee = fee;
        self.touch();
        Ok(())
    }

    pub fn select_payment_method(&mut self, method: PaymentMethod) -> Result<(), CheckoutError> {
        self.ensure_editable()?;
        self.payment_method = Some(method);
        self.touch();
        Ok(())
    }

    /// Replaces any coupon already applied.
    pub fn apply_coupon(&mut self, coupon: AppliedCoupon) -> Result<(), CheckoutError> {
        self.ensure_editable()?;
        self.raise_event(DomainEvent::Checkout(CheckoutEvent::CouponApplied {
            session: self.session_id.clone(), code: coupon.code.clone(), discount: coupon.discount.amount(),
        }));
        self.coupon = Some(coupon);
        self.touch();
        Ok(())
    }

    pub fn remove_coupon(&mut self) -> Result<Option<AppliedCoupon>, CheckoutError> {
        self.ensure_editable()?;
        let removed = self.coupon.take();
        if let Some(c) = &removed {
            self.raise_event(DomainEvent::Checkout(CheckoutEvent::CouponRemoved { session: self.session_id.clone(), code: c.code.clone() }));
            self.touch();
        }
        Ok(removed)
    }

    pub fn advance(&mut self) -> Result<CheckoutStep, CheckoutError> {
        let next = match self.step {
            CheckoutStep::Review => CheckoutStep::Shipping,
            CheckoutStep::Shipping => {
                if self.shipping.is_none() { return Err(CheckoutError::MissingShipping); }
                CheckoutStep::Payment
            }
            step => return Err(CheckoutError::InvalidStep { step, action: "advance" }),
        };
        self.step = next;
        self.touch();
        Ok(next)
    }

    pub fn back(&mut self) -> Result<CheckoutStep, CheckoutError> {
        let prev = match self.step {
            CheckoutStep::Shipping => CheckoutStep::Review,
            CheckoutStep::Payment => CheckoutStep::Shipping,
            step => return Err(CheckoutError::InvalidStep { step, action: "go back" }),
        };
        self.step = prev;
        self.touch();
        Ok(prev)
    }

    /// Marks a backend request as pending; a second one is refused until `finish`.
    pub fn begin(&mut self, request: InFlight) -> Result<(), CheckoutError> {
        if let Some(pending) = self.in_flight { return Err(CheckoutError::RequestInFlight(pending)); }
        self.in_flight = Some(request);
        Ok(())
    }

    pub fn finish(&mut self) { self.in_flight = None; }

    /// Payload for order creation; the draft must be on the payment step and complete.
    pub fn order_request(&self) -> Result<NewOrder, CheckoutError> {
        if self.step != CheckoutStep::Payment { return Err(CheckoutError::InvalidStep { step: self.step, action: "submit" }); }
        let shipping = self.shipping.clone().ok_or(CheckoutError::MissingShipping)?;
        let payment_method = self.payment_method.ok_or(CheckoutError::MissingPaymentMethod)?;
        Ok(NewOrder {
            shipping, items: self.items.clone(), payment_method,
            coupon_code: self.coupon.as_ref().map(|c| c.code.clone()), totals: self.totals()?,
        })
    }

    pub fn attach_order(&mut self, order_id: impl Into<String>) {
        self.order_id = Some(order_id.into());
        self.touch();
    }

    /// Waiting on the payment gateway.
    pub fn mark_processing(&mut self) -> Result<(), CheckoutError> {
        let order_id = self.order_id.clone().ok_or(CheckoutError::MissingOrder)?;
        let method = self.payment_method.ok_or(CheckoutError::MissingPaymentMethod)?;
        self.step = CheckoutStep::Processing;
        self.raise_event(DomainEvent::Checkout(CheckoutEvent::PaymentDispatched { session: self.session_id.clone(), order_id, method }));
        self.touch();
        Ok(())
    }

    /// The gateway reported failure; the same order may be paid again.
    pub fn reopen_payment(&mut self) -> Result<(), CheckoutError> {
        if self.step != CheckoutStep::Processing { return Err(CheckoutError::InvalidStep { step: self.step, action: "retry payment" }); }
        self.step = CheckoutStep::Payment;
        self.touch();
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), CheckoutError> {
        let order_id = self.order_id.clone().ok_or(CheckoutError::MissingOrder)?;
        self.step = CheckoutStep::Confirmation;
        self.raise_event(DomainEvent::Checkout(CheckoutEvent::Completed { session: self.session_id.clone(), order_id }));
        self.touch();
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }

    pub fn ensure_editable(&self) -> Result<(), CheckoutError> {
        if self.order_id.is_some() || matches!(self.step, CheckoutStep::Processing | CheckoutStep::Confirmation) {
            return Err(CheckoutError::Locked(self.step));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheckoutError {
    #[error("no items selected for checkout")]
    EmptySelection,
    #[error("no checkout in progress for session {0}")]
    DraftNotFound(String),
    #[error("shipping information is invalid: {0}")]
    InvalidShipping(FieldErrors),
    #[error("shipping information is missing")]
    MissingShipping,
    #[error("no payment method selected")]
    MissingPaymentMethod,
    #[error("order has not been created yet")]
    MissingOrder,
    #[error("cannot {action} from the {step} step")]
    InvalidStep { step: CheckoutStep, action: &'static str },
    #[error("checkout can no longer be changed ({0} step)")]
    Locked(CheckoutStep),
    #[error("a {0:?} request is already in progress")]
    RequestInFlight(InFlight),
    #[error(transparent)]
    Coupon(#[from] CouponRejection),
    #[error(transparent)]
    CouponCode(#[from] CouponCodeError),
    #[error(transparent)]
    Money(#[from] MoneyError),
    #[error("order total {client} does not match backend total {server}")]
    TotalMismatch { client: Money, server: Money },
}

impl CheckoutError {
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptySelection => "Please select at least one product to check out.".into(),
            Self::DraftNotFound(_) => "Your checkout session has expired. Please start again from the cart.".into(),
            Self::InvalidShipping(_) | Self::MissingShipping => "Please complete your shipping information.".into(),
            Self::MissingPaymentMethod => "Please choose a payment method.".into(),
            Self::RequestInFlight(_) => "Your previous request is still being processed.".into(),
            Self::Coupon(rejection) => rejection.user_message(),
            Self::CouponCode(_) => "This coupon code is not valid.".into(),
            Self::TotalMismatch { .. } => "Order total changed. Please review your order again.".into(),
            _ => "Unable to continue checkout. Please try again.".into(),
        }
    }
}
