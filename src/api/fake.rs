//! In-memory backend for tests.
//!
//! Carts and orders belong to the token that created them, the way the real
//! backend scopes them to the signed-in customer.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use super::{ApiError, CreatePaymentRequest, Credentials, OrderQuery, Page, PaymentReport, PaymentSession, ShippingFeeRequest, StorefrontApi};
use crate::domain::aggregates::{
    CartItem, Coupon, NewOrder, Order, OrderItem, OrderParts, OrderStatus, PaymentMethod, PaymentStatus,
};
use crate::domain::value_objects::{CouponCode, Money};
use crate::payment::callback::CallbackParams;

/// Token the single-customer tests run as.
pub(crate) const CUSTOMER: &str = "customer-token";

pub(crate) fn customer() -> Credentials { Credentials::bearer(CUSTOMER).unwrap() }

/// Backend calls that can be made to never answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Stall { ShippingFee, Coupon, Payment }

#[derive(Default)]
struct FakeState {
    carts: HashMap<String, Vec<CartItem>>,
    coupons: HashMap<String, Coupon>,
    orders: HashMap<String, Order>,
    owners: HashMap<String, String>,
    stalled: Vec<Stall>,
    order_requests: Vec<NewOrder>,
    total_adjustment: Decimal,
    shipping_fee: Decimal,
    payment_session: Option<PaymentSession>,
    payment_requests: Vec<CreatePaymentRequest>,
    payment_report: Option<PaymentReport>,
    verify_error: Option<ApiError>,
    verify_calls: usize,
    coupon_calls: usize,
}

#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub(crate) fn set_cart(&self, items: Vec<CartItem>) { self.set_cart_for(CUSTOMER, items) }
    pub(crate) fn set_cart_for(&self, token: &str, items: Vec<CartItem>) { self.with(|s| s.carts.insert(token.to_string(), items)); }
    pub(crate) fn stall(&self, call: Stall, stalled: bool) {
        self.with(|s| {
            s.stalled.retain(|c| *c != call);
            if stalled { s.stalled.push(call); }
        })
    }
    pub(crate) fn add_coupon(&self, coupon: Coupon) { self.with(|s| s.coupons.insert(coupon.code.to_string(), coupon)); }
    pub(crate) fn set_shipping_fee(&self, fee: i64) { self.with(|s| s.shipping_fee = Decimal::from(fee)) }
    /// Makes the backend compute a total that differs from the client's by `delta`.
    pub(crate) fn skew_totals(&self, delta: i64) { self.with(|s| s.total_adjustment = Decimal::from(delta)) }
    pub(crate) fn set_payment_session(&self, session: PaymentSession) { self.with(|s| s.payment_session = Some(session)) }
    pub(crate) fn set_payment_report(&self, report: PaymentReport) { self.with(|s| s.payment_report = Some(report)) }
    pub(crate) fn fail_verification(&self, error: ApiError) { self.with(|s| s.verify_error = Some(error)) }
    /// Stores an order owned by [`CUSTOMER`].
    pub(crate) fn insert_order(&self, order: Order) { self.store(CUSTOMER, order) }
    pub(crate) fn order(&self, id: &str) -> Option<Order> { self.with(|s| s.orders.get(id).cloned()) }
    pub(crate) fn order_requests(&self) -> Vec<NewOrder> { self.with(|s| s.order_requests.clone()) }
    pub(crate) fn payment_requests(&self) -> Vec<CreatePaymentRequest> { self.with(|s| s.payment_requests.clone()) }
    pub(crate) fn verify_calls(&self) -> usize { self.with(|s| s.verify_calls) }
    pub(crate) fn coupon_calls(&self) -> usize { self.with(|s| s.coupon_calls) }

    fn store(&self, owner: &str, order: Order) {
        self.with(|s| {
            s.owners.insert(order.id().to_string(), owner.to_string());
            s.orders.insert(order.id().to_string(), order);
        })
    }

    /// Someone else's order looks the same as a missing one.
    fn stored(&self, auth: &Credentials, id: &str) -> Result<Order, ApiError> {
        self.with(|s| {
            let owned = s.owners.get(id).map(String::as_str) == Some(auth.token());
            s.orders.get(id).filter(|_| owned).cloned()
        }).ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))
    }

    async fn maybe_stall(&self, call: Stall) {
        if self.with(|s| s.stalled.contains(&call)) {
            std::future::pending::<()>().await;
        }
    }
}

fn rejected(e: impl std::fmt::Display) -> ApiError { ApiError::Status { status: 400, message: e.to_string() } }

#[async_trait]
impl StorefrontApi for FakeApi {
    async fn fetch_cart(&self, auth: &Credentials) -> Result<Vec<CartItem>, ApiError> {
        Ok(self.with(|s| s.carts.get(auth.token()).cloned().unwrap_or_default()))
    }

    async fn shipping_fee(&self, _auth: &Credentials, _request: &ShippingFeeRequest) -> Result<Money, ApiError> {
        self.maybe_stall(Stall::ShippingFee).await;
        Ok(Money::vnd(self.with(|s| s.shipping_fee)))
    }

    async fn validate_coupon(&self, _auth: &Credentials, code: &CouponCode, _subtotal: &Money) -> Result<Coupon, ApiError> {
        self.maybe_stall(Stall::Coupon).await;
        self.with(|s| {
            s.coupon_calls += 1;
            s.coupons.get(code.as_str()).cloned().ok_or_else(|| ApiError::NotFound("Coupon not found".into()))
        })
    }

    async fn create_order(&self, auth: &Credentials, order: &NewOrder) -> Result<Order, ApiError> {
        let now = Utc::now();
        let created = self.with(|s| {
            s.order_requests.push(order.clone());
            let id = format!("ord-{}", s.order_requests.len());
            let total = Money::new(order.totals.total.amount() + s.total_adjustment, order.totals.total.currency());
            Order::restore(OrderParts {
                order_number: format!("YS{:04}", s.order_requests.len()),
                id,
                shipping: order.shipping.clone(),
                items: order.items.iter().map(|i| OrderItem {
                    product_id: i.product.id.clone(), name: i.product.name.clone(), image: i.product.image.clone(),
                    quantity: i.quantity, price: i.product.price.clone(),
                }).collect(),
                order_status: OrderStatus::Pending,
                payment_status: PaymentStatus::Pending,
                payment_method: order.payment_method,
                shipping_fee: order.totals.shipping_fee.clone(),
                discount: order.totals.discount.clone(),
                total_amount: total,
                coupon_code: order.coupon_code.clone(),
                cancel_reason: None,
                created_at: now,
                updated_at: now,
            })
        });
        self.store(auth.token(), created.clone());
        Ok(created)
    }

    async fn list_orders(&self, auth: &Credentials, query: &OrderQuery) -> Result<Page<Order>, ApiError> {
        let query = query.normalized();
        let mut all: Vec<Order> = self.with(|s| {
            s.orders.values().filter(|o| s.owners.get(o.id()).map(String::as_str) == Some(auth.token())).cloned().collect()
        });
        all.retain(|o| query.status.map_or(true, |st| o.status() == st));
        all.sort_by(|a, b| a.id().cmp(b.id()));
        let total = all.len() as u64;
        let data = all.into_iter().skip(((query.page - 1) * query.limit) as usize).take(query.limit as usize).collect();
        Ok(Page { data, total, page: query.page, limit: query.limit })
    }

    async fn get_order(&self, auth: &Credentials, order_id: &str) -> Result<Order, ApiError> { self.stored(auth, order_id) }

    async fn cancel_order(&self, auth: &Credentials, order_id: &str, reason: &str) -> Result<Order, ApiError> {
        let mut order = self.stored(auth, order_id)?;
        order.cancel(reason).map_err(rejected)?;
        order.take_events();
        self.store(auth.token(), order.clone());
        Ok(order)
    }

    async fn update_order_status(&self, auth: &Credentials, order_id: &str, status: OrderStatus) -> Result<Order, ApiError> {
        let mut order = self.stored(auth, order_id)?;
        order.transition_to(status).map_err(rejected)?;
        order.take_events();
        self.store(auth.token(), order.clone());
        Ok(order)
    }

    async fn create_payment(&self, _auth: &Credentials, request: &CreatePaymentRequest) -> Result<PaymentSession, ApiError> {
        self.maybe_stall(Stall::Payment).await;
        Ok(self.with(|s| {
            s.payment_requests.push(request.clone());
            s.payment_session.clone().unwrap_or_else(|| PaymentSession {
                pay_url: Some(format!("https://gateway.test/{}/pay?order={}", request.payment_method, request.order_id)),
                ..Default::default()
            })
        }))
    }

    async fn verify_payment(&self, _method: PaymentMethod, _params: &CallbackParams) -> Result<PaymentReport, ApiError> {
        self.with(|s| {
            s.verify_calls += 1;
            if let Some(e) = &s.verify_error { return Err(e.clone()); }
            s.payment_report.clone().ok_or_else(|| ApiError::Status { status: 500, message: "no report configured".into() })
        })
    }

    async fn payment_status(&self, auth: &Credentials, order_id: &str) -> Result<PaymentReport, ApiError> {
        let order = self.stored(auth, order_id)?;
        Ok(PaymentReport { order_id: Some(order.id().to_string()), status: order.payment_status(), message: None })
    }
}
