//! Checkout workflow
//!
//! Drafts live in memory per customer and session. Every backend call is made
//! with the draft lock released; the in-flight marker on the draft keeps a
//! second shipping, coupon or submit request out while the first is still
//! running, and is released even when the caller goes away mid-request.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::api::{ApiError, Credentials, ShippingFeeRequest, StorefrontApi};
use crate::domain::aggregates::{
    AppliedCoupon, Cart, CheckoutDraft, CheckoutError, CouponRejection, InFlight, NewOrder, Order, OrderTotals,
    PaymentMethod, ShippingInfo,
};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{CouponCode, Money};
use crate::payment::{CallbackHandler, CallbackParams, CallbackResolution, DispatchOutcome, PaymentDispatcher, PaymentOutcome};
use crate::publisher::EventPublisher;
use crate::Result;

/// A session id is only meaningful together with the customer who opened it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DraftKey {
    owner: Credentials,
    session_id: String,
}

impl DraftKey {
    pub fn new(owner: &Credentials, session_id: &str) -> Self {
        Self { owner: owner.clone(), session_id: session_id.to_string() }
    }

    pub fn session_id(&self) -> &str { &self.session_id }

    fn not_found(&self) -> CheckoutError { CheckoutError::DraftNotFound(self.session_id.clone()) }
}

#[derive(Default)]
pub struct DraftStore {
    drafts: Mutex<HashMap<DraftKey, CheckoutDraft>>,
}

impl DraftStore {
    pub fn new() -> Self { Self::default() }

    /// Replaces any draft the customer already has open for the session.
    pub async fn insert(&self, owner: &Credentials, draft: CheckoutDraft) {
        let key = DraftKey::new(owner, draft.session_id());
        self.drafts.lock().await.insert(key, draft);
    }

    pub async fn get(&self, key: &DraftKey) -> Option<CheckoutDraft> {
        self.drafts.lock().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &DraftKey) -> Option<CheckoutDraft> {
        self.drafts.lock().await.remove(key)
    }

    pub async fn key_for_order(&self, order_id: &str) -> Option<DraftKey> {
        self.drafts.lock().await.iter().find(|(_, d)| d.order_id() == Some(order_id)).map(|(k, _)| k.clone())
    }

    /// Runs `f` against the draft under the lock.
    pub async fn update<R, E>(&self, key: &DraftKey, f: impl FnOnce(&mut CheckoutDraft) -> std::result::Result<R, E>) -> std::result::Result<R, E>
    where
        E: From<CheckoutError>,
    {
        let mut drafts = self.drafts.lock().await;
        let draft = drafts.get_mut(key).ok_or_else(|| key.not_found())?;
        f(draft)
    }

    /// Drops drafts untouched since `cutoff`; returns how many went.
    pub async fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let mut drafts = self.drafts.lock().await;
        let before = drafts.len();
        drafts.retain(|_, d| d.updated_at() >= cutoff);
        before - drafts.len()
    }

    pub async fn len(&self) -> usize { self.drafts.lock().await.len() }

    /// Clears the in-flight marker of a request that never got to settle.
    /// Runs from `Drop`, so it cannot wait for the lock.
    fn release(self: &Arc<Self>, key: DraftKey) {
        warn!(session_id = %key.session_id, "Request ended before it settled, releasing checkout");
        if let Ok(mut drafts) = self.drafts.try_lock() {
            if let Some(draft) = drafts.get_mut(&key) { draft.finish(); }
            return;
        }
        let store = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Some(draft) = store.drafts.lock().await.get_mut(&key) { draft.finish(); }
                });
            }
            Err(_) => warn!(session_id = %key.session_id, "No runtime left to release the checkout on"),
        }
    }
}

/// Held while a backend request runs for a draft; releases the draft's
/// in-flight marker if the request is dropped or bails out early.
struct InFlightGuard {
    drafts: Arc<DraftStore>,
    key: Option<DraftKey>,
}

impl InFlightGuard {
    fn new(drafts: &Arc<DraftStore>, key: &DraftKey) -> Self {
        Self { drafts: Arc::clone(drafts), key: Some(key.clone()) }
    }

    /// The request cleared its own marker.
    fn settled(mut self) { self.key = None; }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() { self.drafts.release(key); }
    }
}

/// A draft together with its computed totals, as the storefront renders it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    pub draft: CheckoutDraft,
    pub totals: OrderTotals,
}

impl CheckoutView {
    fn of(draft: CheckoutDraft) -> Result<Self> {
        let totals = draft.totals()?;
        Ok(Self { draft, totals })
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub order: Order,
    #[serde(flatten)]
    pub next: DispatchOutcome,
}

pub struct CheckoutService {
    api: Arc<dyn StorefrontApi>,
    drafts: Arc<DraftStore>,
    dispatcher: PaymentDispatcher,
    callbacks: CallbackHandler,
    publisher: Arc<dyn EventPublisher>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        api: Arc<dyn StorefrontApi>,
        drafts: Arc<DraftStore>,
        dispatcher: PaymentDispatcher,
        callbacks: CallbackHandler,
        publisher: Arc<dyn EventPublisher>,
        currency: &str,
    ) -> Self {
        Self { api, drafts, dispatcher, callbacks, publisher, currency: currency.to_string() }
    }

    /// Opens a fresh draft from the customer's selected cart items.
    #[instrument(skip(self, auth))]
    pub async fn start(&self, auth: &Credentials, session_id: &str) -> Result<CheckoutView> {
        let cart = Cart::from_items(&self.currency, self.api.fetch_cart(auth).await?);
        let subtotal = cart.selected_subtotal()?;
        let draft = CheckoutDraft::new(session_id, &self.currency, cart.selected_items())?;
        info!(items = draft.items().len(), in_cart = cart.items().len(), %subtotal, "Checkout started");
        self.drafts.insert(auth, draft.clone()).await;
        CheckoutView::of(draft)
    }

    pub async fn view(&self, auth: &Credentials, session_id: &str) -> Result<CheckoutView> {
        let key = DraftKey::new(auth, session_id);
        let draft = self.drafts.get(&key).await.ok_or_else(|| key.not_found())?;
        CheckoutView::of(draft)
    }

    #[instrument(skip(self, auth))]
    pub async fn abandon(&self, auth: &Credentials, session_id: &str) -> Result<()> {
        let key = DraftKey::new(auth, session_id);
        self.drafts.remove(&key).await.ok_or_else(|| key.not_found())?;
        Ok(())
    }

    /// Stores validated shipping details together with the fee quoted for them.
    #[instrument(skip(self, auth, info))]
    pub async fn update_shipping(&self, auth: &Credentials, session_id: &str, info: ShippingInfo) -> Result<CheckoutView> {
        let key = DraftKey::new(auth, session_id);
        let request = self.drafts.update(&key, |d| -> Result<ShippingFeeRequest> {
            d.ensure_editable()?;
            CheckoutDraft::validate_shipping(&info)?;
            let request = ShippingFeeRequest {
                province: info.province.trim().to_string(),
                district: info.district.trim().to_string(),
                ward: info.ward.clone(),
                subtotal: d.subtotal()?.amount(),
            };
            d.begin(InFlight::ShippingFee)?;
            Ok(request)
        }).await?;
        let guard = InFlightGuard::new(&self.drafts, &key);

        let fee = self.api.shipping_fee(auth, &request).await;
        let updated = self.drafts.update(&key, |d| -> Result<_> {
            d.finish();
            d.set_shipping(info)?;
            d.set_shipping_fee(fee?)?;
            Ok(d.clone())
        }).await;
        guard.settled();
        CheckoutView::of(updated?)
    }

    #[instrument(skip(self, auth))]
    pub async fn select_payment_method(&self, auth: &Credentials, session_id: &str, method: PaymentMethod) -> Result<CheckoutView> {
        let draft = self.drafts.update(&DraftKey::new(auth, session_id), |d| {
            d.select_payment_method(method)?;
            Ok::<_, CheckoutError>(d.clone())
        }).await?;
        CheckoutView::of(draft)
    }

    /// Validates `raw_code` with the backend and applies the discount locally.
    #[instrument(skip(self, auth))]
    pub async fn apply_coupon(&self, auth: &Credentials, session_id: &str, raw_code: &str) -> Result<CheckoutView> {
        let code = CouponCode::new(raw_code).map_err(CheckoutError::from)?;
        let key = DraftKey::new(auth, session_id);
        let subtotal = self.drafts.update(&key, |d| -> Result<Money> {
            d.ensure_editable()?;
            let subtotal = d.subtotal()?;
            d.begin(InFlight::CouponApply)?;
            Ok(subtotal)
        }).await?;
        let guard = InFlightGuard::new(&self.drafts, &key);

        let outcome = self.check_coupon(auth, &code, &subtotal).await;
        let updated = self.drafts.update(&key, |d| -> Result<_> {
            d.finish();
            d.apply_coupon(outcome?)?;
            Ok((d.clone(), d.take_events()))
        }).await;
        guard.settled();
        let (draft, events) = updated?;
        self.publisher.publish_all(events).await;
        CheckoutView::of(draft)
    }

    async fn check_coupon(&self, auth: &Credentials, code: &CouponCode, subtotal: &Money) -> Result<AppliedCoupon> {
        let coupon = match self.api.validate_coupon(auth, code, subtotal).await {
            Ok(coupon) => coupon,
            Err(ApiError::NotFound(_)) => return Err(CheckoutError::Coupon(CouponRejection::Invalid).into()),
            Err(e) if e.is_rejection() && !e.is_unauthorized() => {
                return Err(CheckoutError::Coupon(CouponRejection::Rejected(e.user_message())).into())
            }
            Err(e) => return Err(e.into()),
        };
        if coupon.code != *code {
            warn!(requested = %code, returned = %coupon.code, "Backend returned a different coupon");
            return Err(CheckoutError::Coupon(CouponRejection::Invalid).into());
        }
        let applied = coupon.apply(subtotal, Utc::now()).map_err(CheckoutError::from)?;
        info!(code = %code, discount = %applied.discount, "Coupon applied");
        Ok(applied)
    }

    #[instrument(skip(self, auth))]
    pub async fn remove_coupon(&self, auth: &Credentials, session_id: &str) -> Result<CheckoutView> {
        let (draft, events) = self.drafts.update(&DraftKey::new(auth, session_id), |d| {
            d.remove_coupon()?;
            Ok::<_, CheckoutError>((d.clone(), d.take_events()))
        }).await?;
        self.publisher.publish_all(events).await;
        CheckoutView::of(draft)
    }

    pub async fn advance(&self, auth: &Credentials, session_id: &str) -> Result<CheckoutView> {
        let draft = self.drafts.update(&DraftKey::new(auth, session_id), |d| {
            d.advance()?;
            Ok::<_, CheckoutError>(d.clone())
        }).await?;
        CheckoutView::of(draft)
    }

    pub async fn back(&self, auth: &Credentials, session_id: &str) -> Result<CheckoutView> {
        let draft = self.drafts.update(&DraftKey::new(auth, session_id), |d| {
            d.back()?;
            Ok::<_, CheckoutError>(d.clone())
        }).await?;
        CheckoutView::of(draft)
    }

    /// Places the order and hands it to its payment method.
    ///
    /// When a previous attempt already created the order, the same order is
    /// dispatched again instead of creating a second one.
    #[instrument(skip(self, auth))]
    pub async fn submit(&self, auth: &Credentials, session_id: &str) -> Result<SubmitResult> {
        let key = DraftKey::new(auth, session_id);
        let (request, existing) = self.drafts.update(&key, |d| -> Result<_> {
            let request = d.order_request()?;
            d.begin(InFlight::Submission)?;
            Ok((request, d.order_id().map(str::to_string)))
        }).await?;
        let guard = InFlightGuard::new(&self.drafts, &key);

        let placed = self.place_and_dispatch(auth, &key, &request, existing).await;
        let settled = self.drafts.update(&key, |d| -> Result<_> {
            d.finish();
            let (order, next) = placed?;
            match next {
                DispatchOutcome::Confirm { .. } => d.complete()?,
                _ => d.mark_processing()?,
            }
            Ok((SubmitResult { order, next }, d.take_events()))
        }).await;
        guard.settled();
        let (result, events) = settled?;

        if matches!(result.next, DispatchOutcome::Confirm { .. }) {
            self.drafts.remove(&key).await;
        }
        self.publisher.publish_all(events).await;
        Ok(result)
    }

    async fn place_and_dispatch(&self, auth: &Credentials, key: &DraftKey, request: &NewOrder, existing: Option<String>) -> Result<(Order, DispatchOutcome)> {
        let order = match existing {
            Some(order_id) => {
                info!(%order_id, "Retrying payment for existing order");
                self.api.get_order(auth, &order_id).await?
            }
            None => {
                let order = self.api.create_order(auth, request).await?;
                self.drafts.update(key, |d| {
                    d.attach_order(order.id());
                    Ok::<_, CheckoutError>(())
                }).await?;
                info!(order_id = %order.id(), order_number = %order.order_number(), "Order created");
                self.publisher.publish(DomainEvent::Order(OrderEvent::Placed {
                    order_id: order.id().to_string(), total: order.total_amount().amount(), method: order.payment_method(),
                })).await;
                order
            }
        };

        let client = &request.totals.total;
        if order.total_amount().amount() != client.amount() {
            warn!(client = %client, server = %order.total_amount(), "Order total mismatch");
            return Err(CheckoutError::TotalMismatch { client: client.clone(), server: order.total_amount().clone() }.into());
        }

        let next = self.dispatcher.dispatch(auth, key.session_id(), &order, client).await?;
        Ok((order, next))
    }

    /// Resolves a gateway return and moves the matching draft along.
    #[instrument(skip(self, params))]
    pub async fn handle_callback(&self, method: PaymentMethod, params: &CallbackParams) -> Result<CallbackResolution> {
        let resolution = self.callbacks.handle(method, params).await?;
        let order_id = resolution.outcome.order_id().or(resolution.pending.as_ref().map(|p| p.order_id.as_str()));
        let key = match order_id {
            Some(order_id) => self.drafts.key_for_order(order_id).await,
            None => None,
        };

        match &resolution.outcome {
            PaymentOutcome::Succeeded { order_id } => {
                self.publisher.publish(DomainEvent::Order(OrderEvent::PaymentConfirmed { order_id: order_id.clone() })).await;
                if let Some(key) = key {
                    self.settle(&key, CheckoutDraft::complete).await;
                    self.drafts.remove(&key).await;
                }
            }
            PaymentOutcome::Failed { order_id, message, .. } => {
                self.publisher.publish(DomainEvent::Order(OrderEvent::PaymentFailed { order_id: order_id.clone(), reason: message.clone() })).await;
                if let Some(key) = key {
                    self.settle(&key, CheckoutDraft::reopen_payment).await;
                }
            }
            PaymentOutcome::Pending { .. } | PaymentOutcome::Unverified { .. } => {}
        }
        Ok(resolution)
    }

    /// Applies a payment result to the draft; a draft that is gone or already moved on is left alone.
    async fn settle(&self, key: &DraftKey, f: fn(&mut CheckoutDraft) -> std::result::Result<(), CheckoutError>) {
        let events = self.drafts.update(key, |d| {
            f(d)?;
            Ok::<_, CheckoutError>(d.take_events())
        }).await;
        match events {
            Ok(events) => self.publisher.publish_all(events).await,
            Err(e) => warn!(error = %e, session_id = %key.session_id(), "Draft not updated after payment callback"),
        }
    }
}
