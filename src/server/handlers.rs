use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::auth::Customer;
use super::error::AppError;
use super::AppState;
use crate::api::{OrderQuery, Page, PaymentReport};
use crate::domain::aggregates::{Order, OrderStatus, PaymentMethod, ShippingInfo, StatusColor};
use crate::payment::{CallbackParams, PaymentOutcome};
use crate::services::{CheckoutView, SubmitResult};

type Response<T> = Result<Json<T>, AppError>;

#[derive(Debug, Deserialize)]
pub struct CouponRequest { pub code: String }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodRequest { pub payment_method: PaymentMethod }

#[derive(Debug, Deserialize)]
pub struct CancelRequest { pub reason: String }

#[derive(Debug, Deserialize)]
pub struct StatusRequest { pub status: OrderStatus }

/// Order plus the display hints the storefront renders next to it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub status_label: &'static str,
    pub status_color: StatusColor,
    pub payment_label: &'static str,
    pub can_cancel: bool,
    pub is_final: bool,
    pub next_statuses: &'static [OrderStatus],
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        let status = order.status();
        Self {
            status_label: status.label(),
            status_color: status.color(),
            payment_label: order.payment_status().label(),
            can_cancel: order.can_cancel(),
            is_final: status.is_terminal(),
            next_statuses: status.allowed_next(),
            order,
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "healthy", "service": "yensao-storefront"}))
}

// Checkout

pub async fn start_checkout(State(s): State<AppState>, Customer(auth): Customer, Path(session): Path<String>) -> Result<(StatusCode, Json<CheckoutView>), AppError> {
    Ok((StatusCode::CREATED, Json(s.checkout.start(&auth, &session).await?)))
}

pub async fn get_checkout(State(s): State<AppState>, Customer(auth): Customer, Path(session): Path<String>) -> Response<CheckoutView> {
    Ok(Json(s.checkout.view(&auth, &session).await?))
}

pub async fn abandon_checkout(State(s): State<AppState>, Customer(auth): Customer, Path(session): Path<String>) -> Result<StatusCode, AppError> {
    s.checkout.abandon(&auth, &session).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_shipping(
    State(s): State<AppState>,
    Customer(auth): Customer,
    Path(session): Path<String>,
    payload: Result<Json<ShippingInfo>, JsonRejection>,
) -> Response<CheckoutView> {
    let Json(info) = payload?;
    Ok(Json(s.checkout.update_shipping(&auth, &session, info).await?))
}

pub async fn apply_coupon(
    State(s): State<AppState>,
    Customer(auth): Customer,
    Path(session): Path<String>,
    payload: Result<Json<CouponRequest>, JsonRejection>,
) -> Response<CheckoutView> {
    let Json(r) = payload?;
    Ok(Json(s.checkout.apply_coupon(&auth, &session, &r.code).await?))
}

pub async fn remove_coupon(State(s): State<AppState>, Customer(auth): Customer, Path(session): Path<String>) -> Response<CheckoutView> {
    Ok(Json(s.checkout.remove_coupon(&auth, &session).await?))
}

pub async fn select_payment_method(
    State(s): State<AppState>,
    Customer(auth): Customer,
    Path(session): Path<String>,
    payload: Result<Json<PaymentMethodRequest>, JsonRejection>,
) -> Response<CheckoutView> {
    let Json(r) = payload?;
    Ok(Json(s.checkout.select_payment_method(&auth, &session, r.payment_method).await?))
}

pub async fn advance(State(s): State<AppState>, Customer(auth): Customer, Path(session): Path<String>) -> Response<CheckoutView> {
    Ok(Json(s.checkout.advance(&auth, &session).await?))
}

pub async fn back(State(s): State<AppState>, Customer(auth): Customer, Path(session): Path<String>) -> Response<CheckoutView> {
    Ok(Json(s.checkout.back(&auth, &session).await?))
}

pub async fn submit(State(s): State<AppState>, Customer(auth): Customer, Path(session): Path<String>) -> Response<SubmitResult> {
    Ok(Json(s.checkout.submit(&auth, &session).await?))
}

/// Gateway return. Always ends in a redirect to a storefront page.
pub async fn payment_return(
    State(s): State<AppState>,
    Path(method): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let outcome = match method.parse::<PaymentMethod>() {
        Ok(method) => match s.checkout.handle_callback(method, &params).await {
            Ok(resolution) => resolution.outcome,
            Err(e) => {
                warn!(error = %e, %method, "Payment return could not be handled");
                PaymentOutcome::Failed { order_id: None, code: None, message: e.user_message() }
            }
        },
        Err(e) => {
            warn!(error = %e, %method, "Payment return for an unknown method");
            PaymentOutcome::Failed { order_id: None, code: None, message: "This payment method is not supported.".into() }
        }
    };
    Redirect::to(outcome.redirect_url(&s.storefront_url).as_str())
}

// Orders

pub async fn list_orders(State(s): State<AppState>, Customer(auth): Customer, Query(q): Query<OrderQuery>) -> Response<Page<OrderView>> {
    let page = s.orders.list(&auth, &q).await?;
    Ok(Json(Page { data: page.data.into_iter().map(OrderView::from).collect(), total: page.total, page: page.page, limit: page.limit }))
}

pub async fn get_order(State(s): State<AppState>, Customer(auth): Customer, Path(id): Path<String>) -> Response<OrderView> {
    Ok(Json(s.orders.get(&auth, &id).await?.into()))
}

pub async fn cancel_order(
    State(s): State<AppState>,
    Customer(auth): Customer,
    Path(id): Path<String>,
    payload: Result<Json<CancelRequest>, JsonRejection>,
) -> Response<OrderView> {
    let Json(r) = payload?;
    Ok(Json(s.orders.cancel(&auth, &id, &r.reason).await?.into()))
}

pub async fn update_order_status(
    State(s): State<AppState>,
    Customer(auth): Customer,
    Path(id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Response<OrderView> {
    let Json(r) = payload?;
    Ok(Json(s.orders.transition(&auth, &id, r.status).await?.into()))
}

pub async fn payment_status(State(s): State<AppState>, Customer(auth): Customer, Path(id): Path<String>) -> Response<PaymentReport> {
    Ok(Json(s.orders.payment_status(&auth, &id).await?))
}
