//! HTTP edge consumed by the storefront UI and the payment gateways.

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use reqwest::Url;

use crate::services::{CheckoutService, OrderService};

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub storefront_url: Url,
}

pub fn router(state: AppState) -> Router {
    use handlers::*;

    Router::new()
        .route("/health", get(health))
        .route("/checkout/:session", post(start_checkout).get(get_checkout).delete(abandon_checkout))
        .route("/checkout/:session/shipping", put(update_shipping))
        .route("/checkout/:session/coupon", post(apply_coupon).delete(remove_coupon))
        .route("/checkout/:session/payment-method", put(select_payment_method))
        .route("/checkout/:session/advance", post(advance))
        .route("/checkout/:session/back", post(back))
        .route("/checkout/:session/submit", post(submit))
        .route("/payment/:method/return", get(payment_return))
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/payment-status", get(payment_status))
        .with_state(state)
}
