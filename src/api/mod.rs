//! Backend REST API boundary.
//!
//! [`StorefrontApi`] is the seam between the checkout workflow and the backend.
//! [`HttpApi`] talks to the real service; every response is normalized into the
//! domain types in [`dto`] before anything else sees it.
//!
//! Calls made for a customer carry that customer's [`Credentials`]; the
//! backend scopes carts and orders to them.

pub mod dto;
pub mod http;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::{CartItem, Coupon, NewOrder, Order, OrderStatus, PaymentMethod, PaymentStatus};
use crate::domain::value_objects::{CouponCode, Money};
use crate::payment::callback::CallbackParams;

pub use http::HttpApi;

/// Bearer token of the caller a backend request is made for.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials(String);

impl Credentials {
    /// `None` for a blank token.
    pub fn bearer(token: &str) -> Option<Self> {
        let token = token.trim();
        (!token.is_empty()).then(|| Self(token.to_string()))
    }

    /// Parses an `Authorization` header value.
    pub fn from_header(value: &str) -> Option<Self> {
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") { return None; }
        Self::bearer(token)
    }

    pub fn token(&self) -> &str { &self.0 }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Credentials(***)") }
}

#[async_trait]
pub trait StorefrontApi: Send + Sync {
    async fn fetch_cart(&self, auth: &Credentials) -> Result<Vec<CartItem>, ApiError>;
    async fn shipping_fee(&self, auth: &Credentials, request: &ShippingFeeRequest) -> Result<Money, ApiError>;
    async fn validate_coupon(&self, auth: &Credentials, code: &CouponCode, subtotal: &Money) -> Result<Coupon, ApiError>;
    async fn create_order(&self, auth: &Credentials, order: &NewOrder) -> Result<Order, ApiError>;
    async fn list_orders(&self, auth: &Credentials, query: &OrderQuery) -> Result<Page<Order>, ApiError>;
    async fn get_order(&self, auth: &Credentials, order_id: &str) -> Result<Order, ApiError>;
    async fn cancel_order(&self, auth: &Credentials, order_id: &str, reason: &str) -> Result<Order, ApiError>;
    async fn update_order_status(&self, auth: &Credentials, order_id: &str, status: OrderStatus) -> Result<Order, ApiError>;
    async fn create_payment(&self, auth: &Credentials, request: &CreatePaymentRequest) -> Result<PaymentSession, ApiError>;
    /// Gateway returns carry no customer session; verification runs with the service's own token.
    async fn verify_payment(&self, method: PaymentMethod, params: &CallbackParams) -> Result<PaymentReport, ApiError>;
    async fn payment_status(&self, auth: &Credentials, order_id: &str) -> Result<PaymentReport, ApiError>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingFeeRequest {
    pub province: String,
    pub district: String,
    pub ward: Option<String>,
    pub subtotal: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub order_id: String,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub return_url: String,
    pub order_info: String,
}

/// What the backend hands back after registering a payment with a gateway.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    #[serde(default, alias = "paymentUrl", alias = "orderUrl", alias = "order_url")]
    pub pay_url: Option<String>,
    #[serde(default, alias = "deepLink")]
    pub deeplink: Option<String>,
    #[serde(default, alias = "qrCode")]
    pub qr_code_url: Option<String>,
    /// Gateway-side reference echoed back in the return URL.
    #[serde(default, alias = "appTransId", alias = "app_trans_id", alias = "requestId")]
    pub transaction_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReport {
    pub order_id: Option<String>,
    pub status: PaymentStatus,
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrderQuery {
    pub page: u32,
    pub limit: u32,
    pub status: Option<OrderStatus>,
}

impl Default for OrderQuery {
    fn default() -> Self { Self { page: 1, limit: 10, status: None } }
}

impl OrderQuery {
    pub const MAX_LIMIT: u32 = 100;

    pub fn normalized(&self) -> Self {
        Self { page: self.page.max(1), limit: self.limit.clamp(1, Self::MAX_LIMIT), status: self.status }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool { matches!(self, Self::Status { status: 401, .. }) }

    /// Backend refused the request itself (4xx), as opposed to failing.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::Status { status, .. } if (400..500).contains(status))
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(message) | Self::Status { message, .. } if self.is_rejection() && !message.is_empty() => message.clone(),
            Self::Timeout => "The server is taking too long to respond. Please try again.".into(),
            _ => "Something went wrong. Please try again later.".into(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() { Self::Timeout }
        else if e.is_decode() { Self::Decode(e.to_string()) }
        else { Self::Transport(e.to_string()) }
    }
}
