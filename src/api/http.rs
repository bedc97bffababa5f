use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::dto::{self, RawCart, RawCouponValidation, RawOrder, RawOrderPage, RawPaymentReport, RawShippingFee};
use super::{ApiError, CreatePaymentRequest, Credentials, OrderQuery, Page, PaymentReport, PaymentSession, ShippingFeeRequest, StorefrontApi};
use crate::domain::aggregates::{CartItem, Coupon, NewOrder, Order, OrderStatus, PaymentMethod, ShippingInfo};
use crate::domain::value_objects::{CouponCode, Money};
use crate::payment::callback::CallbackParams;

/// reqwest-backed client for the storefront backend.
#[derive(Clone, Debug)]
pub struct HttpApi {
    client: Client,
    base_url: Url,
    /// Service credential, used only where no customer is involved.
    service_token: Option<String>,
    currency: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CouponBody<'a> { code: &'a str, order_total: Decimal }

#[derive(Serialize)]
struct ReasonBody<'a> { reason: &'a str }

#[derive(Serialize)]
struct StatusBody { status: OrderStatus }

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderLineBody<'a> { product: &'a str, name: &'a str, quantity: u32, price: Decimal }

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderBody<'a> {
    #[serde(flatten)]
    shipping: &'a ShippingInfo,
    items: Vec<OrderLineBody<'a>>,
    payment_method: PaymentMethod,
    coupon_code: Option<&'a str>,
    subtotal: Decimal,
    shipping_fee: Decimal,
    discount: Decimal,
    total_amount: Decimal,
}

impl<'a> From<&'a NewOrder> for OrderBody<'a> {
    fn from(order: &'a NewOrder) -> Self {
        Self {
            shipping: &order.shipping,
            items: order.items.iter().map(|i| OrderLineBody {
                product: &i.product.id, name: &i.product.name, quantity: i.quantity, price: i.product.price.amount(),
            }).collect(),
            payment_method: order.payment_method,
            coupon_code: order.coupon_code.as_ref().map(CouponCode::as_str),
            subtotal: order.totals.subtotal.amount(),
            shipping_fee: order.totals.shipping_fee.amount(),
            discount: order.totals.discount.amount(),
            total_amount: order.totals.total.amount(),
        }
    }
}

impl HttpApi {
    pub fn new(base_url: Url, service_token: Option<String>, timeout: Duration, currency: &str) -> Result<Self, ApiError> {
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Transport(format!("{base_url} cannot be used as an API base URL")));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url, service_token, currency: currency.to_string() })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("{} cannot be used as an API base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Request made on behalf of a customer.
    fn request(&self, auth: &Credentials, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        Ok(self.client.request(method, self.endpoint(segments)?).bearer_auth(auth.token()))
    }

    fn service_request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        let request = self.client.request(method, self.endpoint(segments)?);
        Ok(match &self.service_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(dto::extract_message(&body).unwrap_or_else(|| "resource not found".into())));
        }
        if !status.is_success() {
            let message = dto::extract_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            warn!(status = status.as_u16(), %message, "Backend request failed");
            return Err(ApiError::Status { status: status.as_u16(), message });
        }
        dto::unwrap_envelope(&body)
    }
}

#[async_trait]
impl StorefrontApi for HttpApi {
    #[instrument(skip(self, auth))]
    async fn fetch_cart(&self, auth: &Credentials) -> Result<Vec<CartItem>, ApiError> {
        let raw: RawCart = self.send(self.request(auth, Method::GET, &["cart"])?).await?;
        raw.normalize(&self.currency)
    }

    #[instrument(skip(self, auth))]
    async fn shipping_fee(&self, auth: &Credentials, request: &ShippingFeeRequest) -> Result<Money, ApiError> {
        let raw: RawShippingFee = self.send(self.request(auth, Method::POST, &["shipping", "calculate-fee"])?.json(request)).await?;
        debug!(fee = %raw.amount(), "Shipping fee calculated");
        Ok(Money::new(raw.amount(), &self.currency))
    }

    #[instrument(skip(self, auth, subtotal), fields(code = %code))]
    async fn validate_coupon(&self, auth: &Credentials, code: &CouponCode, subtotal: &Money) -> Result<Coupon, ApiError> {
        let body = CouponBody { code: code.as_str(), order_total: subtotal.amount() };
        let raw: RawCouponValidation = self.send(self.request(auth, Method::POST, &["coupons", "validate"])?.json(&body)).await?;
        Ok(raw.into_coupon())
    }

    #[instrument(skip(self, auth, order), fields(method = %order.payment_method))]
    async fn create_order(&self, auth: &Credentials, order: &NewOrder) -> Result<Order, ApiError> {
        let body = OrderBody::from(order);
        let raw: RawOrder = self.send(self.request(auth, Method::POST, &["orders"])?.json(&body)).await?;
        raw.normalize(&self.currency)
    }

    #[instrument(skip(self, auth))]
    async fn list_orders(&self, auth: &Credentials, query: &OrderQuery) -> Result<Page<Order>, ApiError> {
        let query = query.normalized();
        let mut params = vec![("page", query.page.to_string()), ("limit", query.limit.to_string())];
        if let Some(status) = query.status { params.push(("status", status.to_string())); }
        let raw: RawOrderPage = self.send(self.request(auth, Method::GET, &["orders"])?.query(&params)).await?;
        raw.normalize(&self.currency, query.page, query.limit)
    }

    #[instrument(skip(self, auth))]
    async fn get_order(&self, auth: &Credentials, order_id: &str) -> Result<Order, ApiError> {
        let raw: RawOrder = self.send(self.request(auth, Method::GET, &["orders", order_id])?).await?;
        raw.normalize(&self.currency)
    }

    #[instrument(skip(self, auth))]
    async fn cancel_order(&self, auth: &Credentials, order_id: &str, reason: &str) -> Result<Order, ApiError> {
        let raw: RawOrder = self.send(self.request(auth, Method::PUT, &["orders", order_id, "cancel"])?.json(&ReasonBody { reason })).await?;
        raw.normalize(&self.currency)
    }

    #[instrument(skip(self, auth))]
    async fn update_order_status(&self, auth: &Credentials, order_id: &str, status: OrderStatus) -> Result<Order, ApiError> {
        let raw: RawOrder = self.send(self.request(auth, Method::PUT, &["orders", order_id, "status"])?.json(&StatusBody { status })).await?;
        raw.normalize(&self.currency)
    }

    #[instrument(skip(self, auth, request), fields(order_id = %request.order_id, method = %request.payment_method))]
    async fn create_payment(&self, auth: &Credentials, request: &CreatePaymentRequest) -> Result<PaymentSession, ApiError> {
        self.send(self.request(auth, Method::POST, &["payments", "create"])?.json(request)).await
    }

    #[instrument(skip(self, params))]
    async fn verify_payment(&self, method: PaymentMethod, params: &CallbackParams) -> Result<PaymentReport, ApiError> {
        let raw: RawPaymentReport = self.send(self.service_request(Method::POST, &["payments", method.as_str(), "verify"])?.json(params)).await?;
        raw.normalize()
    }

    #[instrument(skip(self, auth))]
    async fn payment_status(&self, auth: &Credentials, order_id: &str) -> Result<PaymentReport, ApiError> {
        let raw: RawPaymentReport = self.send(self.request(auth, Method::GET, &["payments", "status", order_id])?).await?;
        raw.normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::tests::item;
    use crate::domain::aggregates::order::tests::shipping;
    use crate::domain::aggregates::OrderTotals;

    fn api(base: &str) -> HttpApi {
        HttpApi::new(Url::parse(base).unwrap(), None, Duration::from_secs(5), "VND").unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        assert_eq!(api("https://api.example.com/api").endpoint(&["orders", "o1", "cancel"]).unwrap().as_str(), "https://api.example.com/api/orders/o1/cancel");
        assert_eq!(api("https://api.example.com/api/").endpoint(&["cart"]).unwrap().as_str(), "https://api.example.com/api/cart");
        assert_eq!(api("https://api.example.com").endpoint(&["orders", "a/b"]).unwrap().as_str(), "https://api.example.com/orders/a%2Fb");
    }

    #[test]
    fn test_customer_token_is_forwarded() {
        let api = HttpApi::new(Url::parse("https://api.example.com").unwrap(), Some("service".into()), Duration::from_secs(5), "VND").unwrap();
        let customer = Credentials::bearer("customer-a").unwrap();
        let request = api.request(&customer, Method::GET, &["cart"]).unwrap().build().unwrap();
        assert_eq!(request.headers()[reqwest::header::AUTHORIZATION], "Bearer customer-a");
        let request = api.service_request(Method::POST, &["payments", "vnpay", "verify"]).unwrap().build().unwrap();
        assert_eq!(request.headers()[reqwest::header::AUTHORIZATION], "Bearer service");
    }

    #[test]
    fn test_order_body_shape() {
        let items = vec![item("p1", 400_000, 2, true)];
        let totals = OrderTotals::compute(items.iter().map(CartItem::line_total), &Money::vnd(Decimal::from(30_000)), &Money::vnd(Decimal::ZERO)).unwrap();
        let order = NewOrder { shipping: shipping(), items, payment_method: PaymentMethod::Vnpay, coupon_code: None, totals };
        let body = serde_json::to_value(OrderBody::from(&order)).unwrap();
        assert_eq!(body["fullName"], "Nguyen Van A");
        assert_eq!(body["paymentMethod"], "vnpay");
        assert_eq!(body["items"][0]["product"], "p1");
        assert_eq!(body["totalAmount"].as_f64(), Some(830_000.0));
    }
}
