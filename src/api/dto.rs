//! Raw backend payloads and their normalization.
//!
//! The backend is loose about shapes: ids come as `_id` or `id`, a product
//! reference may be a bare id, an object, or an object wrapping another
//! `product`, and payloads may or may not sit inside a `{ success, data }`
//! envelope. Everything is converted to one canonical domain shape here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::{ApiError, Page, PaymentReport};
use crate::domain::aggregates::{
    CartItem, Coupon, Order, OrderItem, OrderParts, OrderStatus, OrderTotals, PaymentMethod, PaymentStatus, ProductSnapshot, ShippingInfo,
};
use crate::domain::value_objects::{CouponCode, Money};

/// Strips the optional `{ success, data, message }` envelope and decodes the payload.
pub fn unwrap_envelope<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let value: Value = if body.trim().is_empty() { Value::Null } else {
        serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?
    };
    let payload = match value {
        Value::Object(mut map) => {
            if map.get("success").and_then(Value::as_bool) == Some(false) {
                let message = message_from_value(&Value::Object(map)).unwrap_or_else(|| "request was not successful".into());
                return Err(ApiError::Status { status: 200, message });
            }
            match map.remove("data") {
                Some(data) => data,
                None => Value::Object(map),
            }
        }
        other => other,
    };
    serde_json::from_value(payload).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Best-effort human message from an error body.
pub fn extract_message(body: &str) -> Option<String> {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => message_from_value(&value),
        Err(_) => {
            let text = body.trim();
            (!text.is_empty() && text.len() <= 200 && !text.starts_with('<')).then(|| text.to_string())
        }
    }
}

fn message_from_value(value: &Value) -> Option<String> {
    let as_text = |v: &Value| v.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    if let Some(m) = value.get("message").and_then(as_text) { return Some(m); }
    match value.get("error") {
        Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
        Some(obj @ Value::Object(_)) => if let Some(m) = obj.get("message").and_then(as_text) { return Some(m); },
        _ => {}
    }
    let first = value.get("errors")?.as_array()?.first()?;
    first.get("msg").and_then(as_text).or_else(|| first.get("message").and_then(as_text)).or_else(|| as_text(first))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrNumber { Text(String), Number(u64) }

impl StringOrNumber {
    fn into_string(self) -> String {
        match self { Self::Text(s) => s, Self::Number(n) => n.to_string() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProduct {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub product: Option<Box<RawProductRef>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawProductRef { Id(String), Product(RawProduct) }

/// Flattened product fields, outer values winning over nested ones.
#[derive(Debug, Clone, Default, PartialEq)]
struct ResolvedProduct { id: Option<String>, name: Option<String>, price: Option<Decimal>, image: Option<String> }

impl RawProductRef {
    fn resolve(&self) -> ResolvedProduct {
        match self {
            Self::Id(id) => ResolvedProduct { id: Some(id.clone()), ..Default::default() },
            Self::Product(p) => {
                let inner = p.product.as_deref().map(RawProductRef::resolve).unwrap_or_default();
                ResolvedProduct {
                    id: p.id.clone().or(inner.id),
                    name: p.name.clone().or(inner.name),
                    price: p.price.or(inner.price),
                    image: p.image.clone().filter(|s| !s.is_empty()).or_else(|| p.images.first().cloned()).or(inner.image),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCartItem {
    #[serde(default)]
    pub product: Option<RawProductRef>,
    #[serde(default)]
    pub product_id: Option<RawProductRef>,
    pub quantity: u32,
    #[serde(default)]
    pub selected: Option<bool>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCart {
    Items(Vec<RawCartItem>),
    Wrapped { #[serde(alias = "cartItems")] items: Vec<RawCartItem> },
}

impl RawCart {
    pub fn normalize(self, currency: &str) -> Result<Vec<CartItem>, ApiError> {
        let items = match self { Self::Items(items) | Self::Wrapped { items } => items };
        items.into_iter().map(|i| i.normalize(currency)).collect()
    }
}

impl RawCartItem {
    pub fn normalize(self, currency: &str) -> Result<CartItem, ApiError> {
        let resolved = merge(self.product.as_ref(), self.product_id.as_ref());
        let id = resolved.id.ok_or_else(|| ApiError::Decode("cart item without product id".into()))?;
        let price = self.price.or(resolved.price).ok_or_else(|| ApiError::Decode(format!("cart item {id} without price")))?;
        Ok(CartItem {
            product: ProductSnapshot {
                name: self.name.or(resolved.name).unwrap_or_default(),
                price: Money::new(price, currency),
                image: self.image.or(resolved.image),
                id,
            },
            quantity: self.quantity,
            selected: self.selected.unwrap_or(true),
        })
    }
}

fn merge(primary: Option<&RawProductRef>, secondary: Option<&RawProductRef>) -> ResolvedProduct {
    let a = primary.map(RawProductRef::resolve).unwrap_or_default();
    let b = secondary.map(RawProductRef::resolve).unwrap_or_default();
    ResolvedProduct { id: a.id.or(b.id), name: a.name.or(b.name), price: a.price.or(b.price), image: a.image.or(b.image) }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderItem {
    #[serde(default)]
    pub product: Option<RawProductRef>,
    #[serde(default)]
    pub product_id: Option<RawProductRef>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub order_number: Option<StringOrNumber>,
    #[serde(default, alias = "shippingAddress")]
    pub shipping_info: Option<ShippingInfo>,
    #[serde(default, alias = "customerName")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub ward: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub items: Vec<RawOrderItem>,
    #[serde(alias = "status")]
    pub order_status: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    pub payment_method: String,
    #[serde(default)]
    pub shipping_fee: Option<Decimal>,
    #[serde(default)]
    pub discount: Option<Decimal>,
    #[serde(default, alias = "total")]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RawOrder {
    pub fn normalize(self, currency: &str) -> Result<Order, ApiError> {
        let decode = |e: &dyn std::fmt::Display| ApiError::Decode(format!("order {}: {e}", self.id));
        let order_status = self.order_status.parse::<OrderStatus>().map_err(|e| decode(&e))?;
        let payment_status = match &self.payment_status {
            Some(s) => s.parse::<PaymentStatus>().map_err(|e| decode(&e))?,
            None => PaymentStatus::default(),
        };
        let payment_method = self.payment_method.parse::<PaymentMethod>().map_err(|e| decode(&e))?;

        let mut items = Vec::with_capacity(self.items.len());
        for raw in &self.items {
            let resolved = merge(raw.product.as_ref(), raw.product_id.as_ref());
            let product_id = resolved.id.ok_or_else(|| decode(&"item without product id"))?;
            let price = raw.price.or(resolved.price).ok_or_else(|| decode(&"item without price"))?;
            items.push(OrderItem {
                name: raw.name.clone().or(resolved.name).unwrap_or_default(),
                image: raw.image.clone().or(resolved.image),
                quantity: raw.quantity,
                price: Money::new(price, currency),
                product_id,
            });
        }

        let shipping_fee = Money::new(self.shipping_fee.unwrap_or_default(), currency);
        let discount = Money::new(self.discount.unwrap_or_default(), currency);
        let total_amount = match self.total_amount {
            Some(total) => Money::new(total, currency),
            None => OrderTotals::compute(items.iter().map(OrderItem::line_total), &shipping_fee, &discount)
                .map_err(|e| decode(&e))?.total,
        };
        let coupon_code = self.coupon_code.as_deref().filter(|c| !c.trim().is_empty())
            .map(CouponCode::new).transpose().map_err(|e| decode(&e))?;

        let shipping = self.shipping_info.unwrap_or_else(|| ShippingInfo {
            full_name: self.full_name.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            phone: self.phone.unwrap_or_default(),
            address: self.address.unwrap_or_default(),
            ward: self.ward,
            district: self.district.unwrap_or_default(),
            province: self.province.unwrap_or_default(),
            note: self.note,
        });
        let created_at = self.created_at.unwrap_or_else(Utc::now);

        Ok(Order::restore(OrderParts {
            order_number: self.order_number.map(StringOrNumber::into_string).unwrap_or_else(|| self.id.clone()),
            id: self.id,
            shipping, items, order_status, payment_status, payment_method,
            shipping_fee, discount, total_amount, coupon_code,
            cancel_reason: self.cancel_reason,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        }))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPagination {
    #[serde(default, alias = "totalItems", alias = "totalOrders")]
    pub total: Option<u64>,
    #[serde(default, alias = "currentPage")]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawOrderPage {
    List(Vec<RawOrder>),
    Paged {
        #[serde(alias = "items", alias = "data")]
        orders: Vec<RawOrder>,
        #[serde(default)]
        total: Option<u64>,
        #[serde(default)]
        pagination: Option<RawPagination>,
    },
}

impl RawOrderPage {
    pub fn normalize(self, currency: &str, page: u32, limit: u32) -> Result<Page<Order>, ApiError> {
        let (orders, total, pagination) = match self {
            Self::List(orders) => (orders, None, None),
            Self::Paged { orders, total, pagination } => (orders, total, pagination),
        };
        let pagination = pagination.unwrap_or_default();
        let data = orders.into_iter().map(|o| o.normalize(currency)).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            total: total.or(pagination.total).unwrap_or(data.len() as u64),
            page: pagination.page.unwrap_or(page),
            limit: pagination.limit.unwrap_or(limit),
            data,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCouponValidation {
    Wrapped { coupon: Coupon },
    Bare(Coupon),
}

impl RawCouponValidation {
    pub fn into_coupon(self) -> Coupon {
        match self { Self::Wrapped { coupon } | Self::Bare(coupon) => coupon }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawShippingFee {
    Amount(Decimal),
    Object { #[serde(alias = "shippingFee", alias = "fee", alias = "total")] amount: Decimal },
}

impl RawShippingFee {
    pub fn amount(&self) -> Decimal {
        match self { Self::Amount(a) | Self::Object { amount: a } => *a }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPaymentReport {
    #[serde(default, alias = "_id")]
    pub order_id: Option<String>,
    #[serde(alias = "paymentStatus")]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl RawPaymentReport {
    pub fn normalize(self) -> Result<PaymentReport, ApiError> {
        // gateways report "success"/"completed" where the order model says "paid"
        let status = match self.status.to_ascii_lowercase().as_str() {
            "success" | "completed" | "paid" => PaymentStatus::Paid,
            "cancelled" | "canceled" | "error" => PaymentStatus::Failed,
            other => other.parse::<PaymentStatus>().map_err(|e| ApiError::Decode(format!("payment status: {e}")))?,
        };
        Ok(PaymentReport { order_id: self.order_id, status, message: self.message })
    }
}
