//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{CouponCode, Money};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponType { Percentage, FixedAmount }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub code: CouponCode,
    #[serde(rename = "type")]
    pub kind: CouponType,
    pub value: Decimal,
    #[serde(default)]
    pub min_order_value: Decimal,
    #[serde(default)]
    pub max_discount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub user_limit: Option<u32>,
    #[serde(default)]
    pub usage_count: u32,
    /// Times the current customer already used the code, when the backend reports it.
    #[serde(default)]
    pub user_usage_count: Option<u32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool { true }

/// A coupon accepted for a specific subtotal.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon {
    pub code: CouponCode,
    pub kind: CouponType,
    pub value: Decimal,
    pub discount: Money,
}

impl Coupon {
    pub fn check_eligibility(&self, subtotal: &Money, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !self.is_active { return Err(CouponRejection::Inactive); }
        if now < self.start_date { return Err(CouponRejection::NotStarted); }
        if now > self.end_date { return Err(CouponRejection::Expired); }
        if let Some(limit) = self.usage_limit {
            if self.usage_count >= limit { return Err(CouponRejection::UsageLimitReached); }
        }
        if let (Some(limit), Some(used)) = (self.user_limit, self.user_usage_count) {
            if used >= limit { return Err(CouponRejection::UserLimitReached); }
        }
        if subtotal.amount() < self.min_order_value {
            return Err(CouponRejection::BelowMinimum { minimum: Money::new(self.min_order_value, subtotal.currency()) });
        }
        Ok(())
    }

    /// Discount for `subtotal`, capped by `max_discount` and by the subtotal itself.
    pub fn discount_for(&self, subtotal: &Money) -> Money {
        let raw = match self.kind {
            CouponType::Percentage => subtotal.percent(self.value).amount(),
            CouponType::FixedAmount => self.value,
        };
        let mut discount = raw.max(Decimal::ZERO).min(subtotal.amount().max(Decimal::ZERO));
        if let Some(cap) = self.max_discount {
            discount = discount.min(cap.max(Decimal::ZERO));
        }
        Money::new(discount, subtotal.currency())
    }

    pub fn apply(&self, subtotal: &Money, now: DateTime<Utc>) -> Result<AppliedCoupon, CouponRejection> {
        self.check_eligibility(subtotal, now)?;
        Ok(AppliedCoupon { code: self.code.clone(), kind: self.kind, value: self.value, discount: self.discount_for(subtotal) })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CouponRejection {
    #[error("coupon code is not valid")]
    Invalid,
    #[error("coupon is not active")]
    Inactive,
    #[error("coupon is not yet valid")]
    NotStarted,
    #[error("coupon has expired")]
    Expired,
    #[error("order total is below the coupon minimum of {minimum}")]
    BelowMinimum { minimum: Money },
    #[error("coupon usage limit reached")]
    UsageLimitReached,
    #[error("coupon already used the maximum number of times by this customer")]
    UserLimitReached,
    #[error("coupon rejected: {0}")]
    Rejected(String),
}

impl CouponRejection {
    pub fn user_message(&self) -> String {
        match self {
            Self::Invalid => "This coupon code does not exist.".into(),
            Self::Inactive => "This coupon is no longer available.".into(),
            Self::NotStarted => "This coupon cannot be used yet.".into(),
            Self::Expired => "This coupon has expired.".into(),
            Self::BelowMinimum { minimum } => format!("Orders must reach {minimum} to use this coupon."),
            Self::UsageLimitReached => "This coupon has been fully redeemed.".into(),
            Self::UserLimitReached => "You have already used this coupon.".into(),
            Self::Rejected(message) => message.clone(),
        }
    }
}
