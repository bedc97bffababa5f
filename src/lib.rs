//! Yen Sao Storefront
//!
//! Checkout and order lifecycle for the bird's-nest storefront.
//!
//! ## Features
//! - Checkout draft built from the selected cart items
//! - Coupon validation and discount math
//! - Payment dispatch to COD, MoMo, ZaloPay and VNPay
//! - Gateway return handling with backend verification
//! - Order history, cancellation and status transitions
//! - Caller bearer tokens forwarded to the backend on every customer call
//! - Idle drafts and abandoned payments swept on a timer

pub mod api;
pub mod config;
pub mod domain;
pub mod payment;
pub mod publisher;
pub mod server;
pub mod services;

pub use api::{ApiError, HttpApi, StorefrontApi};
pub use config::{Config, ConfigError};
pub use domain::aggregates::{CheckoutDraft, CheckoutError, Order, OrderError, OrderStatus, PaymentMethod, PaymentStatus};
pub use payment::PaymentError;
pub use services::{CheckoutService, OrderService};

use domain::value_objects::MoneyError;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorefrontError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<MoneyError> for StorefrontError {
    fn from(e: MoneyError) -> Self { Self::Checkout(e.into()) }
}

/// How a failure should be surfaced to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input itself is wrong; the user can fix it.
    Validation,
    /// Well-formed, but a business rule refuses it.
    Rejected,
    NotFound,
    /// The caller is not signed in, or the backend no longer accepts the token.
    Unauthorized,
    /// Another request for the same checkout is still running.
    Conflict,
    /// The backend or a gateway failed.
    Upstream,
}

impl StorefrontError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Checkout(CheckoutError::InvalidShipping(_) | CheckoutError::CouponCode(_)) => ErrorKind::Validation,
            Self::Checkout(CheckoutError::DraftNotFound(_)) => ErrorKind::NotFound,
            Self::Checkout(CheckoutError::RequestInFlight(_)) => ErrorKind::Conflict,
            Self::Checkout(_) | Self::Order(_) => ErrorKind::Rejected,
            Self::Payment(PaymentError::UnsupportedCallback(_)) => ErrorKind::Validation,
            Self::Payment(PaymentError::Api(e)) | Self::Api(e) => match e {
                ApiError::NotFound(_) => ErrorKind::NotFound,
                e if e.is_unauthorized() => ErrorKind::Unauthorized,
                e if e.is_rejection() => ErrorKind::Rejected,
                _ => ErrorKind::Upstream,
            },
            Self::Payment(PaymentError::MissingPaymentUrl(_)) => ErrorKind::Upstream,
            Self::Config(_) => ErrorKind::Validation,
        }
    }

    pub fn is_validation(&self) -> bool { self.kind() == ErrorKind::Validation }

    pub fn user_message(&self) -> String {
        match self {
            Self::Checkout(e) => e.user_message(),
            Self::Order(e) => e.to_string(),
            Self::Payment(e) => e.user_message(),
            Self::Api(e) => e.user_message(),
            Self::Config(e) => e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorefrontError>;

#[cfg(test)]
mod tests {
    use super::*;
    use domain::aggregates::{CheckoutStep, InFlight};

    #[test]
    fn test_error_kinds() {
        assert_eq!(StorefrontError::from(CheckoutError::RequestInFlight(InFlight::Submission)).kind(), ErrorKind::Conflict);
        assert_eq!(StorefrontError::from(CheckoutError::Locked(CheckoutStep::Processing)).kind(), ErrorKind::Rejected);
        assert_eq!(StorefrontError::from(ApiError::Timeout).kind(), ErrorKind::Upstream);
        assert!(StorefrontError::from(ConfigError::Missing("API_BASE_URL")).is_validation());
        assert_eq!(StorefrontError::from(ApiError::NotFound("x".into())).kind(), ErrorKind::NotFound);
        assert_eq!(StorefrontError::from(ApiError::Status { status: 401, message: "jwt expired".into() }).kind(), ErrorKind::Unauthorized);
        let rejected = ApiError::Status { status: 422, message: "Order cannot be cancelled".into() };
        assert_eq!(StorefrontError::from(PaymentError::Api(rejected.clone())).kind(), ErrorKind::Rejected);
        assert_eq!(StorefrontError::from(rejected).user_message(), "Order cannot be cancelled");
    }
}
