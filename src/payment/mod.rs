//! Payment gateway plumbing: dispatching a placed order to its payment method
//! and interpreting what the gateway sends back.

pub mod callback;
pub mod dispatch;
pub mod pending;

pub use callback::{CallbackHandler, CallbackParams, CallbackResolution, CallbackVerdict, PaymentOutcome};
pub use dispatch::{DispatchOutcome, PaymentDispatcher};
pub use pending::{InMemoryPendingStore, PendingPayment, PendingPaymentStore};

use crate::api::ApiError;
use crate::domain::aggregates::PaymentMethod;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PaymentError {
    #[error("{0} does not use a gateway callback")]
    UnsupportedCallback(PaymentMethod),
    #[error("gateway for {0} returned no payment URL")]
    MissingPaymentUrl(PaymentMethod),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl PaymentError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(e) => e.user_message(),
            _ => "Unable to start the payment. Please choose another payment method.".into(),
        }
    }
}
