use std::sync::Arc;

use chrono::Utc;
use reqwest::Url;
use serde::Serialize;
use tracing::{info, instrument};

use super::pending::{PendingPayment, PendingPaymentStore};
use super::PaymentError;
use crate::api::{CreatePaymentRequest, Credentials, StorefrontApi};
use crate::domain::aggregates::{Order, PaymentMethod};
use crate::domain::value_objects::Money;

/// What the storefront should do next after an order is placed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Cash on delivery: go straight to the confirmation page.
    Confirm { order_id: String },
    /// MoMo: show the modal with the app deep link and QR code.
    OpenModal { order_id: String, pay_url: Option<String>, deeplink: Option<String>, qr_code_url: Option<String> },
    /// Full-page redirect to the gateway.
    Redirect { order_id: String, url: String },
}

#[derive(Clone)]
pub struct PaymentDispatcher {
    api: Arc<dyn StorefrontApi>,
    pending: Arc<dyn PendingPaymentStore>,
    public_url: Url,
}

impl PaymentDispatcher {
    pub fn new(api: Arc<dyn StorefrontApi>, pending: Arc<dyn PendingPaymentStore>, public_url: Url) -> Self {
        Self { api, pending, public_url }
    }

    /// Where the gateway sends the customer back to.
    pub fn return_url(&self, method: PaymentMethod) -> String {
        format!("{}/payment/{}/return", self.public_url.as_str().trim_end_matches('/'), method)
    }

    /// A pending record is kept only once the gateway has handed back somewhere to pay.
    #[instrument(skip(self, auth, order, amount), fields(order_id = %order.id(), method = %order.payment_method()))]
    pub async fn dispatch(&self, auth: &Credentials, session_id: &str, order: &Order, amount: &Money) -> Result<DispatchOutcome, PaymentError> {
        let method = order.payment_method();
        let order_id = order.id().to_string();
        if !method.is_online() {
            info!("Cash on delivery, no gateway call");
            return Ok(DispatchOutcome::Confirm { order_id });
        }

        let request = CreatePaymentRequest {
            order_id: order_id.clone(),
            amount: amount.amount(),
            payment_method: method,
            return_url: self.return_url(method),
            order_info: format!("Payment for order {}", order.order_number()),
        };
        let session = self.api.create_payment(auth, &request).await?;
        let transaction_ref = session.transaction_ref.clone();

        let outcome = match method {
            PaymentMethod::Momo => {
                if session.pay_url.is_none() && session.deeplink.is_none() {
                    return Err(PaymentError::MissingPaymentUrl(method));
                }
                DispatchOutcome::OpenModal { order_id: order_id.clone(), pay_url: session.pay_url, deeplink: session.deeplink, qr_code_url: session.qr_code_url }
            }
            _ => {
                let url = session.pay_url.ok_or(PaymentError::MissingPaymentUrl(method))?;
                DispatchOutcome::Redirect { order_id: order_id.clone(), url }
            }
        };

        self.pending.remember(PendingPayment {
            order_id,
            session_id: session_id.to_string(),
            method,
            amount: amount.clone(),
            transaction_ref,
            created_at: Utc::now(),
        });
        info!(action = ?outcome, "Payment session created");
        Ok(outcome)
    }
}
