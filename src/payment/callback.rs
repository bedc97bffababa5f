//! Gateway return handling.
//!
//! Recognized failure codes end the payment immediately. Anything else is
//! handed to the backend, which verifies the gateway signature and is the
//! only source of a successful outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::pending::{PendingPayment, PendingPaymentStore};
use super::PaymentError;
use crate::api::StorefrontApi;
use crate::domain::aggregates::{PaymentMethod, PaymentStatus};

/// Raw query parameters of a gateway return URL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackParams(BTreeMap<String, String>);

impl CallbackParams {
    pub fn new(params: BTreeMap<String, String>) -> Self { Self(params) }
    pub fn get(&self, key: &str) -> Option<&str> { self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) }
    fn first(&self, keys: &[&str]) -> Option<&str> { keys.iter().find_map(|k| self.get(k)) }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CallbackParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

struct GatewayCodes {
    status_keys: &'static [&'static str],
    reference_keys: &'static [&'static str],
    failures: &'static [(&'static str, &'static str)],
}

const MOMO: GatewayCodes = GatewayCodes {
    status_keys: &["resultCode", "errorCode"],
    reference_keys: &["orderId"],
    failures: &[
        ("1001", "Insufficient balance in the MoMo wallet."),
        ("1002", "The transaction was refused by the issuer."),
        ("1003", "The transaction was cancelled."),
        ("1004", "The amount exceeds your payment limit."),
        ("1005", "The payment link or QR code has expired."),
        ("1006", "You declined the payment."),
        ("1007", "The MoMo account is inactive."),
        ("1026", "The transaction is restricted by MoMo policy."),
        ("1080", "The refund attempt failed."),
        ("1081", "The refund was rejected."),
        ("2019", "The order is invalid."),
        ("4001", "The transaction is restricted for this account."),
        ("4100", "You did not log in to MoMo."),
    ],
};

const ZALOPAY: GatewayCodes = GatewayCodes {
    status_keys: &["errorCode", "status"],
    reference_keys: &["apptransid", "appTransId", "app_trans_id"],
    failures: &[
        ("-49", "You cancelled the payment."),
        ("-54", "The payment session has expired."),
        ("-68", "The order already exists at ZaloPay."),
        ("-217", "The payment could not be processed."),
    ],
};

const VNPAY: GatewayCodes = GatewayCodes {
    status_keys: &["vnp_ResponseCode"],
    reference_keys: &["vnp_TxnRef"],
    failures: &[
        ("09", "Internet banking is not registered for this card."),
        ("10", "Card authentication failed too many times."),
        ("11", "The payment session has expired."),
        ("12", "The card or account is locked."),
        ("13", "The one-time password was wrong."),
        ("24", "You cancelled the payment."),
        ("51", "Insufficient account balance."),
        ("65", "The daily transaction limit was exceeded."),
        ("75", "The bank is under maintenance."),
        ("79", "Too many wrong payment passwords."),
        ("99", "The payment failed."),
    ],
};

fn codes(method: PaymentMethod) -> Option<&'static GatewayCodes> {
    match method {
        PaymentMethod::Momo => Some(&MOMO),
        PaymentMethod::Zalopay => Some(&ZALOPAY),
        PaymentMethod::Vnpay => Some(&VNPAY),
        PaymentMethod::Cod => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackVerdict {
    /// A recognized failure code; no verification needed.
    Failed { code: String, message: String },
    /// Only the backend can tell.
    Verify,
}

/// Checks the return parameters against the gateway's known failure codes.
pub fn classify(method: PaymentMethod, params: &CallbackParams) -> Result<CallbackVerdict, PaymentError> {
    let gateway = codes(method).ok_or(PaymentError::UnsupportedCallback(method))?;
    for key in gateway.status_keys {
        let Some(code) = params.get(key) else { continue };
        if let Some((_, message)) = gateway.failures.iter().find(|(c, _)| *c == code) {
            return Ok(CallbackVerdict::Failed { code: code.to_string(), message: message.to_string() });
        }
    }
    Ok(CallbackVerdict::Verify)
}

/// Gateway-side order reference found in the return parameters.
pub fn order_reference(method: PaymentMethod, params: &CallbackParams) -> Option<String> {
    codes(method).and_then(|g| params.first(g.reference_keys)).map(str::to_string)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded { order_id: String },
    Pending { order_id: Option<String>, message: Option<String> },
    Failed { order_id: Option<String>, code: Option<String>, message: String },
    /// Verification itself failed; the payment may still have gone through.
    Unverified { order_id: Option<String>, message: String },
}

impl PaymentOutcome {
    pub fn is_success(&self) -> bool { matches!(self, Self::Succeeded { .. }) }

    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::Succeeded { order_id } => Some(order_id.as_str()),
            Self::Pending { order_id, .. } | Self::Failed { order_id, .. } | Self::Unverified { order_id, .. } => order_id.as_deref(),
        }
    }

    /// Storefront page the customer lands on.
    pub fn redirect_url(&self, storefront: &Url) -> Url {
        let page = match self {
            Self::Succeeded { .. } => "checkout/success",
            Self::Failed { .. } => "checkout/failed",
            Self::Pending { .. } | Self::Unverified { .. } => "checkout/pending",
        };
        let mut url = storefront.clone();
        let base = storefront.path().trim_end_matches('/');
        url.set_path(&format!("{base}/{page}"));
        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            if let Some(id) = self.order_id() { query.append_pair("orderId", id); }
            match self {
                Self::Failed { message, code, .. } => {
                    query.append_pair("reason", message);
                    if let Some(code) = code { query.append_pair("code", code); }
                }
                Self::Unverified { message, .. } | Self::Pending { message: Some(message), .. } => { query.append_pair("message", message); }
                _ => {}
            }
        }
        if url.query() == Some("") { url.set_query(None); }
        url
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallbackResolution {
    pub outcome: PaymentOutcome,
    /// The record remembered at dispatch time, if any.
    pub pending: Option<PendingPayment>,
}

#[derive(Clone)]
pub struct CallbackHandler {
    api: Arc<dyn StorefrontApi>,
    pending: Arc<dyn PendingPaymentStore>,
}

impl CallbackHandler {
    pub fn new(api: Arc<dyn StorefrontApi>, pending: Arc<dyn PendingPaymentStore>) -> Self {
        Self { api, pending }
    }

    #[instrument(skip(self, method, params), fields(method = %method))]
    pub async fn handle(&self, method: PaymentMethod, params: &CallbackParams) -> Result<CallbackResolution, PaymentError> {
        let verdict = classify(method, params)?;
        let reference = order_reference(method, params);
        let pending = reference.as_deref().and_then(|r| self.pending.find(r));
        let order_id = pending.as_ref().map(|p| p.order_id.clone()).or(reference);

        let outcome = match verdict {
            CallbackVerdict::Failed { code, message } => {
                warn!(code = %code, order_id = ?order_id, "Gateway reported failure");
                PaymentOutcome::Failed { order_id: order_id.clone(), code: Some(code), message }
            }
            CallbackVerdict::Verify => match self.api.verify_payment(method, params).await {
                Ok(report) => {
                    let order_id = report.order_id.clone().or(order_id.clone());
                    match (report.status, order_id) {
                        (PaymentStatus::Paid, Some(order_id)) => PaymentOutcome::Succeeded { order_id },
                        (PaymentStatus::Paid, None) => PaymentOutcome::Unverified { order_id: None, message: "Payment confirmed without an order reference.".into() },
                        (PaymentStatus::Pending, order_id) => PaymentOutcome::Pending { order_id, message: report.message },
                        (_, order_id) => PaymentOutcome::Failed {
                            order_id, code: None,
                            message: report.message.unwrap_or_else(|| "The payment was not completed.".into()),
                        },
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Payment verification failed");
                    PaymentOutcome::Unverified { order_id: order_id.clone(), message: "We could not confirm your payment yet. Please check your order history.".into() }
                }
            },
        };

        if matches!(outcome, PaymentOutcome::Succeeded { .. } | PaymentOutcome::Failed { .. }) {
            if let Some(id) = outcome.order_id() { self.pending.forget(id); }
        }
        info!(outcome = ?outcome, "Payment callback resolved");
        Ok(CallbackResolution { outcome, pending })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::api::{ApiError, PaymentReport};
    use crate::domain::value_objects::Money;
    use crate::payment::pending::InMemoryPendingStore;
    use chrono::Utc;

    fn params(pairs: &[(&str, &str)]) -> CallbackParams { pairs.iter().copied().collect() }

    fn handler(api: Arc<FakeApi>, pending: Arc<InMemoryPendingStore>) -> CallbackHandler { CallbackHandler::new(api, pending) }

    fn remember(store: &InMemoryPendingStore, order_id: &str, method: PaymentMethod, transaction_ref: Option<&str>) {
        store.remember(PendingPayment {
            order_id: order_id.into(), session_id: "s1".into(), method, amount: Money::default(),
            transaction_ref: transaction_ref.map(str::to_string), created_at: Utc::now(),
        });
    }

    #[test]
    fn test_known_failure_codes() {
        assert!(matches!(classify(PaymentMethod::Momo, &params(&[("resultCode", "1006")])).unwrap(), CallbackVerdict::Failed { .. }));
        assert!(matches!(classify(PaymentMethod::Zalopay, &params(&[("status", "-49")])).unwrap(), CallbackVerdict::Failed { .. }));
        assert!(matches!(classify(PaymentMethod::Vnpay, &params(&[("vnp_ResponseCode", "24")])).unwrap(), CallbackVerdict::Failed { .. }));
        assert_eq!(classify(PaymentMethod::Vnpay, &params(&[("vnp_ResponseCode", "00")])).unwrap(), CallbackVerdict::Verify);
        assert_eq!(classify(PaymentMethod::Momo, &params(&[])).unwrap(), CallbackVerdict::Verify);
        assert_eq!(classify(PaymentMethod::Cod, &params(&[])), Err(PaymentError::UnsupportedCallback(PaymentMethod::Cod)));
    }

    #[tokio::test]
    async fn test_failure_codes_never_succeed() {
        let api = Arc::new(FakeApi::default());
        // even a backend that would say "paid" is not consulted
        api.set_payment_report(PaymentReport { order_id: Some("o1".into()), status: PaymentStatus::Paid, message: None });
        let h = handler(api.clone(), Arc::new(InMemoryPendingStore::new()));
        let cases = [
            (PaymentMethod::Momo, MOMO.status_keys[0], MOMO.failures),
            (PaymentMethod::Zalopay, ZALOPAY.status_keys[0], ZALOPAY.failures),
            (PaymentMethod::Vnpay, VNPAY.status_keys[0], VNPAY.failures),
        ];
        for (method, key, failures) in cases {
            for &(code, _) in failures {
                let res = h.handle(method, &params(&[(key, code)])).await.unwrap();
                assert!(!res.outcome.is_success(), "{method} {code}");
            }
        }
        assert_eq!(api.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_success_comes_from_backend() {
        let api = Arc::new(FakeApi::default());
        api.set_payment_report(PaymentReport { order_id: None, status: PaymentStatus::Paid, message: None });
        let pending = Arc::new(InMemoryPendingStore::new());
        remember(&pending, "o7", PaymentMethod::Zalopay, Some("250101_77"));
        let h = handler(api.clone(), pending.clone());
        let res = h.handle(PaymentMethod::Zalopay, &params(&[("apptransid", "250101_77"), ("status", "1")])).await.unwrap();
        assert_eq!(res.outcome, PaymentOutcome::Succeeded { order_id: "o7".into() });
        assert_eq!(res.pending.unwrap().session_id, "s1");
        assert!(pending.is_empty());
        assert_eq!(api.verify_calls(), 1);
    }

    #[tokio::test]
    async fn test_backend_pending_keeps_record() {
        let api = Arc::new(FakeApi::default());
        api.set_payment_report(PaymentReport { order_id: Some("o2".into()), status: PaymentStatus::Pending, message: None });
        let pending = Arc::new(InMemoryPendingStore::new());
        remember(&pending, "o2", PaymentMethod::Vnpay, None);
        let res = handler(api, pending.clone()).handle(PaymentMethod::Vnpay, &params(&[("vnp_ResponseCode", "00"), ("vnp_TxnRef", "o2")])).await.unwrap();
        assert!(matches!(res.outcome, PaymentOutcome::Pending { .. }));
        assert!(!pending.is_empty());
    }

    #[tokio::test]
    async fn test_verification_error_is_not_success() {
        let api = Arc::new(FakeApi::default());
        api.fail_verification(ApiError::Timeout);
        let res = handler(api, Arc::new(InMemoryPendingStore::new()))
            .handle(PaymentMethod::Momo, &params(&[("resultCode", "0"), ("orderId", "o3")])).await.unwrap();
        assert!(matches!(res.outcome, PaymentOutcome::Unverified { order_id: Some(ref id), .. } if id == "o3"));
    }

    #[test]
    fn test_redirect_urls() {
        let base = Url::parse("https://yensao.example.com/").unwrap();
        let ok = PaymentOutcome::Succeeded { order_id: "o1".into() }.redirect_url(&base);
        assert_eq!(ok.as_str(), "https://yensao.example.com/checkout/success?orderId=o1");
        let failed = PaymentOutcome::Failed { order_id: None, code: Some("24".into()), message: "You cancelled the payment.".into() }.redirect_url(&base);
        assert_eq!(failed.path(), "/checkout/failed");
        assert!(failed.query().unwrap().contains("code=24"));
    }
}
