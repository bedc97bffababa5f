//! The caller's bearer token, forwarded to every backend call made on their behalf.

use axum::{extract::FromRequestParts, http::{header, request::Parts}};

use super::error::AppError;
use crate::api::Credentials;

/// Rejects the request with 401 when no usable `Authorization: Bearer` header is present.
pub struct Customer(pub Credentials);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Customer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(Credentials::from_header)
            .map(Customer)
            .ok_or(AppError::Unauthorized)
    }
}
