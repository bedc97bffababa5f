use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::domain::aggregates::{CheckoutError, FieldErrors};
use crate::{ErrorKind, StorefrontError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Missing or malformed bearer token")]
    Unauthorized,

    #[error(transparent)]
    Storefront(#[from] StorefrontError),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self { Self::MalformedPayload(rejection.body_text()) }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a FieldErrors>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, fields) = match &self {
            AppError::MalformedPayload(detail) => {
                warn!(%detail, "Rejected malformed payload");
                (StatusCode::UNPROCESSABLE_ENTITY, "The request could not be read.".to_string(), None)
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Please sign in to continue.".to_string(), None),
            AppError::Storefront(e) => {
                let status = match e.kind() {
                    ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::Rejected => StatusCode::BAD_REQUEST,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                    ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::Upstream => {
                        error!(error = %e, "Upstream failure");
                        StatusCode::BAD_GATEWAY
                    }
                };
                let fields = match e {
                    StorefrontError::Checkout(CheckoutError::InvalidShipping(fields)) => Some(fields),
                    _ => None,
                };
                (status, e.user_message(), fields)
            }
        };
        (status, Json(ErrorBody { message, fields })).into_response()
    }
}
