//! HTTP surface: the login app and the data-source API as axum routers.

pub mod login;
pub mod resource;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::FeideOidcError;

/// JSON error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// A [`FeideOidcError`] paired with the status it is answered with.
///
/// Most errors map to one status everywhere; a handler can override that for
/// its own endpoint with [`ApiError::with_status`].
#[derive(Debug)]
pub struct ApiError {
    error: FeideOidcError,
    status: StatusCode,
}

impl ApiError {
    pub fn with_status(error: FeideOidcError, status: StatusCode) -> Self {
        Self { error, status }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<FeideOidcError> for ApiError {
    fn from(error: FeideOidcError) -> Self {
        let status = status_code(&error);
        Self { error, status }
    }
}

/// The status an error gets when the endpoint does not say otherwise.
pub fn status_code(error: &FeideOidcError) -> StatusCode {
    match error {
        FeideOidcError::Shape(_) | FeideOidcError::Decode(_) | FeideOidcError::Protocol { .. } => {
            StatusCode::BAD_GATEWAY
        }
        FeideOidcError::Validation(_)
        | FeideOidcError::MissingToken
        | FeideOidcError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        FeideOidcError::InsufficientScope(_) => StatusCode::FORBIDDEN,
        FeideOidcError::AntiForgery(_)
        | FeideOidcError::Precondition(_)
        | FeideOidcError::NotConfigured(_) => StatusCode::BAD_REQUEST,
        FeideOidcError::InvalidUrl(_)
        | FeideOidcError::MissingConfiguration(_)
        | FeideOidcError::InvalidConfiguration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_code(error: &FeideOidcError) -> &'static str {
    match error {
        FeideOidcError::Shape(_) | FeideOidcError::Decode(_) | FeideOidcError::Protocol { .. } => {
            "upstream_error"
        }
        FeideOidcError::Validation(_) => "invalid_token",
        FeideOidcError::MissingToken => "missing_token",
        FeideOidcError::NotAuthenticated => "not_authenticated",
        FeideOidcError::InsufficientScope(_) => "insufficient_scope",
        FeideOidcError::AntiForgery(_) => "invalid_callback",
        FeideOidcError::Precondition(_) => "invalid_request",
        FeideOidcError::NotConfigured(_) => "not_configured",
        FeideOidcError::InvalidUrl(_)
        | FeideOidcError::MissingConfiguration(_)
        | FeideOidcError::InvalidConfiguration(_) => "server_error",
    }
}

// Upstream bodies, token details and config values stay in the logs.
fn public_message(error: &FeideOidcError) -> String {
    match error {
        FeideOidcError::Shape(_) | FeideOidcError::Decode(_) | FeideOidcError::Protocol { .. } => {
            "The identity provider request failed".to_string()
        }
        FeideOidcError::Validation(_) => "Invalid token".to_string(),
        FeideOidcError::AntiForgery(_) => {
            "Invalid login callback. Please start the login again.".to_string()
        }
        FeideOidcError::MissingToken
        | FeideOidcError::InsufficientScope(_)
        | FeideOidcError::NotAuthenticated
        | FeideOidcError::Precondition(_) => error.to_string(),
        FeideOidcError::NotConfigured(what) => format!("{what} is not configured"),
        FeideOidcError::InvalidUrl(_)
        | FeideOidcError::MissingConfiguration(_)
        | FeideOidcError::InvalidConfiguration(_) => "Internal server error".to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.error {
            FeideOidcError::AntiForgery(reason) => {
                warn!(%reason, "Rejected callback (possible forgery)");
            }
            FeideOidcError::Validation(e) => {
                warn!(status = %self.status, detail = %e.detail(), "Token rejected");
            }
            other if self.status.is_server_error() => {
                error!(status = %self.status, error = %other, "Request failed");
            }
            other => warn!(status = %self.status, error = %other, "Request refused"),
        }

        let body = ErrorBody {
            error: error_code(&self.error),
            message: public_message(&self.error),
        };
        let mut response = (self.status, Json(body)).into_response();
        let bearer_challenge = matches!(
            self.error,
            FeideOidcError::MissingToken | FeideOidcError::Validation(_)
        );
        if bearer_challenge && self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

/// A `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    match header::HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => ApiError::from(FeideOidcError::InvalidUrl(
            "redirect target is not a valid header value".to_string(),
        ))
        .into_response(),
    }
}
