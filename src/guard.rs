// src/guard.rs

use tracing::{debug, warn};

use crate::config::ValidationDetails;
use crate::error::FeideOidcError;
use crate::model::Jwks;
use crate::validator::{validate_access_token, Claims};

const BEARER_PREFIX: &str = "Bearer ";

/// Extracts the token from an `Authorization` header value.
///
/// The scheme must be exactly `Bearer` followed by one space; the token is
/// trimmed and must not be empty.
pub fn extract_bearer(header: Option<&str>) -> Result<&str, FeideOidcError> {
    header
        .and_then(|h| h.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(FeideOidcError::MissingToken)
}

/// Validates the bearer token on a request and enforces `required_scope`.
pub fn authorize(
    header: Option<&str>,
    jwks: &Jwks,
    issuer: &str,
    audience: &str,
    required_scope: &str,
    details: &ValidationDetails,
) -> Result<Claims, FeideOidcError> {
    let token = extract_bearer(header)?;
    let claims = validate_access_token(token, jwks, issuer, audience, details)?;

    if !claims.scopes().contains(required_scope) {
        warn!(sub = %claims.sub(), required_scope, "Access token lacks the required scope");
        return Err(FeideOidcError::InsufficientScope(required_scope.to_string()));
    }

    debug!(sub = %claims.sub(), "Request authorized");
    Ok(claims)
}
