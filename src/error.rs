// src/error.rs

use jsonwebtoken::Algorithm;
use thiserror::Error;

/// Reasons a JWT was refused by the validator.
///
/// `KeyNotFound` is kept apart from `Rejected` so that key rotation problems
/// can be told apart from forged or misbound tokens in logs and metrics.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// The JOSE header could not be decoded (including a missing `alg`).
    #[error("Invalid JWT header")]
    MalformedHeader,

    /// The JWT header is missing the 'kid' (Key ID) field, or it is empty.
    #[error("The JWT header is missing the 'kid' (Key ID) field")]
    MissingKeyId,

    /// No key in the JWKS carries the token's `kid`.
    #[error("No matching key for kid: {0}")]
    KeyNotFound(String),

    /// The matching JWK could not be turned into a verification key.
    #[error("The signing key for kid {0} is unusable")]
    UnusableKey(String),

    /// The header names an algorithm outside the configured allow-list.
    #[error("Disallowed JWT algorithm: {0:?}")]
    DisallowedAlgorithm(Algorithm),

    /// Signature, issuer, audience or time-window check failed.
    ///
    /// Display is the same for every cause; `detail` is for server-side logs.
    #[error("Token validation failed")]
    Rejected { detail: String },

    /// The `nonce` claim is absent or differs from the one issued for this login.
    #[error("Nonce mismatch")]
    NonceMismatch,
}

impl ValidationError {
    /// Internal diagnostic text, never meant for end users.
    pub fn detail(&self) -> String {
        match self {
            ValidationError::Rejected { detail } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Which anti-forgery check tripped during the callback.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AntiForgeryReason {
    #[error("state does not match the login attempt")]
    StateMismatch,
    #[error("authorization code is missing")]
    MissingCode,
    #[error("PKCE verifier is missing from the session")]
    MissingVerifier,
    #[error("nonce is missing from the session")]
    MissingNonce,
}

/// The primary error type for the `feide-oidc` library.
#[derive(Debug, Clone, Error)]
pub enum FeideOidcError {
    /// A decoded JSON value did not have the expected object/array shape.
    #[error("Unexpected JSON shape: {0}")]
    Shape(String),

    /// A provider document is missing a field or has one of the wrong type.
    #[error("Malformed provider response: {0}")]
    Decode(String),

    /// The token failed signature or claim validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The identity provider (or another upstream) answered with an error,
    /// an unusable body, or not at all.
    #[error("Upstream request failed: {context}")]
    Protocol {
        context: String,
        status: Option<u16>,
    },

    /// The callback did not belong to a login attempt started by this session.
    #[error("Anti-forgery check failed: {0}")]
    AntiForgery(#[from] AntiForgeryReason),

    /// No usable `Authorization: Bearer` header was presented.
    #[error("Missing or malformed bearer token")]
    MissingToken,

    /// The access token is valid but lacks the scope the endpoint requires.
    #[error("Missing required scope: {0}")]
    InsufficientScope(String),

    /// The session has no logged-in user.
    #[error("Not logged in")]
    NotAuthenticated,

    /// A step of the flow was requested before the step it depends on.
    #[error("{0}")]
    Precondition(String),

    /// An optional feature was used without being configured.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl FeideOidcError {
    pub(crate) fn protocol(context: impl Into<String>, status: Option<u16>) -> Self {
        FeideOidcError::Protocol {
            context: context.into(),
            status,
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeideOidcError::Protocol { .. })
    }
}
