// src/validator.rs

use crate::config::ValidationDetails;
use crate::error::ValidationError;
use crate::model::Jwks;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{crypto, decode, Algorithm, DecodingKey, Header, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// The scopes granted to a token, normalised from either claim form:
/// a space-delimited string (`"openid readUser"`) or an array of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn from_claim(value: Option<&Value>) -> Self {
        let scopes = match value {
            Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => BTreeSet::new(),
        };
        Self(scopes)
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The verified claim set of a JWT.
///
/// The raw mapping is kept intact so it can be forwarded to callers; `scope`
/// is decoded once into a [`ScopeSet`] when the claims are built.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    raw: Map<String, Value>,
    scopes: ScopeSet,
}

impl Claims {
    pub fn new(raw: Map<String, Value>) -> Self {
        let scopes = ScopeSet::from_claim(raw.get("scope"));
        Self { raw, scopes }
    }

    /// The subject identifier, stringified; empty if the token has none.
    pub fn sub(&self) -> String {
        match self.raw.get("sub") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn nonce(&self) -> Option<&str> {
        self.raw.get("nonce").and_then(Value::as_str)
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.raw.get(claim)
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn into_raw(self) -> Map<String, Value> {
        self.raw
    }
}

/// Validates an OIDC ID token issued for this login attempt.
///
/// In order:
/// 1. Reads `kid` and `alg` from the unverified header; a missing `alg`
///    means RS256.
/// 2. Selects the JWK with exactly that `kid`.
/// 3. Verifies the signature with the header's algorithm, which must be in
///    the allow-list, then `iss`, `aud`, `exp` (and `nbf` when present).
/// 4. Compares the `nonce` claim with `expected_nonce`.
pub fn validate_id_token(
    token: &str,
    jwks: &Jwks,
    issuer: &str,
    audience: &str,
    expected_nonce: &str,
    details: &ValidationDetails,
) -> Result<Claims, ValidationError> {
    let claims = verify(token, jwks, issuer, audience, details)?;

    // Binds the token to the browser that started this login.
    if claims.nonce() != Some(expected_nonce) {
        warn!(sub = %claims.sub(), "ID token nonce does not match the login attempt");
        return Err(ValidationError::NonceMismatch);
    }

    debug!(sub = %claims.sub(), "ID token validated");
    Ok(claims)
}

/// Validates a JWT access token. Same checks as [`validate_id_token`] minus the nonce.
pub fn validate_access_token(
    token: &str,
    jwks: &Jwks,
    issuer: &str,
    audience: &str,
    details: &ValidationDetails,
) -> Result<Claims, ValidationError> {
    let claims = verify(token, jwks, issuer, audience, details)?;
    debug!(sub = %claims.sub(), "Access token validated");
    Ok(claims)
}

/// The header fields the validator reads.
#[derive(Deserialize)]
struct TokenHeader {
    kid: Option<String>,
    alg: Option<Algorithm>,
}

/// Splits a compact JWS and decodes its header.
fn split_token(token: &str) -> Result<(TokenHeader, &str, &str, &str), ValidationError> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        debug!("JWT is not three dot-separated parts");
        return Err(ValidationError::MalformedHeader);
    };
    let decoded: TokenHeader = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
        .map_err(|e| {
            debug!(error = %e, "Unparseable JWT header");
            ValidationError::MalformedHeader
        })?;
    Ok((decoded, header, payload, signature))
}

fn key_fits(jwk: &Jwk, alg: Algorithm) -> bool {
    use Algorithm::*;
    matches!(
        (&jwk.algorithm, alg),
        (AlgorithmParameters::RSA(_), RS256 | RS384 | RS512 | PS256 | PS384 | PS512)
            | (AlgorithmParameters::EllipticCurve(_), ES256 | ES384)
            | (AlgorithmParameters::OctetKey(_), HS256 | HS384 | HS512)
            | (AlgorithmParameters::OctetKeyPair(_), EdDSA)
    )
}

fn verify(
    token: &str,
    jwks: &Jwks,
    issuer: &str,
    audience: &str,
    details: &ValidationDetails,
) -> Result<Claims, ValidationError> {
    // 1. Read kid and alg from the unverified header.
    let (header, encoded_header, payload, signature) = split_token(token)?;

    let kid = header
        .kid
        .filter(|kid| !kid.is_empty())
        .ok_or(ValidationError::MissingKeyId)?;

    // 2. Locate the key. A miss here usually means the provider rotated keys.
    let jwk_json = jwks.find(&kid).ok_or_else(|| {
        warn!(kid = %kid, "No JWK matches the token's kid");
        ValidationError::KeyNotFound(kid.clone())
    })?;

    // 3. The algorithm comes from the header (RS256 when absent) and must be allow-listed.
    let alg = header.alg.unwrap_or(Algorithm::RS256);
    if !details.algorithms.contains(&alg) {
        warn!(alg = ?alg, "JWT signed with a disallowed algorithm");
        return Err(ValidationError::DisallowedAlgorithm(alg));
    }

    let jwk: Jwk = serde_json::from_value(Value::Object(jwk_json.clone())).map_err(|e| {
        warn!(kid = %kid, error = %e, "JWK could not be parsed");
        ValidationError::UnusableKey(kid.clone())
    })?;
    let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|e| {
        warn!(kid = %kid, error = %e, "JWK could not be used as a decoding key");
        ValidationError::UnusableKey(kid.clone())
    })?;

    let rejected = |detail: String| {
        warn!(kid = %kid, detail = %detail, "JWT rejected");
        ValidationError::Rejected { detail }
    };

    // 4. Signature over the token's own header and payload bytes.
    if !key_fits(&jwk, alg) {
        return Err(rejected("key does not match algorithm".to_string()));
    }
    let message = &token[..encoded_header.len() + 1 + payload.len()];
    match crypto::verify(signature, message.as_bytes(), &decoding_key, alg) {
        Ok(true) => {}
        Ok(false) => return Err(rejected("invalid signature".to_string())),
        Err(e) => return Err(rejected(format!("{:?}", e.kind()))),
    }

    // 5. Registered claims. The signature is already checked, so the claims
    // are decoded under a header naming the resolved algorithm.
    let mut validation = Validation::new(alg);
    validation.insecure_disable_signature_validation();
    validation.leeway = details.leeway.as_secs();
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);

    let resolved_header = serde_json::to_vec(&Header::new(alg))
        .map_err(|e| rejected(format!("header could not be encoded: {e}")))?;
    let claims_token = format!("{}.{payload}.", URL_SAFE_NO_PAD.encode(resolved_header));

    let token_data = decode::<Map<String, Value>>(&claims_token, &decoding_key, &validation)
        .map_err(|e| {
            rejected(match e.kind() {
                ErrorKind::InvalidIssuer => "issuer mismatch".to_string(),
                ErrorKind::InvalidAudience => "audience mismatch".to_string(),
                ErrorKind::ExpiredSignature => "token expired".to_string(),
                ErrorKind::ImmatureSignature => "token not yet valid".to_string(),
                ErrorKind::MissingRequiredClaim(claim) => format!("missing claim '{claim}'"),
                other => format!("{other:?}"),
            })
        })?;

    Ok(Claims::new(token_data.claims))
}
