// src/client.rs

use crate::config::ClientConfig;
use crate::error::FeideOidcError;
use crate::json::require_object;
use crate::model::{DiscoveryDocument, Jwks, TokenExchangeResponse, TokenResponse};
use moka::future::Cache;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use url::Url;

pub const TOKEN_EXCHANGE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
pub const JWT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";

// Upstream bodies are echoed into error context for server-side logs only.
const MAX_ERROR_BODY: usize = 512;

/// Parameters of an RFC 8693 token exchange.
#[derive(Debug, Clone)]
pub struct TokenExchangeRequest<'a> {
    pub subject_token: &'a str,
    pub audience: &'a str,
    /// An empty scope asks for every scope the client may receive.
    pub scope: &'a str,
    pub subject_token_type: &'a str,
    pub requested_token_type: Option<&'a str>,
}

impl<'a> TokenExchangeRequest<'a> {
    /// Exchange of an opaque access token, the form used by the login app.
    pub fn for_access_token(subject_token: &'a str, audience: &'a str, scope: &'a str) -> Self {
        Self {
            subject_token,
            audience,
            scope,
            subject_token_type: ACCESS_TOKEN_TYPE,
            requested_token_type: None,
        }
    }
}

/// Parameters of the authorization request sent to the browser.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub scope: &'a str,
    pub state: &'a str,
    pub nonce: &'a str,
    pub code_challenge: &'a str,
}

/// A client for all network interaction with the identity provider.
///
/// One instance owns one discovery/JWKS cache. Each slot is filled by the
/// first caller that needs it (concurrent callers share that fetch), failures
/// are not cached, and the slots are kept until [`OidcClient::refresh`] or
/// the optional TTL from the configuration.
#[derive(Clone)]
pub struct OidcClient {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    http_client: reqwest::Client,
    discovery: Cache<(), Arc<DiscoveryDocument>>,
    jwks: Cache<(), Arc<Jwks>>,
}

fn slot<V: Clone + Send + Sync + 'static>(ttl: Option<Duration>) -> Cache<(), V> {
    let mut builder = Cache::builder().max_capacity(1);
    if let Some(ttl) = ttl {
        builder = builder.time_to_live(ttl);
    }
    builder.build()
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

impl OidcClient {
    /// Creates a new `OidcClient`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(config: ClientConfig) -> Result<Self, FeideOidcError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| FeideOidcError::InvalidConfiguration(format!("HTTP client: {e}")))?;
        let inner = Arc::new(Inner {
            discovery: slot(config.cache_ttl),
            jwks: slot(config.cache_ttl),
            config,
            http_client,
        });
        Ok(Self { inner })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Drops the cached discovery document and JWKS; the next call fetches them again.
    pub fn refresh(&self) {
        self.inner.discovery.invalidate_all();
        self.inner.jwks.invalidate_all();
        debug!("Discovery and JWKS cache cleared");
    }

    /// Fetches (once) and returns the provider's discovery document.
    pub async fn discover_configuration(&self) -> Result<Arc<DiscoveryDocument>, FeideOidcError> {
        if let Some(doc) = self.inner.discovery.get(&()).await {
            debug!("Discovery cache hit");
            return Ok(doc);
        }
        self.inner
            .discovery
            .try_get_with((), self.fetch_discovery())
            .await
            .map_err(|e| e.as_ref().clone())
    }

    /// Fetches (once) and returns the provider's JWKS.
    pub async fn fetch_jwks(&self) -> Result<Arc<Jwks>, FeideOidcError> {
        if let Some(jwks) = self.inner.jwks.get(&()).await {
            debug!("JWKS cache hit");
            return Ok(jwks);
        }
        self.inner
            .jwks
            .try_get_with((), self.fetch_jwks_uncached())
            .await
            .map_err(|e| e.as_ref().clone())
    }

    #[instrument(skip(self), fields(issuer = %self.inner.config.issuer), err)]
    async fn fetch_discovery(&self) -> Result<Arc<DiscoveryDocument>, FeideOidcError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            self.inner.config.issuer.trim_end_matches('/')
        );
        debug!("Performing OIDC discovery at: {}", url);
        let response = self.send(self.inner.http_client.get(&url), "discovery").await?;
        let body = Self::read_json(response, "discovery").await?;
        let doc = require_object(body, "Discovery response is not a JSON object")
            .and_then(|data| DiscoveryDocument::from_json(&data))
            .map_err(|e| FeideOidcError::protocol(format!("discovery document rejected: {e}"), Some(200)))?;
        Ok(Arc::new(doc))
    }

    #[instrument(skip(self), err)]
    async fn fetch_jwks_uncached(&self) -> Result<Arc<Jwks>, FeideOidcError> {
        let jwks_uri = self.discover_configuration().await?.jwks_uri.clone();
        let response = self.send(self.inner.http_client.get(&jwks_uri), "JWKS").await?;
        let body = Self::read_json(response, "JWKS").await?;
        let jwks = require_object(body, "JWKS response is not a JSON object")
            .and_then(|data| Jwks::from_json(&data))
            .map_err(|e| FeideOidcError::protocol(format!("JWKS rejected: {e}"), Some(200)))?;
        info!("Fetched {} keys from {}", jwks.len(), jwks_uri);
        Ok(Arc::new(jwks))
    }

    /// Builds the URL the browser is redirected to in order to log in.
    pub async fn authorization_url(
        &self,
        request: &AuthorizationRequest<'_>,
    ) -> Result<String, FeideOidcError> {
        let doc = self.discover_configuration().await?;
        let config = &self.inner.config;
        let url = Url::parse_with_params(
            &doc.authorization_endpoint,
            &[
                ("response_type", "code"),
                ("client_id", config.client_id.as_str()),
                ("redirect_uri", config.redirect_uri.as_str()),
                ("scope", request.scope),
                ("state", request.state),
                ("nonce", request.nonce),
                ("code_challenge", request.code_challenge),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| {
            FeideOidcError::protocol(format!("invalid authorization endpoint: {e}"), None)
        })?;
        Ok(url.into())
    }

    /// Exchanges an authorization code (plus its PKCE verifier) for tokens.
    #[instrument(skip(self, code, code_verifier), err)]
    pub async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, FeideOidcError> {
        let doc = self.discover_configuration().await?;
        let config = &self.inner.config;
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        let request = self
            .inner
            .http_client
            .post(&doc.token_endpoint)
            .basic_auth(&config.client_id, Some(&config.client_secret))
            .form(&form);
        let response = self.send(request, "token").await?;
        let body = Self::read_json(response, "token").await?;
        let data = require_object(body, "Token response is not a JSON object")?;
        TokenResponse::from_json(&data)
    }

    /// The standard OIDC userinfo endpoint from discovery.
    #[instrument(skip(self, access_token), err)]
    pub async fn userinfo(&self, access_token: &str) -> Result<Map<String, Value>, FeideOidcError> {
        let url = self.discover_configuration().await?.userinfo_endpoint.clone();
        let body = self.get_with_bearer(&url, access_token).await?;
        require_object(body, "userinfo response is not a JSON object")
    }

    /// Feide's extended userinfo (directory attributes).
    #[instrument(skip(self, access_token), err)]
    pub async fn extended_userinfo(
        &self,
        access_token: &str,
        url: &str,
    ) -> Result<Map<String, Value>, FeideOidcError> {
        let body = self.get_with_bearer(url, access_token).await?;
        require_object(body, "extended userinfo response is not a JSON object")
    }

    /// Performs an RFC 8693 token exchange at the token endpoint.
    ///
    /// Error context names the audience, scope and token types, never the subject token.
    #[instrument(
        skip(self, request),
        fields(audience = %request.audience, scope = %request.scope),
        err
    )]
    pub async fn token_exchange(
        &self,
        request: &TokenExchangeRequest<'_>,
    ) -> Result<TokenExchangeResponse, FeideOidcError> {
        let doc = self.discover_configuration().await?;
        let config = &self.inner.config;
        let mut form = vec![
            ("grant_type", TOKEN_EXCHANGE_GRANT_TYPE),
            ("subject_token_type", request.subject_token_type),
            ("subject_token", request.subject_token),
            ("audience", request.audience),
            ("scope", request.scope),
        ];
        if let Some(requested) = request.requested_token_type {
            form.push(("requested_token_type", requested));
        }
        let params = format!(
            "audience={} scope={} subject_token_type={} requested_token_type={}",
            request.audience,
            request.scope,
            request.subject_token_type,
            request.requested_token_type.unwrap_or("-"),
        );

        let http_request = self
            .inner
            .http_client
            .post(&doc.token_endpoint)
            .basic_auth(&config.client_id, Some(&config.client_secret))
            .form(&form);
        let result = async {
            let response = self.send(http_request, "token exchange").await?;
            let body = Self::read_json(response, "token exchange").await?;
            let data = require_object(body, "Token exchange response is not a JSON object")?;
            TokenExchangeResponse::from_json(&data)
        }
        .await;

        result.map_err(|e| match e {
            FeideOidcError::Protocol { context, status } => FeideOidcError::Protocol {
                context: format!("{context}; params: {params}"),
                status,
            },
            other => other,
        })
    }

    /// GETs `url` with bearer authentication and returns the decoded JSON body.
    ///
    /// Callers apply the shape guard they expect (object or array).
    pub async fn get_with_bearer(&self, url: &str, token: &str) -> Result<Value, FeideOidcError> {
        let response = self
            .send(self.inner.http_client.get(url).bearer_auth(token), url)
            .await?;
        Self::read_json(response, url).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, FeideOidcError> {
        request.send().await.map_err(|e| {
            let reason = if e.is_timeout() { "timed out" } else { "failed" };
            error!("{} request {}: {}", what, reason, e);
            FeideOidcError::protocol(format!("{what} request {reason}: {e}"), None)
        })
    }

    async fn read_json(response: reqwest::Response, what: &str) -> Result<Value, FeideOidcError> {
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!("{} call failed with status {}", what, status);
            return Err(FeideOidcError::protocol(
                format!("{what} call failed ({}): {}", status.as_u16(), truncate(&body)),
                Some(status.as_u16()),
            ));
        }
        response.json::<Value>().await.map_err(|e| {
            FeideOidcError::protocol(
                format!("{what} response is not valid JSON: {e}"),
                Some(status.as_u16()),
            )
        })
    }
}
