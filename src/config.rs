// src/config.rs

use crate::error::FeideOidcError;
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ISSUER: &str = "https://auth.dataporten.no";
pub const DEFAULT_EXTENDED_USERINFO_URL: &str = "https://api.dataporten.no/userinfo/v1/userinfo";
pub const DEFAULT_GROUPINFO_URL: &str = "https://groups-api.dataporten.no/groups/me/groups";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Contains the validation settings applied to every JWT.
#[derive(Debug, Clone)]
pub struct ValidationDetails {
    /// The signing algorithms that are permitted. The algorithm named in a
    /// token's header must appear here or the token is rejected.
    pub algorithms: Vec<Algorithm>,
    /// The tolerance for clock skew when validating `exp` and `nbf`.
    /// Defaults to 60 seconds.
    pub leeway: Duration,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            // Feide signs with RS256.
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::from_secs(60),
        }
    }
}

/// Configuration for an [`OidcClient`](crate::client::OidcClient).
///
/// This record is immutable once built; the discovery/JWKS cache lives in
/// the client, not here. Construct it with [`ConfigBuilder`].
#[derive(Clone)]
pub struct ClientConfig {
    /// The issuer identifier. Used for discovery and compared exactly with the `iss` claim.
    pub issuer: String,
    /// The client ID registered with the provider; the audience of ID tokens.
    pub client_id: String,
    pub client_secret: String,
    /// Where the provider sends the browser back after login.
    pub redirect_uri: String,
    /// Upper bound for every outbound request.
    pub http_timeout: Duration,
    pub validation: ValidationDetails,
    /// Optional lifetime for the cached discovery document and JWKS.
    /// `None` keeps them for the lifetime of the client.
    pub cache_ttl: Option<Duration>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("http_timeout", &self.http_timeout)
            .field("validation", &self.validation)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

/// A builder for creating a `ClientConfig` instance.
#[derive(Default)]
pub struct ConfigBuilder {
    issuer: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    http_timeout: Option<Duration>,
    cache_ttl: Option<Duration>,
    validation: ValidationDetails,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the issuer, e.g. "https://auth.dataporten.no". This is a required field.
    ///
    /// The string is kept verbatim (not normalised) because it must equal the `iss` claim.
    pub fn issuer(mut self, issuer: &str) -> Result<Self, FeideOidcError> {
        Url::parse(issuer).map_err(|e| FeideOidcError::InvalidUrl(e.to_string()))?;
        self.issuer = Some(issuer.to_string());
        Ok(self)
    }

    /// Sets the client ID. This is a required field.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the client secret used for HTTP Basic authentication. This is a required field.
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Sets the redirect URI. Required for the login flow; a resource server
    /// that only performs token exchange can leave it unset.
    pub fn redirect_uri(mut self, url: &str) -> Result<Self, FeideOidcError> {
        Url::parse(url).map_err(|e| FeideOidcError::InvalidUrl(e.to_string()))?;
        self.redirect_uri = Some(url.to_string());
        Ok(self)
    }

    /// Sets the outbound request timeout. Defaults to 5 seconds.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Expires the cached discovery document and JWKS after `ttl`.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the allowed signing algorithms.
    /// Defaults to `[Algorithm::RS256]` if not set.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.validation.algorithms = algorithms;
        self
    }

    /// Sets the clock skew tolerance. Defaults to 60 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    /// Consumes the builder and returns a `ClientConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if `issuer`, `client_id` or `client_secret` is missing,
    /// or if the algorithm allow-list is empty.
    pub fn build(self) -> Result<ClientConfig, FeideOidcError> {
        let issuer = self
            .issuer
            .ok_or_else(|| FeideOidcError::MissingConfiguration("issuer".to_string()))?;
        let client_id = self
            .client_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FeideOidcError::MissingConfiguration("client_id".to_string()))?;
        let client_secret = self
            .client_secret
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FeideOidcError::MissingConfiguration("client_secret".to_string()))?;
        if self.validation.algorithms.is_empty() {
            return Err(FeideOidcError::InvalidConfiguration(
                "at least one signing algorithm must be allowed".to_string(),
            ));
        }

        Ok(ClientConfig {
            issuer,
            client_id,
            client_secret,
            redirect_uri: self.redirect_uri.unwrap_or_default(),
            http_timeout: self.http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT),
            validation: self.validation,
            cache_ttl: self.cache_ttl,
        })
    }
}

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

fn default_extended_userinfo_url() -> String {
    DEFAULT_EXTENDED_USERINFO_URL.to_string()
}

fn default_groupinfo_url() -> String {
    DEFAULT_GROUPINFO_URL.to_string()
}

fn default_http_timeout_secs() -> f64 {
    DEFAULT_HTTP_TIMEOUT.as_secs_f64()
}

fn default_algorithms() -> Vec<Algorithm> {
    ValidationDetails::default().algorithms
}

fn default_leeway_secs() -> u64 {
    60
}

fn default_scope() -> String {
    "openid".to_string()
}

fn default_session_ttl_secs() -> u64 {
    8 * 60 * 60
}

fn default_login_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_resource_listen_addr() -> String {
    "0.0.0.0:8001".to_string()
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, FeideOidcError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        FeideOidcError::InvalidConfiguration(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    serde_yaml::from_str(&raw).map_err(|e| {
        FeideOidcError::InvalidConfiguration(format!(
            "failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

fn fail_on_missing(missing: Vec<&str>) -> Result<(), FeideOidcError> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FeideOidcError::MissingConfiguration(missing.join(", ")))
    }
}

/// Settings for the login application (relying party).
#[derive(Clone, Deserialize)]
pub struct LoginSettings {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_extended_userinfo_url")]
    pub extended_userinfo_url: String,
    pub token_exchange_audience: Option<String>,
    pub token_exchange_scope: Option<String>,
    pub post_logout_redirect_uri: Option<String>,
    pub datasource_api_url: Option<String>,
    #[serde(default = "default_login_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: f64,
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<Algorithm>,
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
    pub cache_ttl_secs: Option<u64>,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Whether the session cookie carries `Secure`. Unset means "only when
    /// `redirect_uri` is https".
    pub secure_cookie: Option<bool>,
}

impl std::fmt::Debug for LoginSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginSettings")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("extended_userinfo_url", &self.extended_userinfo_url)
            .field("token_exchange_audience", &self.token_exchange_audience)
            .field("token_exchange_scope", &self.token_exchange_scope)
            .field("post_logout_redirect_uri", &self.post_logout_redirect_uri)
            .field("datasource_api_url", &self.datasource_api_url)
            .field("listen_addr", &self.listen_addr)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("algorithms", &self.algorithms)
            .field("leeway_secs", &self.leeway_secs)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("secure_cookie", &self.secure_cookie)
            .finish()
    }
}

impl LoginSettings {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, FeideOidcError> {
        let settings: Self = read_yaml(path.as_ref())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reports every missing required value at once.
    pub fn validate(&self) -> Result<(), FeideOidcError> {
        let mut missing = Vec::new();
        if self.client_id.is_empty() {
            missing.push("client_id");
        }
        if self.client_secret.is_empty() {
            missing.push("client_secret");
        }
        if self.redirect_uri.is_empty() {
            missing.push("redirect_uri");
        }
        fail_on_missing(missing)
    }

    pub fn client_config(&self) -> Result<ClientConfig, FeideOidcError> {
        let mut builder = ConfigBuilder::new()
            .issuer(&self.issuer)?
            .client_id(self.client_id.clone())
            .client_secret(self.client_secret.clone())
            .redirect_uri(&self.redirect_uri)?
            .http_timeout(secs(self.http_timeout_secs)?)
            .algorithms(self.algorithms.clone())
            .leeway(Duration::from_secs(self.leeway_secs));
        if let Some(ttl) = self.cache_ttl_secs {
            builder = builder.cache_ttl(Duration::from_secs(ttl));
        }
        builder.build()
    }

    pub fn secure_cookie(&self) -> bool {
        self.secure_cookie
            .unwrap_or_else(|| self.redirect_uri.starts_with("https://"))
    }

    /// Where the provider should send the browser after logout: the configured
    /// value, or `/post-logout` on the redirect URI's origin.
    pub fn post_logout_redirect(&self) -> Result<String, FeideOidcError> {
        if let Some(uri) = self.post_logout_redirect_uri.as_deref().filter(|s| !s.is_empty()) {
            return Ok(uri.to_string());
        }
        let redirect =
            Url::parse(&self.redirect_uri).map_err(|e| FeideOidcError::InvalidUrl(e.to_string()))?;
        redirect
            .join("/post-logout")
            .map(|u| u.to_string())
            .map_err(|e| FeideOidcError::InvalidUrl(e.to_string()))
    }
}

/// Settings for the data-source API (resource server).
#[derive(Clone, Deserialize)]
pub struct ResourceServerSettings {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// The audience incoming access tokens must be addressed to.
    #[serde(default)]
    pub datasource_audience: String,
    #[serde(default)]
    pub required_scope: String,
    #[serde(default)]
    pub token_exchange_audience: String,
    #[serde(default)]
    pub token_exchange_scope: String,
    #[serde(default = "default_extended_userinfo_url")]
    pub extended_userinfo_url: String,
    #[serde(default = "default_groupinfo_url")]
    pub groupinfo_url: String,
    #[serde(default = "default_resource_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: f64,
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<Algorithm>,
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
    pub cache_ttl_secs: Option<u64>,
}

impl std::fmt::Debug for ResourceServerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceServerSettings")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("datasource_audience", &self.datasource_audience)
            .field("required_scope", &self.required_scope)
            .field("token_exchange_audience", &self.token_exchange_audience)
            .field("token_exchange_scope", &self.token_exchange_scope)
            .field("extended_userinfo_url", &self.extended_userinfo_url)
            .field("groupinfo_url", &self.groupinfo_url)
            .field("listen_addr", &self.listen_addr)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("algorithms", &self.algorithms)
            .field("leeway_secs", &self.leeway_secs)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .finish()
    }
}

impl ResourceServerSettings {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, FeideOidcError> {
        let settings: Self = read_yaml(path.as_ref())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), FeideOidcError> {
        let mut missing = Vec::new();
        if self.client_id.is_empty() {
            missing.push("client_id");
        }
        if self.client_secret.is_empty() {
            missing.push("client_secret");
        }
        if self.datasource_audience.is_empty() {
            missing.push("datasource_audience");
        }
        if self.required_scope.is_empty() {
            missing.push("required_scope");
        }
        if self.token_exchange_audience.is_empty() {
            missing.push("token_exchange_audience");
        }
        fail_on_missing(missing)
    }

    /// The resource server only talks to the token endpoint, so no redirect URI is set.
    pub fn client_config(&self) -> Result<ClientConfig, FeideOidcError> {
        let mut builder = ConfigBuilder::new()
            .issuer(&self.issuer)?
            .client_id(self.client_id.clone())
            .client_secret(self.client_secret.clone())
            .http_timeout(secs(self.http_timeout_secs)?)
            .algorithms(self.algorithms.clone())
            .leeway(Duration::from_secs(self.leeway_secs));
        if let Some(ttl) = self.cache_ttl_secs {
            builder = builder.cache_ttl(Duration::from_secs(ttl));
        }
        builder.build()
    }
}

fn secs(value: f64) -> Result<Duration, FeideOidcError> {
    if value.is_finite() && value > 0.0 {
        Ok(Duration::from_secs_f64(value))
    } else {
        Err(FeideOidcError::InvalidConfiguration(format!(
            "http_timeout_secs must be a positive number, got {value}"
        )))
    }
}
