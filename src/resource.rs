//! The data-source API behind `/me`.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::client::{OidcClient, TokenExchangeRequest, ACCESS_TOKEN_TYPE, JWT_TOKEN_TYPE};
use crate::config::ResourceServerSettings;
use crate::error::FeideOidcError;
use crate::guard::{authorize, extract_bearer};
use crate::json::require_array;

/// Body of a successful `/me` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeResponse {
    pub subject: String,
    pub extended_userinfo: Map<String, Value>,
    pub groupinfo: Vec<Value>,
}

/// Authorizes callers and fetches their profile on their behalf.
#[derive(Clone)]
pub struct DataSource {
    client: OidcClient,
    audience: String,
    required_scope: String,
    exchange_audience: String,
    exchange_scope: String,
    extended_userinfo_url: String,
    groupinfo_url: String,
}

impl DataSource {
    pub fn new(client: OidcClient, settings: &ResourceServerSettings) -> Self {
        Self {
            client,
            audience: settings.datasource_audience.clone(),
            required_scope: settings.required_scope.clone(),
            exchange_audience: settings.token_exchange_audience.clone(),
            exchange_scope: settings.token_exchange_scope.clone(),
            extended_userinfo_url: settings.extended_userinfo_url.clone(),
            groupinfo_url: settings.groupinfo_url.clone(),
        }
    }

    pub fn client(&self) -> &OidcClient {
        &self.client
    }

    /// Serves one `/me` request given its raw `Authorization` header.
    ///
    /// The incoming token is exchanged for one the Feide APIs accept; the
    /// caller's token is never forwarded. Extended userinfo is required here,
    /// unlike at login.
    #[instrument(skip_all, err)]
    pub async fn me(&self, authorization: Option<&str>) -> Result<MeResponse, FeideOidcError> {
        // Requests without a token are turned away before any provider traffic.
        let subject_token = extract_bearer(authorization)?;
        let jwks = self.client.fetch_jwks().await?;
        let config = self.client.config();
        let claims = authorize(
            authorization,
            &jwks,
            &config.issuer,
            &self.audience,
            &self.required_scope,
            &config.validation,
        )?;

        let exchanged = self
            .client
            .token_exchange(&TokenExchangeRequest {
                subject_token,
                audience: &self.exchange_audience,
                scope: &self.exchange_scope,
                subject_token_type: JWT_TOKEN_TYPE,
                requested_token_type: Some(ACCESS_TOKEN_TYPE),
            })
            .await?;

        let extended_userinfo = self
            .client
            .extended_userinfo(&exchanged.access_token, &self.extended_userinfo_url)
            .await?;
        let groups = self
            .client
            .get_with_bearer(&self.groupinfo_url, &exchanged.access_token)
            .await?;
        let groupinfo = require_array(groups, "groupinfo response is not a JSON array")?;

        let subject = claims.sub();
        info!(sub = %subject, groups = groupinfo.len(), "Served /me");
        Ok(MeResponse {
            subject,
            extended_userinfo,
            groupinfo,
        })
    }
}
