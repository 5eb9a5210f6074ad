//! The relying-party side of the login: authorization request, callback,
//! token exchange and logout, each step reading and writing one browser
//! session through [`SessionStore`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use url::Url;

use crate::client::{AuthorizationRequest, OidcClient, TokenExchangeRequest};
use crate::config::LoginSettings;
use crate::error::{AntiForgeryReason, FeideOidcError};
use crate::model::TokenExchangeResponse;
use crate::pkce::{self, random_token};
use crate::session::{
    get_string, get_typed, set_typed, SessionStore, ID_TOKEN_HINT, NONCE, PKCE_VERIFIER, STATE,
    USER,
};
use crate::validator::validate_id_token;

/// What the session remembers about a logged-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub sub: String,
    pub id_token_claims: Map<String, Value>,
    pub userinfo: Map<String, Value>,
    /// `None` when the extended userinfo call failed during login.
    pub extended_userinfo: Option<Map<String, Value>>,
    pub access_token: String,
    pub access_token_expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchanged: Option<TokenExchangeResponse>,
}

/// The values stored by [`LoginFlow::start`], taken back out on the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingLogin {
    pub state: Option<String>,
    pub verifier: Option<String>,
    pub nonce: Option<String>,
}

impl PendingLogin {
    /// Removes the pending values from the session, whatever happens next.
    pub async fn take(session: &dyn SessionStore) -> Self {
        let state = non_empty(session.remove(STATE).await);
        let verifier = non_empty(session.remove(PKCE_VERIFIER).await);
        let nonce = non_empty(session.remove(NONCE).await);
        Self {
            state,
            verifier,
            nonce,
        }
    }

    /// Checks a callback against this login attempt and yields
    /// `(code, verifier, nonce)` when it belongs to it.
    pub fn check<'a>(
        &'a self,
        returned_state: Option<&str>,
        code: Option<&'a str>,
    ) -> Result<(&'a str, &'a str, &'a str), AntiForgeryReason> {
        let returned_state = returned_state.filter(|s| !s.is_empty());
        match (self.state.as_deref(), returned_state) {
            (Some(stored), Some(returned)) if stored == returned => {}
            _ => return Err(AntiForgeryReason::StateMismatch),
        }
        let code = code
            .filter(|c| !c.is_empty())
            .ok_or(AntiForgeryReason::MissingCode)?;
        let verifier = self
            .verifier
            .as_deref()
            .ok_or(AntiForgeryReason::MissingVerifier)?;
        let nonce = self
            .nonce
            .as_deref()
            .ok_or(AntiForgeryReason::MissingNonce)?;
        Ok((code, verifier, nonce))
    }
}

fn non_empty(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Where the browser goes after `/logout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// RP-initiated logout at the provider.
    Redirect(String),
    /// The provider has no end-session endpoint; only the local session was cleared.
    Local,
}

/// Drives the authorization code flow for the login app.
#[derive(Clone)]
pub struct LoginFlow {
    client: OidcClient,
    scope: String,
    extended_userinfo_url: String,
    token_exchange_audience: Option<String>,
    token_exchange_scope: String,
    post_logout_redirect_uri: String,
    datasource_api_url: Option<String>,
}

impl LoginFlow {
    pub fn new(client: OidcClient, settings: &LoginSettings) -> Result<Self, FeideOidcError> {
        Ok(Self {
            client,
            scope: settings.scope.clone(),
            extended_userinfo_url: settings.extended_userinfo_url.clone(),
            token_exchange_audience: settings
                .token_exchange_audience
                .clone()
                .filter(|a| !a.is_empty()),
            token_exchange_scope: settings.token_exchange_scope.clone().unwrap_or_default(),
            post_logout_redirect_uri: settings.post_logout_redirect()?,
            datasource_api_url: settings.datasource_api_url.clone().filter(|u| !u.is_empty()),
        })
    }

    pub fn client(&self) -> &OidcClient {
        &self.client
    }

    /// Starts a login attempt and returns the provider URL to redirect to.
    ///
    /// A fresh state, nonce and PKCE verifier replace any earlier attempt in
    /// this session.
    #[instrument(skip_all, err)]
    pub async fn start(&self, session: &dyn SessionStore) -> Result<String, FeideOidcError> {
        let pkce = pkce::generate();
        let state = random_token();
        let nonce = random_token();

        session.set(PKCE_VERIFIER, Value::String(pkce.verifier)).await;
        session.set(STATE, Value::String(state.clone())).await;
        session.set(NONCE, Value::String(nonce.clone())).await;

        self.client
            .authorization_url(&AuthorizationRequest {
                scope: &self.scope,
                state: &state,
                nonce: &nonce,
                code_challenge: &pkce.challenge,
            })
            .await
    }

    /// Handles the provider's redirect back to the app.
    ///
    /// The pending values are consumed before anything is checked, so a
    /// callback can never be replayed. No request reaches the provider unless
    /// every anti-forgery check passes.
    #[instrument(skip_all, err)]
    pub async fn complete(
        &self,
        session: &dyn SessionStore,
        returned_state: Option<&str>,
        code: Option<&str>,
    ) -> Result<UserSession, FeideOidcError> {
        let pending = PendingLogin::take(session).await;
        let (code, verifier, nonce) = pending.check(returned_state, code).map_err(|reason| {
            warn!(%reason, "Callback rejected: possible forgery or expired login");
            FeideOidcError::AntiForgery(reason)
        })?;

        let tokens = self.client.exchange_code_for_tokens(code, verifier).await?;
        let id_token = tokens
            .id_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FeideOidcError::protocol("token response has no id_token", Some(200)))?;

        let config = self.client.config();
        let jwks = self.client.fetch_jwks().await?;
        let claims = validate_id_token(
            &id_token,
            &jwks,
            &config.issuer,
            &config.client_id,
            nonce,
            &config.validation,
        )?;

        let userinfo = self.client.userinfo(&tokens.access_token).await?;
        let extended_userinfo = match self
            .client
            .extended_userinfo(&tokens.access_token, &self.extended_userinfo_url)
            .await
        {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(error = %e, "Extended userinfo unavailable; continuing without it");
                None
            }
        };

        let user = UserSession {
            sub: claims.sub(),
            id_token_claims: claims.into_raw(),
            userinfo,
            extended_userinfo,
            access_token: tokens.access_token,
            access_token_expires_in: tokens.expires_in,
            exchanged: None,
        };
        set_typed(session, USER, &user).await;
        session.set(ID_TOKEN_HINT, Value::String(id_token)).await;

        info!(sub = %user.sub, "Login completed");
        Ok(user)
    }

    /// The logged-in user, if any.
    pub async fn current_user(&self, session: &dyn SessionStore) -> Option<UserSession> {
        get_typed(session, USER).await
    }

    /// Exchanges the user's access token for one addressed to the data source.
    #[instrument(skip_all, err)]
    pub async fn exchange(
        &self,
        session: &dyn SessionStore,
    ) -> Result<TokenExchangeResponse, FeideOidcError> {
        let mut user = self
            .current_user(session)
            .await
            .ok_or(FeideOidcError::NotAuthenticated)?;
        if user.access_token.is_empty() {
            return Err(FeideOidcError::Precondition(
                "Missing access token".to_string(),
            ));
        }
        let audience = self.token_exchange_audience.as_deref().ok_or_else(|| {
            FeideOidcError::NotConfigured("token_exchange_audience".to_string())
        })?;

        let exchanged = self
            .client
            .token_exchange(&TokenExchangeRequest::for_access_token(
                &user.access_token,
                audience,
                &self.token_exchange_scope,
            ))
            .await?;

        user.exchanged = Some(exchanged.clone());
        set_typed(session, USER, &user).await;
        info!(sub = %user.sub, audience, "Token exchanged");
        Ok(exchanged)
    }

    /// Calls the data source's `/me` with the exchanged token and returns its body.
    #[instrument(skip_all, err)]
    pub async fn call_datasource(&self, session: &dyn SessionStore) -> Result<Value, FeideOidcError> {
        let user = self
            .current_user(session)
            .await
            .ok_or(FeideOidcError::NotAuthenticated)?;
        let token = user
            .exchanged
            .as_ref()
            .map(|t| t.access_token.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                FeideOidcError::Precondition(
                    "Missing exchanged token. Call /exchange first.".to_string(),
                )
            })?;
        let base = self.datasource_api_url.as_deref().ok_or_else(|| {
            FeideOidcError::InvalidConfiguration("datasource_api_url is not set".to_string())
        })?;
        let url = format!("{}/me", base.trim_end_matches('/'));
        self.client.get_with_bearer(&url, token).await
    }

    /// Clears the session and works out where the browser should go next.
    ///
    /// Discovery runs first; if it fails the session is left as it was.
    #[instrument(skip_all, err)]
    pub async fn logout(&self, session: &dyn SessionStore) -> Result<LogoutOutcome, FeideOidcError> {
        let doc = self.client.discover_configuration().await?;
        let id_token_hint = get_string(session, ID_TOKEN_HINT).await;
        session.clear().await;

        let Some(endpoint) = doc.end_session_endpoint.as_deref().filter(|e| !e.is_empty()) else {
            info!("Provider has no end_session_endpoint; local logout only");
            return Ok(LogoutOutcome::Local);
        };

        let mut params = vec![("post_logout_redirect_uri", self.post_logout_redirect_uri.as_str())];
        if let Some(hint) = id_token_hint.as_deref() {
            params.push(("id_token_hint", hint));
        }
        let url = Url::parse_with_params(endpoint, &params).map_err(|e| {
            FeideOidcError::protocol(format!("invalid end_session_endpoint: {e}"), None)
        })?;
        Ok(LogoutOutcome::Redirect(url.into()))
    }

    /// Landing page after provider logout; makes sure nothing survives locally.
    pub async fn post_logout(&self, session: &dyn SessionStore) {
        session.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessions;
    use serde_json::json;
    use std::time::Duration;

    fn pending() -> PendingLogin {
        PendingLogin {
            state: Some("s1".into()),
            verifier: Some("v1".into()),
            nonce: Some("n1".into()),
        }
    }

    #[test]
    fn check_accepts_matching_callback() {
        let p = pending();
        assert_eq!(p.check(Some("s1"), Some("c")), Ok(("c", "v1", "n1")));
    }

    #[test]
    fn check_reports_first_failing_condition() {
        let p = pending();
        assert_eq!(
            p.check(Some("other"), Some("c")),
            Err(AntiForgeryReason::StateMismatch)
        );
        assert_eq!(p.check(None, Some("c")), Err(AntiForgeryReason::StateMismatch));
        assert_eq!(p.check(Some("s1"), None), Err(AntiForgeryReason::MissingCode));
        assert_eq!(p.check(Some("s1"), Some("")), Err(AntiForgeryReason::MissingCode));

        let no_verifier = PendingLogin {
            verifier: None,
            ..pending()
        };
        assert_eq!(
            no_verifier.check(Some("s1"), Some("c")),
            Err(AntiForgeryReason::MissingVerifier)
        );

        let no_nonce = PendingLogin {
            nonce: None,
            ..pending()
        };
        assert_eq!(
            no_nonce.check(Some("s1"), Some("c")),
            Err(AntiForgeryReason::MissingNonce)
        );
    }

    #[test]
    fn check_fails_closed_without_stored_state() {
        let p = PendingLogin::default();
        assert_eq!(p.check(None, Some("c")), Err(AntiForgeryReason::StateMismatch));
    }

    #[tokio::test]
    async fn take_empties_the_session() {
        let sessions = MemorySessions::new(Duration::from_secs(60));
        let s = sessions.open("x").await;
        s.set(STATE, json!("s1")).await;
        s.set(PKCE_VERIFIER, json!("v1")).await;
        s.set(NONCE, json!("")).await;

        let p = PendingLogin::take(&s).await;
        assert_eq!(p.state.as_deref(), Some("s1"));
        assert_eq!(p.nonce, None);
        assert!(s.get(STATE).await.is_none());
        assert!(s.get(PKCE_VERIFIER).await.is_none());
        assert!(s.get(NONCE).await.is_none());
    }

    #[test]
    fn user_session_round_trips_through_json() {
        let user = UserSession {
            sub: "u1".into(),
            id_token_claims: Map::new(),
            userinfo: Map::new(),
            extended_userinfo: None,
            access_token: "at".into(),
            access_token_expires_in: 3600,
            exchanged: None,
        };
        let value = serde_json::to_value(&user).unwrap();
        assert!(value.get("exchanged").is_none());
        let back: UserSession = serde_json::from_value(value).unwrap();
        assert_eq!(back, user);
    }
}
