// src/server/login.rs

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{found, ApiError};
use crate::error::FeideOidcError;
use crate::flow::{LoginFlow, LogoutOutcome};
use crate::session::{MemorySession, MemorySessions};

pub const SESSION_COOKIE: &str = "feide_session";

struct LoginState {
    flow: LoginFlow,
    sessions: MemorySessions,
    secure_cookie: bool,
}

/// Routes of the login app.
///
/// With `secure_cookie` set the session cookie is only sent over https.
pub fn router(flow: LoginFlow, sessions: MemorySessions, secure_cookie: bool) -> Router {
    let state = Arc::new(LoginState {
        flow,
        sessions,
        secure_cookie,
    });
    Router::new()
        .route("/", get(index))
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/exchange", get(exchange))
        .route("/logout", get(logout))
        .route("/post-logout", get(post_logout))
        .route("/datasource", get(datasource))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    state: Option<String>,
    code: Option<String>,
}

/// The caller's session plus the cookie to send if its id changed.
struct BrowserSession {
    id: String,
    session: MemorySession,
    set_cookie: Option<String>,
}

impl BrowserSession {
    async fn resolve(state: &LoginState, headers: &HeaderMap) -> Self {
        // Unknown ids (expired, or made up by the client) are never adopted.
        if let Some(id) = session_cookie(headers).filter(|id| state.sessions.contains(id)) {
            return Self {
                session: state.sessions.open(&id).await,
                id,
                set_cookie: None,
            };
        }
        let id = MemorySessions::new_id();
        Self {
            session: state.sessions.open(&id).await,
            set_cookie: Some(cookie_header(&id, state.secure_cookie)),
            id,
        }
    }

    /// Moves the session to a fresh id; the old id stops resolving.
    async fn rotate(&mut self, state: &LoginState) {
        let (id, session) = state.sessions.rotate(&self.id).await;
        self.set_cookie = Some(cookie_header(&id, state.secure_cookie));
        self.session = session;
        self.id = id;
    }

    fn respond(&self, response: impl IntoResponse) -> Response {
        let mut response = response.into_response();
        if let Some(cookie) = &self.set_cookie {
            if let Ok(value) = HeaderValue::from_str(cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

fn cookie_header(id: &str, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

// Discovery problems on /login and /logout are reported as the app's own failure.
fn provider_setup_error(error: FeideOidcError) -> ApiError {
    match error {
        e @ FeideOidcError::Protocol { .. } => {
            ApiError::with_status(e, StatusCode::INTERNAL_SERVER_ERROR)
        }
        other => other.into(),
    }
}

async fn index(State(state): State<Arc<LoginState>>, headers: HeaderMap) -> Response {
    let browser = BrowserSession::resolve(&state, &headers).await;
    let user = state.flow.current_user(&browser.session).await;
    browser.respond(Json(json!({
        "logged_in": user.is_some(),
        "sub": user.as_ref().map(|u| u.sub.as_str()),
        "has_exchanged_token": user.as_ref().is_some_and(|u| u.exchanged.is_some()),
    })))
}

async fn login(State(state): State<Arc<LoginState>>, headers: HeaderMap) -> Response {
    let browser = BrowserSession::resolve(&state, &headers).await;
    match state.flow.start(&browser.session).await {
        Ok(url) => browser.respond(found(&url)),
        Err(e) => browser.respond(provider_setup_error(e)),
    }
}

async fn callback(
    State(state): State<Arc<LoginState>>,
    headers: HeaderMap,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Response {
    // A query that does not parse still consumes the pending login.
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            debug!(error = %rejection, "Unparsable callback query");
            CallbackParams::default()
        }
    };
    let mut browser = BrowserSession::resolve(&state, &headers).await;
    let result = state
        .flow
        .complete(
            &browser.session,
            params.state.as_deref(),
            params.code.as_deref(),
        )
        .await;
    match result {
        Ok(user) => {
            // The pre-login id may have been planted; it must not become the login.
            browser.rotate(&state).await;
            browser.respond(Json(json!({
                "logged_in": true,
                "sub": user.sub,
                "id_token_claims": user.id_token_claims,
                "userinfo": user.userinfo,
                "extended_userinfo": user.extended_userinfo,
            })))
        }
        // A token the provider just handed us failing validation is an upstream fault.
        Err(e @ FeideOidcError::Validation(_)) => {
            browser.respond(ApiError::with_status(e, StatusCode::BAD_GATEWAY))
        }
        Err(e) => browser.respond(ApiError::from(e)),
    }
}

async fn exchange(State(state): State<Arc<LoginState>>, headers: HeaderMap) -> Response {
    let browser = BrowserSession::resolve(&state, &headers).await;
    match state.flow.exchange(&browser.session).await {
        Ok(token) => browser.respond(Json(token)),
        Err(e) => browser.respond(ApiError::from(e)),
    }
}

async fn logout(State(state): State<Arc<LoginState>>, headers: HeaderMap) -> Response {
    let browser = BrowserSession::resolve(&state, &headers).await;
    match state.flow.logout(&browser.session).await {
        Ok(LogoutOutcome::Redirect(url)) => browser.respond(found(&url)),
        Ok(LogoutOutcome::Local) => browser.respond(Json(json!({"logged_out": true}))),
        Err(e) => browser.respond(provider_setup_error(e)),
    }
}

async fn post_logout(State(state): State<Arc<LoginState>>, headers: HeaderMap) -> Response {
    let browser = BrowserSession::resolve(&state, &headers).await;
    state.flow.post_logout(&browser.session).await;
    browser.respond(Json(json!({"logged_out": true})))
}

async fn datasource(State(state): State<Arc<LoginState>>, headers: HeaderMap) -> Response {
    let browser = BrowserSession::resolve(&state, &headers).await;
    match state.flow.call_datasource(&browser.session).await {
        Ok(body) => browser.respond(Json(body)),
        Err(e) => browser.respond(ApiError::from(e)),
    }
}
