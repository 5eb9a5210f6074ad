//! Session storage seam used by the login flow.
//!
//! The flow never touches cookies or a global session; it is handed a
//! [`SessionStore`] for the current browser session.

use async_trait::async_trait;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

use crate::pkce::random_token;

pub const PKCE_VERIFIER: &str = "pkce_verifier";
pub const STATE: &str = "state";
pub const NONCE: &str = "nonce";
pub const USER: &str = "user";
pub const ID_TOKEN_HINT: &str = "id_token_hint";

/// Key/value storage scoped to one browser session.
///
/// Reads and writes within one request are issued sequentially; no stronger
/// guarantee is assumed.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value);
    /// Removes `key`, returning what was stored.
    async fn remove(&self, key: &str) -> Option<Value>;
    async fn clear(&self);
}

/// Reads `key` as a non-empty string.
pub async fn get_string(store: &dyn SessionStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Reads `key` and deserializes it; a value of the wrong shape counts as absent.
pub async fn get_typed<T: DeserializeOwned>(store: &dyn SessionStore, key: &str) -> Option<T> {
    let value = store.get(key).await?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, error = %e, "Ignoring malformed session value");
            None
        }
    }
}

pub async fn set_typed<T: Serialize>(store: &dyn SessionStore, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(v) => store.set(key, v).await,
        Err(e) => warn!(key, error = %e, "Session value could not be serialized"),
    }
}

type SessionData = Arc<Mutex<HashMap<String, Value>>>;

/// In-memory sessions for a single instance, keyed by an unguessable id.
///
/// Sessions idle for longer than the TTL are evicted.
#[derive(Clone)]
pub struct MemorySessions {
    sessions: Cache<String, SessionData>,
}

impl MemorySessions {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(100_000)
                .time_to_idle(idle_ttl)
                .build(),
        }
    }

    /// A fresh session id.
    pub fn new_id() -> String {
        random_token()
    }

    /// Opens the session `id`, creating it empty if it does not exist yet.
    pub async fn open(&self, id: &str) -> MemorySession {
        let data = self
            .sessions
            .get_with(id.to_string(), async { SessionData::default() })
            .await;
        MemorySession { data }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub async fn invalidate(&self, id: &str) {
        self.sessions.invalidate(id).await;
    }

    /// Moves the contents of session `id` under a fresh id and drops `id`.
    ///
    /// Handles to the old session keep working but are no longer reachable
    /// through the old id.
    pub async fn rotate(&self, id: &str) -> (String, MemorySession) {
        let new_id = Self::new_id();
        let contents = match self.sessions.get(id).await {
            Some(data) => data.lock().await.clone(),
            None => HashMap::new(),
        };
        let data: SessionData = Arc::new(Mutex::new(contents));
        self.sessions.insert(new_id.clone(), data.clone()).await;
        self.invalidate(id).await;
        (new_id, MemorySession { data })
    }
}

/// One session from [`MemorySessions`].
#[derive(Clone)]
pub struct MemorySession {
    data: SessionData,
}

#[async_trait]
impl SessionStore for MemorySession {
    async fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value) {
        self.data.lock().await.insert(key.to_string(), value);
    }

    async fn remove(&self, key: &str) -> Option<Value> {
        self.data.lock().await.remove(key)
    }

    async fn clear(&self) {
        self.data.lock().await.clear();
    }
}
