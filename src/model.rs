// src/model.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FeideOidcError;
use crate::json::require_array;

fn require_str(data: &Map<String, Value>, key: &str) -> Result<String, FeideOidcError> {
    match data.get(key) {
        None | Some(Value::Null) => Err(FeideOidcError::Decode(format!(
            "Missing required key: {key}"
        ))),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(FeideOidcError::Decode(format!(
            "Invalid str for {key}: {}",
            type_name(other)
        ))),
    }
}

fn optional_str(data: &Map<String, Value>, key: &str) -> Result<Option<String>, FeideOidcError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(FeideOidcError::Decode(format!(
            "Invalid str for {key}: {}",
            type_name(other)
        ))),
    }
}

// Booleans are rejected outright; floats too, only whole numbers are valid.
fn int_or(data: &Map<String, Value>, key: &str, default: i64) -> Result<i64, FeideOidcError> {
    let invalid = |what: &str| FeideOidcError::Decode(format!("Invalid int for {key}: {what}"));
    match data.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(_)) => Err(invalid("bool")),
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| invalid("number")),
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| invalid("str")),
        Some(other) => Err(invalid(type_name(other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The subset of the provider's `.well-known/openid-configuration` this crate relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryDocument {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub userinfo_endpoint: String,
    pub end_session_endpoint: Option<String>,
}

impl DiscoveryDocument {
    pub fn from_json(data: &Map<String, Value>) -> Result<Self, FeideOidcError> {
        Ok(Self {
            authorization_endpoint: require_str(data, "authorization_endpoint")?,
            token_endpoint: require_str(data, "token_endpoint")?,
            jwks_uri: require_str(data, "jwks_uri")?,
            userinfo_endpoint: require_str(data, "userinfo_endpoint")?,
            end_session_endpoint: optional_str(data, "end_session_endpoint")?,
        })
    }
}

/// A JSON Web Key Set as published at the provider's `jwks_uri`.
///
/// Keys are kept as raw JSON objects; they are only interpreted once one is
/// selected by `kid`, so an exotic key elsewhere in the set cannot break
/// validation of tokens signed with a supported one.
#[derive(Debug, Clone, PartialEq)]
pub struct Jwks {
    keys: Vec<Value>,
}

impl Jwks {
    pub fn from_json(data: &Map<String, Value>) -> Result<Self, FeideOidcError> {
        let keys = data
            .get("keys")
            .cloned()
            .ok_or_else(|| FeideOidcError::Decode("JWKS response missing 'keys'".to_string()))?;
        let keys = require_array(keys, "JWKS 'keys' is not a list")?;
        Ok(Self { keys })
    }

    /// The key whose `kid` equals `kid` exactly.
    pub fn find(&self, kid: &str) -> Option<&Map<String, Value>> {
        self.keys
            .iter()
            .filter_map(Value::as_object)
            .find(|key| key.get("kid").and_then(Value::as_str) == Some(kid))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Result of the authorization-code exchange.
///
/// Feide never issues refresh tokens, so none is modelled; one present in the
/// response is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn from_json(data: &Map<String, Value>) -> Result<Self, FeideOidcError> {
        Ok(Self {
            access_token: require_str(data, "access_token")?,
            id_token: optional_str(data, "id_token")?,
            token_type: optional_str(data, "token_type")?.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: int_or(data, "expires_in", 0)?,
            scope: optional_str(data, "scope")?,
        })
    }
}

/// Result of an RFC 8693 token exchange: a different token, bound to a different audience.
///
/// `Deserialize` is only for reading it back from a session; provider
/// responses go through [`TokenExchangeResponse::from_json`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExchangeResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: Option<String>,
}

impl TokenExchangeResponse {
    pub fn from_json(data: &Map<String, Value>) -> Result<Self, FeideOidcError> {
        Ok(Self {
            access_token: require_str(data, "access_token")?,
            token_type: optional_str(data, "token_type")?.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: int_or(data, "expires_in", 0)?,
            scope: optional_str(data, "scope")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn discovery_json() -> Value {
        json!({
            "issuer": "https://auth.dataporten.no",
            "authorization_endpoint": "https://auth.dataporten.no/oauth/authorization",
            "token_endpoint": "https://auth.dataporten.no/oauth/token",
            "jwks_uri": "https://auth.dataporten.no/openid/jwks",
            "userinfo_endpoint": "https://auth.dataporten.no/openid/userinfo",
        })
    }

    #[test]
    fn discovery_decodes_without_end_session() {
        let doc = DiscoveryDocument::from_json(&obj(discovery_json())).unwrap();
        assert_eq!(doc.token_endpoint, "https://auth.dataporten.no/oauth/token");
        assert_eq!(doc.end_session_endpoint, None);
    }

    #[test]
    fn discovery_missing_any_required_field_fails() {
        for field in [
            "authorization_endpoint",
            "token_endpoint",
            "jwks_uri",
            "userinfo_endpoint",
        ] {
            let mut data = obj(discovery_json());
            data.remove(field);
            let err = DiscoveryDocument::from_json(&data).unwrap_err();
            assert!(
                matches!(err, FeideOidcError::Decode(ref m) if m.contains(field)),
                "expected decode error naming {field}, got {err:?}"
            );
        }
    }

    #[test]
    fn discovery_wrong_type_fails_even_for_optional() {
        let mut data = obj(discovery_json());
        data.insert("end_session_endpoint".into(), json!(42));
        assert!(matches!(
            DiscoveryDocument::from_json(&data),
            Err(FeideOidcError::Decode(_))
        ));

        let mut data = obj(discovery_json());
        data.insert("jwks_uri".into(), json!(["https://x"]));
        assert!(DiscoveryDocument::from_json(&data).is_err());
    }

    #[test]
    fn token_response_defaults() {
        let resp = TokenResponse::from_json(&obj(json!({"access_token": "t"}))).unwrap();
        assert_eq!(resp.token_type, "Bearer");
        assert_eq!(resp.expires_in, 0);
        assert_eq!(resp.id_token, None);
        assert_eq!(resp.scope, None);
    }

    #[test]
    fn expires_in_accepts_numeric_string_and_rejects_bool() {
        let resp =
            TokenResponse::from_json(&obj(json!({"access_token": "t", "expires_in": "3600"})))
                .unwrap();
        assert_eq!(resp.expires_in, 3600);

        let err = TokenResponse::from_json(&obj(json!({"access_token": "t", "expires_in": true})))
            .unwrap_err();
        assert!(matches!(err, FeideOidcError::Decode(ref m) if m.contains("bool")));

        assert!(TokenExchangeResponse::from_json(&obj(
            json!({"access_token": "t", "expires_in": "soon"})
        ))
        .is_err());
        assert!(TokenExchangeResponse::from_json(&obj(
            json!({"access_token": "t", "expires_in": 1.5})
        ))
        .is_err());
    }

    #[test]
    fn token_response_requires_access_token() {
        let err = TokenResponse::from_json(&obj(json!({"id_token": "x"}))).unwrap_err();
        assert!(matches!(err, FeideOidcError::Decode(ref m) if m.contains("access_token")));
    }

    #[test]
    fn token_response_decode_is_idempotent() {
        let original = TokenResponse {
            access_token: "t".into(),
            id_token: None,
            token_type: "Bearer".into(),
            expires_in: 5,
            scope: None,
        };
        let encoded = serde_json::to_value(&original).unwrap();
        let decoded = TokenResponse::from_json(&obj(encoded)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn jwks_lookup_by_kid() {
        let jwks = Jwks::from_json(&obj(json!({
            "keys": [
                "not-a-key",
                {"kid": "k1", "kty": "oct", "k": "AA"},
                {"kid": "k2", "kty": "oct", "k": "AQ"},
            ]
        })))
        .unwrap();
        assert_eq!(jwks.len(), 3);
        assert_eq!(jwks.find("k2").unwrap()["k"], "AQ");
        assert!(jwks.find("K2").is_none());
    }

    #[test]
    fn jwks_requires_key_list() {
        assert!(Jwks::from_json(&obj(json!({}))).is_err());
        assert!(matches!(
            Jwks::from_json(&obj(json!({"keys": {"kid": "k"}}))),
            Err(FeideOidcError::Shape(_))
        ));
    }
}
