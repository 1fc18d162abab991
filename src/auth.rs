//! Login payloads for the HitBTC WebSocket API
//!
//! Two algorithms are supported:
//! - `HS256` (default): `signature = hex(HMAC-SHA256(secret, key + nonce))`
//! - `BASIC`: the secret key is sent verbatim

use crate::data::Params;
use crate::error::AuthError;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// JSON-RPC method used for session authentication
pub const LOGIN_METHOD: &str = "login";

/// Credentials for authenticated API access
#[derive(Clone, PartialEq)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    pub fn new(key: &str, secret: &str) -> Self {
        Self {
            key: key.to_string(),
            secret: secret.to_string(),
        }
    }

    /// Create credentials from environment variables
    ///
    /// Loads `.env` if present, then looks for `HITBTC_API_KEY` and `HITBTC_API_SECRET`
    pub fn from_env() -> Result<Self, AuthError> {
        let _ = dotenvy::dotenv();
        let key = std::env::var("HITBTC_API_KEY").map_err(|_| AuthError::MissingCredentials)?;
        let secret = std::env::var("HITBTC_API_SECRET").map_err(|_| AuthError::MissingCredentials)?;

        if key.is_empty() || secret.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        Ok(Self::new(&key, &secret))
    }

    /// Pick call-supplied values over stored ones, field by field
    ///
    /// Fails when the merged result still lacks a key or a secret.
    pub fn resolve(
        stored: Option<&Credentials>,
        key: Option<&str>,
        secret: Option<&str>,
    ) -> Result<Self, AuthError> {
        let key = key
            .filter(|k| !k.is_empty())
            .or_else(|| stored.map(|c| c.key.as_str()).filter(|k| !k.is_empty()));
        let secret = secret
            .filter(|s| !s.is_empty())
            .or_else(|| stored.map(|c| c.secret.as_str()).filter(|s| !s.is_empty()));

        match (key, secret) {
            (Some(key), Some(secret)) => Ok(Self::new(key, secret)),
            _ => Err(AuthError::MissingCredentials),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &format!("{}...", &self.key.chars().take(8).collect::<String>()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Login algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Signed,
    Basic,
}

/// `params` of a `login` request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LoginParams {
    Signed {
        algo: &'static str,
        #[serde(rename = "pKey")]
        p_key: String,
        nonce: String,
        signature: String,
    },
    Basic {
        algo: &'static str,
        #[serde(rename = "pKey")]
        p_key: String,
        #[serde(rename = "sKey")]
        s_key: String,
    },
}

impl LoginParams {
    /// Build the login payload for `credentials`
    ///
    /// In signed mode the nonce defaults to the current millisecond timestamp.
    pub fn build(
        credentials: &Credentials,
        mode: AuthMode,
        nonce: Option<&str>,
    ) -> Result<Self, AuthError> {
        match mode {
            AuthMode::Signed => {
                let nonce = nonce.map(str::to_string).unwrap_or_else(generate_nonce);
                let signature = sign(&credentials.secret, &credentials.key, &nonce)?;
                Ok(LoginParams::Signed {
                    algo: "HS256",
                    p_key: credentials.key.clone(),
                    nonce,
                    signature,
                })
            }
            AuthMode::Basic => Ok(LoginParams::Basic {
                algo: "BASIC",
                p_key: credentials.key.clone(),
                s_key: credentials.secret.clone(),
            }),
        }
    }

    pub fn algo(&self) -> &'static str {
        match self {
            LoginParams::Signed { algo, .. } | LoginParams::Basic { algo, .. } => algo,
        }
    }

    /// Convert into a JSON-RPC params object
    pub fn into_params(self) -> Params {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Params::new(),
        }
    }
}

/// `hex(HMAC-SHA256(secret, key + nonce))`
pub fn sign(secret: &str, key: &str, nonce: &str) -> Result<String, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AuthError::InvalidSecret(format!("HMAC error: {}", e)))?;
    mac.update(key.as_bytes());
    mac.update(nonce.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Current Unix time in milliseconds as a decimal string
pub fn generate_nonce() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_signed_payload_known_vector() {
        let creds = Credentials::new("K", "S");
        let params = LoginParams::build(&creds, AuthMode::Signed, Some("1000")).unwrap();

        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({
                "algo": "HS256",
                "pKey": "K",
                "nonce": "1000",
                "signature": "9fcacd10fb566f91c9ca39ef31ff12140de0931940642a95e55fe9fb2a51052e"
            })
        );
    }

    #[test]
    fn test_signature_deterministic() {
        let sig1 = sign("secret", "key", "1700000000000").unwrap();
        let sig2 = sign("secret", "key", "1700000000000").unwrap();

        assert_eq!(sig1, sig2);
        assert_eq!(sig1, "0eb15ed09c26d51b65c3de4a2c219450f5835924b266e2fe34bb0249b2be2309");
    }

    #[test]
    fn test_basic_payload() {
        let creds = Credentials::new("K", "S");
        let params = LoginParams::build(&creds, AuthMode::Basic, None).unwrap();

        assert_eq!(params.algo(), "BASIC");
        assert_eq!(
            Value::Object(params.into_params()),
            json!({"algo": "BASIC", "pKey": "K", "sKey": "S"})
        );
    }

    #[test]
    fn test_default_nonce_is_millis() {
        let creds = Credentials::new("K", "S");
        match LoginParams::build(&creds, AuthMode::Signed, None).unwrap() {
            LoginParams::Signed { nonce, .. } => {
                let millis: i64 = nonce.parse().unwrap();
                assert!(millis > 1_600_000_000_000);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_resolve_credentials() {
        let stored = Credentials::new("stored_key", "stored_secret");

        let creds = Credentials::resolve(Some(&stored), None, None).unwrap();
        assert_eq!(creds, stored);

        let creds = Credentials::resolve(Some(&stored), Some("call_key"), None).unwrap();
        assert_eq!(creds.key(), "call_key");

        let creds = Credentials::resolve(None, Some("k"), Some("s")).unwrap();
        assert_eq!(creds, Credentials::new("k", "s"));

        assert_eq!(Credentials::resolve(None, Some("k"), None), Err(AuthError::MissingCredentials));
        assert_eq!(Credentials::resolve(None, None, None), Err(AuthError::MissingCredentials));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("my_api_key_12345", "super_secret");
        let debug_str = format!("{:?}", creds);

        assert!(debug_str.contains("my_api_k..."));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super_secret"));
    }
}
