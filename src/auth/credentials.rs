//! Credential material for the token exchange.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

// OAuth client registered for the SDK itself, used by the password grant
// when the caller has no client of their own.
const SDK_CLIENT_ID: &str = "6f1bc2d0-4c57-49a8-9ee5-d3b0a4f0c7e1";
const SDK_CLIENT_SECRET: &str = "b8f3c9d2-51ae-4f6b-8c07-2ad9e1f54a63";

/// Authentication material. Exactly one kind is active at a time; a
/// static bearer token bypasses the exchange entirely.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Resource-owner password grant.
    UserPassword {
        username: String,
        password: String,
        client_id: Option<String>,
        client_secret: Option<String>,
        scope: Option<String>,
    },
    /// Client-credentials grant.
    Client {
        client_id: String,
        client_secret: String,
        scope: Option<String>,
    },
    /// Pre-issued access token; no exchange is ever performed.
    BearerToken(String),
}

impl Credentials {
    pub fn user_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UserPassword {
            username: username.into(),
            password: password.into(),
            client_id: None,
            client_secret: None,
            scope: None,
        }
    }

    pub fn client(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self::Client {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
        }
    }

    pub fn bearer_token(token: impl Into<String>) -> Self {
        Self::BearerToken(token.into())
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::BearerToken(_))
    }

    /// `Basic` authorization value for the token endpoint.
    pub(crate) fn basic_auth(&self) -> Option<String> {
        let (id, secret) = match self {
            Self::UserPassword { client_id, client_secret, .. } => (
                client_id.as_deref().unwrap_or(SDK_CLIENT_ID),
                client_secret.as_deref().unwrap_or(SDK_CLIENT_SECRET),
            ),
            Self::Client { client_id, client_secret, .. } => {
                (client_id.as_str(), client_secret.as_str())
            }
            Self::BearerToken(_) => return None,
        };
        Some(BASE64.encode(format!("{id}:{secret}")))
    }

    /// JSON grant body for the token endpoint.
    pub(crate) fn grant_body(&self) -> Option<Value> {
        match self {
            Self::UserPassword { username, password, scope, .. } => {
                let mut body = json!({
                    "grant_type": "password",
                    "username": username,
                    "password": password,
                });
                if let Some(scope) = scope {
                    body["scope"] = json!(scope);
                }
                Some(body)
            }
            Self::Client { scope, .. } => {
                let mut body = json!({"grant_type": "client_credentials"});
                if let Some(scope) = scope {
                    body["scope"] = json!(scope);
                }
                Some(body)
            }
            Self::BearerToken(_) => None,
        }
    }
}
