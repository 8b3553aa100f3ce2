//! Access token ownership and single-flight renewal.
//!
//! The manager talks to the token endpoint through the bare transport so
//! that renewal never recurses into the retrying connection.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;

use crate::auth::credentials::Credentials;
use crate::error::{Error, Result};
use crate::http::request::Request;
use crate::http::transport::Transport;

/// Safety margin subtracted from `expires_at` when deciding whether a
/// cached token is still usable for at least one request attempt.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Access token as held by the [`TokenManager`].
#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    /// Absent means non-expiring until revoked or rejected by the server.
    pub expires_at: Option<SystemTime>,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    scope: Option<String>,
}

/// Owns the current access token and its expiry.
///
/// Concurrent callers observing a missing or stale token coalesce into a
/// single exchange: the cache mutex is held across the network round trip,
/// so every waiter receives the result of that one exchange.
pub struct TokenManager {
    transport: Arc<Transport>,
    credentials: Credentials,
    token_path: String,
    revoke_path: String,
    cached: tokio::sync::Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(
        transport: Arc<Transport>,
        credentials: Credentials,
        token_path: impl Into<String>,
        revoke_path: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            credentials,
            token_path: token_path.into(),
            revoke_path: revoke_path.into(),
            cached: tokio::sync::Mutex::new(None),
        }
    }

    /// Token guaranteed usable for at least one request attempt.
    pub async fn get_valid_token(&self) -> Result<Token> {
        if let Credentials::BearerToken(value) = &self.credentials {
            return Ok(Token { value: value.clone(), expires_at: None, scope: None });
        }

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if usable(token) {
                return Ok(token.clone());
            }
        }

        let token = self.exchange().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Clear the cached token; the next `get_valid_token` re-authenticates.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Revoke the current token server-side, best-effort, and clear it.
    pub async fn revoke(&self) {
        let token = self.cached.lock().await.take();
        let Some(token) = token else { return };

        let request = Request::post(&self.revoke_path).json(json!({"token": token.value}));
        match self.transport.send(&request, Some(&token.value)).await {
            Ok(response) if response.is_success() => debug!("access token revoked"),
            Ok(response) => {
                warn!("token revocation returned HTTP {}", response.status);
            }
            Err(err) => warn!("token revocation failed: {err}"),
        }
    }

    /// Exchange credentials for a fresh token. Not retried here; the retry
    /// policy lives one layer up. Transport failures and 5xx answers keep
    /// their own types so that policy can treat them as transient; `Auth`
    /// is reserved for the server rejecting the grant.
    async fn exchange(&self) -> Result<Token> {
        let Some(grant) = self.credentials.grant_body() else {
            return Err(Error::Auth {
                status: None,
                body: "no credentials available for token renewal".into(),
            });
        };
        let Some(secret) = self.credentials.basic_auth() else {
            return Err(Error::Auth {
                status: None,
                body: "credentials carry no client secret".into(),
            });
        };

        debug!("requesting a new access token");
        let request = Request::post(&self.token_path)
            .header("Authorization", format!("Basic {secret}"))
            .json(grant);

        let response = self.transport.send(&request, None).await?;

        if !response.is_success() {
            // 4xx means the grant itself was rejected; anything else is
            // the endpoint misbehaving and stays retryable upstream.
            if (400..500).contains(&response.status) {
                return Err(Error::Auth {
                    status: Some(response.status),
                    body: response.body_preview(),
                });
            }
            return Err(Error::Http {
                status: response.status,
                body: response.body_preview(),
            });
        }

        let decoded: TokenResponse = response.json().map_err(|err| Error::Auth {
            status: Some(response.status),
            body: format!("unsupported token response: {err}"),
        })?;

        debug!("got a new access token");
        Ok(Token {
            value: decoded.access_token,
            expires_at: decoded.expires_in.map(|s| SystemTime::now() + Duration::from_secs(s)),
            scope: decoded.scope,
        })
    }
}

fn usable(token: &Token) -> bool {
    match token.expires_at {
        None => true,
        Some(expires_at) => SystemTime::now() + EXPIRY_MARGIN < expires_at,
    }
}
