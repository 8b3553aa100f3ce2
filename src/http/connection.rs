//! Authenticated connection with retry and automatic re-authentication.

use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;

use crate::auth::token::TokenManager;
use crate::error::{Error, Result};
use crate::http::request::{Request, Response};
use crate::http::retry::{RetryConfig, RetryDecision};
use crate::http::transport::Transport;

/// Wraps the transport with the retry policy and the 401 refresh path.
///
/// Safe to share across tasks; backoff sleeps block only the calling
/// task and never hold the token-exchange lock.
pub struct Connection {
    transport: Arc<Transport>,
    tokens: Arc<TokenManager>,
    retry: RetryConfig,
}

impl Connection {
    pub fn new(transport: Arc<Transport>, tokens: Arc<TokenManager>, retry: RetryConfig) -> Self {
        Self { transport, tokens, retry }
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// Execute one logical call, retrying per the policy.
    ///
    /// A 401 on a platform request triggers exactly one token refresh and
    /// replay outside the retry budget; a second 401 is terminal.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let mut attempt: u32 = 0;
        let mut reauthenticated = false;

        'retry: loop {
            attempt += 1;

            // Token acquisition failures go through the same policy as the
            // request itself: an unreachable token endpoint is transient, a
            // rejected grant (`Error::Auth`) gives up immediately.
            let failure = 'attempt: {
                let token = if request.is_platform() {
                    match self.tokens.get_valid_token().await {
                        Ok(token) => Some(token),
                        Err(err) => break 'attempt err,
                    }
                } else {
                    None
                };

                match self.transport.send(&request, token.as_ref().map(|t| t.value.as_str())).await {
                    Ok(response) if response.is_success() => return Ok(response),
                    Ok(response) if response.status == 401 && request.is_platform() => {
                        if reauthenticated {
                            return Err(Error::Auth {
                                status: Some(401),
                                body: response.body_preview(),
                            });
                        }
                        debug!("got a 401, renewing the access token");
                        self.tokens.invalidate().await;
                        reauthenticated = true;
                        // The replay is not charged to the retry budget.
                        attempt -= 1;
                        continue 'retry;
                    }
                    Ok(response) => Error::Http {
                        status: response.status,
                        body: response.body_preview(),
                    },
                    Err(err) => err,
                }
            };

            match self.retry.decide(&failure, attempt, &request.method, request.retry_post) {
                RetryDecision::RetryAfter(delay) => {
                    warn!("attempt {attempt} failed ({failure}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => return Err(with_attempts(failure, attempt)),
            }
        }
    }

    /// Execute and decode the body as JSON (`null` for empty bodies).
    pub async fn execute_json(&self, request: Request) -> Result<Value> {
        let response = self.execute(request).await?;
        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        response.json()
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.execute_json(Request::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.execute_json(Request::post(path).json(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
        self.execute_json(Request::put(path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.execute_json(Request::delete(path)).await
    }
}

/// Stamp the final attempt count onto the surfaced failure.
fn with_attempts(failure: Error, attempts: u32) -> Error {
    match failure {
        Error::Network { message, .. } => Error::Network { message, attempts },
        Error::Timeout { timeout, .. } => Error::Timeout { timeout, attempts },
        other => other,
    }
}
