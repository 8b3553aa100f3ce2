//! SDK configuration.
//!
//! The configuration is consumed at construction time as an explicit
//! object; the core never reads config files or the environment.

use std::time::Duration;

use crate::http::retry::RetryConfig;
use crate::pagination::PaginationConfig;
use crate::upload::UploadConfig;

/// Default per-request timeout. Generous because some platform calls are
/// synchronous long-running operations.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

const DEFAULT_TOKEN_PATH: &str = "/auth/oauth/token";
const DEFAULT_REVOKE_PATH: &str = "/auth/oauth/revoke-token";

/// Everything the core needs to talk to one platform deployment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Platform base URL, without trailing slash.
    pub base_url: String,
    /// Caller-supplied service name, reported in `User-Agent` and
    /// `X-Service-Name` for traceability.
    pub service_name: Option<String>,
    pub request_timeout: Duration,
    pub disable_ssl_verification: bool,
    pub proxy_url: Option<String>,
    /// Path of the token endpoint on the platform.
    pub token_path: String,
    /// Path of the best-effort revocation endpoint.
    pub revoke_path: String,
    pub retry: RetryConfig,
    pub upload: UploadConfig,
    pub pagination: PaginationConfig,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_name: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            disable_ssl_verification: false,
            proxy_url: None,
            token_path: DEFAULT_TOKEN_PATH.to_string(),
            revoke_path: DEFAULT_REVOKE_PATH.to_string(),
            retry: RetryConfig::default(),
            upload: UploadConfig::default(),
            pagination: PaginationConfig::default(),
        }
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_disable_ssl_verification(mut self, disable: bool) -> Self {
        self.disable_ssl_verification = disable;
        self
    }

    pub fn with_proxy_url(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_upload(mut self, upload: UploadConfig) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }
}
