//! Single-attempt HTTP executor.
//!
//! Builds the `reqwest` client from the configuration, injects the bearer
//! token and standard headers, and normalizes the outcome. Retries and
//! re-authentication live one layer up in [`Connection`].
//!
//! [`Connection`]: super::connection::Connection

use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use once_cell::sync::Lazy;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::http::request::{Body, Request, Response, Target};

/// Stable per-process identifier attached to every platform request.
static PROCESS_CLIENT_ID: Lazy<String> = Lazy::new(|| uuid::Uuid::new_v4().to_string());

/// Issues one HTTP request per call; unaware of retries.
pub struct Transport {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
    service_name: Option<String>,
    timeout: Duration,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10));

        if config.disable_ssl_verification {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(proxy_url) = &config.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|err| Error::Network { message: err.to_string(), attempts: 0 })?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|err| Error::Network { message: err.to_string(), attempts: 0 })?;

        let sdk = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let user_agent = match &config.service_name {
            Some(service) => format!("{sdk} ({service})"),
            None => sdk,
        };

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            user_agent,
            service_name: config.service_name.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, target: &Target) -> String {
        match target {
            Target::Platform(path) => {
                format!("{}/{}", self.base_url, path.trim_start_matches('/'))
            }
            Target::External(url) => url.clone(),
        }
    }

    /// Perform one attempt of `request`, attaching `token` as a bearer
    /// credential on platform targets only.
    pub async fn send(&self, request: &Request, token: Option<&str>) -> Result<Response> {
        let url = self.url_for(&request.target);
        let mut builder = self.http.request(request.method.clone(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = builder.header("User-Agent", &self.user_agent);
        if request.is_platform() {
            if let Some(token) = token {
                builder = builder.bearer_auth(token);
            }
            builder = builder
                .header("Referer", &self.base_url)
                .header("X-Client-Id", PROCESS_CLIENT_ID.as_str());
            if let Some(service) = &self.service_name {
                builder = builder.header("X-Service-Name", service);
            }
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Bytes(bytes) => builder.body(bytes.clone()),
        };

        debug!("{} {}", request.method, url);
        let response = builder.send().await.map_err(|err| self.classify(err))?;

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }
        let body = response.bytes().await.map_err(|err| self.classify(err))?.to_vec();

        Ok(Response { status, headers, body })
    }

    fn classify(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout { timeout: self.timeout, attempts: 1 }
        } else {
            Error::Network { message: err.to_string(), attempts: 1 }
        }
    }
}
