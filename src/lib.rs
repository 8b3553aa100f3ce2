//! Client runtime core for the Stratus platform API.
//!
//! Everything resource-specific lives outside this crate; what lives here
//! is the machinery every resource call shares:
//!
//! - authenticated request execution with token acquisition and
//!   automatic refresh ([`auth`], [`http`]),
//! - retry with exponential backoff on transient failures ([`http::retry`]),
//! - chunked multipart upload with independently retried parts ([`upload`]),
//! - the generic search pagination engine ([`pagination`]).
//!
//! ```no_run
//! use stratus_sdk::{Client, ClientConfig, Credentials, SearchQuery};
//! use serde_json::json;
//!
//! # async fn run() -> stratus_sdk::Result<()> {
//! let config = ClientConfig::new("https://app.stratus.example.com")
//!     .with_service_name("ingest-worker");
//! let client = Client::new(config, Credentials::client("my-client", "my-secret"))?;
//!
//! let mut pager = client.search_pager(
//!     "dm/search-datasets",
//!     SearchQuery::new().filter(json!({"name": {"$match": "survey"}})),
//! );
//! while let Some(dataset) = pager.next().await? {
//!     println!("{}", dataset["_id"]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod pagination;
pub mod upload;

pub use auth::{Credentials, Token, TokenManager};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use http::{Connection, Request, Response, RetryConfig, RetryDecision, Transport};
pub use pagination::{Page, PaginationConfig, SearchPager, SearchQuery};
pub use upload::{UploadConfig, UploadDestination, Uploader};
