//! SDK handle wiring the configuration into the core components.

use std::path::Path;
use std::sync::Arc;

use crate::auth::{Credentials, TokenManager};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::http::connection::Connection;
use crate::http::transport::Transport;
use crate::pagination::{self, Page, PaginationConfig, SearchPager, SearchQuery};
use crate::upload::{UploadDestination, Uploader};

/// Entry point for resource code: one shared handle per deployment.
///
/// Cheap to clone-by-`Arc` internally; safe to share across tasks and
/// threads. Resource implementations hand it a verb, a path and an
/// opaque JSON body, and get back decoded JSON or a typed failure.
pub struct Client {
    connection: Arc<Connection>,
    uploader: Uploader,
    pagination: PaginationConfig,
}

impl Client {
    pub fn new(config: ClientConfig, credentials: Credentials) -> Result<Self> {
        let transport = Arc::new(Transport::new(&config)?);
        let tokens = Arc::new(TokenManager::new(
            transport.clone(),
            credentials,
            config.token_path.clone(),
            config.revoke_path.clone(),
        ));
        let connection = Arc::new(Connection::new(transport, tokens, config.retry.clone()));
        let uploader = Uploader::new(connection.clone(), config.upload.clone());

        Ok(Self { connection, uploader, pagination: config.pagination })
    }

    /// The retrying connection, for resource code issuing raw calls.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        self.connection.token_manager()
    }

    /// Fetch one bounded page from a `search-*` endpoint.
    pub async fn search(&self, path: &str, query: &SearchQuery) -> Result<Page> {
        pagination::search(&self.connection, path, query, &self.pagination).await
    }

    /// Lazy sequence of resources spanning pages; see [`SearchPager`].
    pub fn search_pager(&self, path: &str, query: SearchQuery) -> SearchPager {
        SearchPager::new(self.connection.clone(), path, query, &self.pagination)
    }

    /// Upload a local file to the given destination routes.
    pub async fn upload(&self, file_path: &Path, destination: &UploadDestination) -> Result<()> {
        self.uploader.upload(file_path, destination).await
    }

    /// Revoke the current token server-side, best-effort.
    pub async fn revoke(&self) {
        self.token_manager().revoke().await;
    }
}
