//! Application state for the API server

use crate::api::auth::{ApiKeyValidator, SessionValidator};
use crate::api::catalog::CatalogResolver;
use crate::{Config, RemuxDownloader};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// This struct is cloned for each request (cheap Arc clone) and provides
/// access to the downloader instance, configuration and the external
/// collaborators.
#[derive(Clone)]
pub struct AppState {
    /// The main RemuxDownloader instance
    pub downloader: Arc<RemuxDownloader>,

    /// Configuration (read-only)
    pub config: Arc<Config>,

    /// Resolves request credentials to an identity
    pub sessions: Arc<dyn SessionValidator>,

    /// Resolves `movieId` download requests, if a catalog is attached
    pub catalog: Option<Arc<dyn CatalogResolver>>,
}

impl AppState {
    /// Create a new AppState authenticating with the configured API key
    pub fn new(downloader: Arc<RemuxDownloader>, config: Arc<Config>) -> Self {
        let sessions = Arc::new(ApiKeyValidator::new(config.server.api.api_key.clone()));
        Self {
            downloader,
            config,
            sessions,
            catalog: None,
        }
    }

    /// Replace the session validator
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionValidator>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Attach a catalog for `movieId` requests
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogResolver>) -> Self {
        self.catalog = Some(catalog);
        self
    }
}
