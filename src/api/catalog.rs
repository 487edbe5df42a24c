//! Catalog lookup for downloads requested by movie id

use async_trait::async_trait;

/// Resolves a catalog entry to the remote page URL of its media
///
/// The catalog itself lives outside this crate; embedders provide an
/// implementation through [`crate::api::AppState::with_catalog`].
#[async_trait]
pub trait CatalogResolver: Send + Sync {
    /// Source URL of `movie_id`, or `None` when the entry is unknown
    async fn resolve(&self, movie_id: &str) -> Option<String>;
}
