//! Remote catalog access.
//!
//! [`CatalogApi`] is the seam between the sync engine and the remote
//! service: paginated listings of collections and items, per-item variant
//! metadata, and raw content streams. [`CatalogClient`] wraps an
//! implementation so every API call is paced by the shared
//! [`RateLimiter`](crate::limiter::RateLimiter).

mod client;
pub mod error;
#[cfg(test)]
pub(crate) mod fake;
pub mod flickr;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

pub use client::CatalogClient;
pub use error::CatalogError;
pub use types::{Collection, CollectionKind, MediaItem, MediaKind, Page, Variant};

/// Body of a content download.
pub struct ContentStream {
    /// Length declared by the server, if any.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, CatalogError>>,
}

impl std::fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// One page of the account's collections, in the service's order.
    async fn list_collections(&self, page: u32) -> Result<Page<Collection>, CatalogError>;

    async fn list_collection_items(
        &self,
        collection_id: &str,
        page: u32,
    ) -> Result<Page<MediaItem>, CatalogError>;

    /// One page of every item in the account, whether or not it belongs to
    /// a collection.
    async fn list_all_items(&self, page: u32) -> Result<Page<MediaItem>, CatalogError>;

    async fn get_item_variants(&self, item_id: &str) -> Result<Vec<Variant>, CatalogError>;

    /// Open the byte stream behind a variant's URL. Not an API call.
    async fn open_content(&self, variant: &Variant) -> Result<ContentStream, CatalogError>;
}
