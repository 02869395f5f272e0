use std::sync::Arc;

use super::{CatalogApi, CatalogError, Collection, ContentStream, MediaItem, Page, Variant};
use crate::limiter::RateLimiter;

/// Rate-limited front for a [`CatalogApi`].
///
/// Listing and metadata calls go through the shared limiter; content
/// transfers do not, since they hit the CDN rather than the API.
#[derive(Clone)]
pub struct CatalogClient {
    api: Arc<dyn CatalogApi>,
    limiter: Arc<RateLimiter>,
}

impl CatalogClient {
    pub fn new(api: Arc<dyn CatalogApi>, limiter: Arc<RateLimiter>) -> Self {
        Self { api, limiter }
    }

    pub async fn collections(&self, page: u32) -> Result<Page<Collection>, CatalogError> {
        self.limiter
            .call("list collections", || self.api.list_collections(page))
            .await
    }

    pub async fn collection_items(
        &self,
        collection_id: &str,
        page: u32,
    ) -> Result<Page<MediaItem>, CatalogError> {
        let context = format!("list items of collection {collection_id}");
        self.limiter
            .call(&context, || self.api.list_collection_items(collection_id, page))
            .await
    }

    pub async fn all_items(&self, page: u32) -> Result<Page<MediaItem>, CatalogError> {
        self.limiter
            .call("list photostream", || self.api.list_all_items(page))
            .await
    }

    pub async fn variants(&self, item_id: &str) -> Result<Vec<Variant>, CatalogError> {
        let context = format!("list variants of {item_id}");
        self.limiter
            .call(&context, || self.api.get_item_variants(item_id))
            .await
    }

    pub async fn open_content(&self, variant: &Variant) -> Result<ContentStream, CatalogError> {
        self.api.open_content(variant).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fake::FakeCatalog;
    use crate::limiter::ThrottleConfig;
    use crate::retry::RetryConfig;
    use std::time::Duration;

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(ThrottleConfig {
            min_interval: Duration::from_millis(1000),
            backoff: RetryConfig {
                max_retries: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
            },
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_calls_are_paced() {
        let fake = Arc::new(
            FakeCatalog::new()
                .collection("c1", "Vacation 2023")
                .photo(&["c1"], "1", "sunset"),
        );
        let client = CatalogClient::new(fake.clone(), limiter());

        client.collections(1).await.unwrap();
        client.collection_items("c1", 1).await.unwrap();
        client.variants("1").await.unwrap();

        let stamps = fake.api_call_times();
        assert_eq!(stamps.len(), 3);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_bypasses_limiter() {
        let fake = Arc::new(FakeCatalog::new().photo(&[], "1", "sunset"));
        let client = CatalogClient::new(fake.clone(), limiter());
        let variants = client.variants("1").await.unwrap();
        client.open_content(&variants[0]).await.unwrap();
        assert_eq!(fake.api_call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_call_is_retried() {
        let fake = Arc::new(FakeCatalog::new().photo(&[], "1", "sunset"));
        fake.fail_next("variants:1", CatalogError::Throttled {
            context: "photos.getSizes".into(),
            retry_after: Some(Duration::from_secs(3)),
        });
        let client = CatalogClient::new(fake.clone(), limiter());
        let variants = client.variants("1").await.unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(fake.api_call_times().len(), 2);
    }
}
