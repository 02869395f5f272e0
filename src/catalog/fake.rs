//! In-memory [`CatalogApi`] used by engine-level tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;

use super::{
    CatalogApi, CatalogError, Collection, CollectionKind, ContentStream, MediaItem, MediaKind,
    Page, Variant,
};

pub(crate) struct FakeCatalog {
    page_size: usize,
    collections: Vec<Collection>,
    members: HashMap<String, Vec<MediaItem>>,
    stream: Vec<MediaItem>,
    variants: HashMap<String, Vec<Variant>>,
    content: HashMap<String, Vec<u8>>,
    declared_lengths: HashMap<String, u64>,
    truncations: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, VecDeque<CatalogError>>>,
    api_calls: Mutex<Vec<Instant>>,
    content_opens: Mutex<HashMap<String, usize>>,
}

impl FakeCatalog {
    pub(crate) fn new() -> Self {
        Self {
            page_size: 2,
            collections: Vec::new(),
            members: HashMap::new(),
            stream: Vec::new(),
            variants: HashMap::new(),
            content: HashMap::new(),
            declared_lengths: HashMap::new(),
            truncations: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            api_calls: Mutex::new(Vec::new()),
            content_opens: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn collection(mut self, id: &str, title: &str) -> Self {
        self.collections
            .push(Collection::new(id, title, CollectionKind::Manual));
        self
    }

    /// Add a photo to the photostream and to each listed collection, with a
    /// single original variant whose content is `data-<id>`.
    pub(crate) fn photo(self, collections: &[&str], id: &str, title: &str) -> Self {
        self.item(collections, id, title, MediaKind::Photo)
    }

    pub(crate) fn video(self, collections: &[&str], id: &str, title: &str) -> Self {
        self.item(collections, id, title, MediaKind::Video)
    }

    fn item(mut self, collections: &[&str], id: &str, title: &str, kind: MediaKind) -> Self {
        let item = MediaItem {
            id: id.into(),
            title: title.into(),
            kind,
            format: None,
        };
        for c in collections {
            self.members
                .entry((*c).to_string())
                .or_default()
                .push(item.clone());
        }
        self.stream.push(item);

        let (label, width, height, ext) = match kind {
            MediaKind::Photo => ("Original", 4000, 3000, "jpg"),
            MediaKind::Video => ("Video Original", 0, 0, "mp4"),
        };
        let url = format!("https://cdn.example.com/{id}_o.{ext}");
        self.content
            .insert(url.clone(), format!("data-{id}").into_bytes());
        self.variants.insert(
            id.to_string(),
            vec![Variant {
                label: label.into(),
                width,
                height,
                url,
                size: None,
                media: kind,
            }],
        );
        self
    }

    pub(crate) fn variants(mut self, id: &str, variants: Vec<Variant>) -> Self {
        for v in &variants {
            self.content
                .entry(v.url.clone())
                .or_insert_with(|| format!("data-{id}-{}", v.label).into_bytes());
        }
        self.variants.insert(id.to_string(), variants);
        self
    }

    /// Serve `bytes` for the variant URL but declare `declared` as its length.
    pub(crate) fn short_content(mut self, url: &str, bytes: &[u8], declared: u64) -> Self {
        self.content.insert(url.to_string(), bytes.to_vec());
        self.declared_lengths.insert(url.to_string(), declared);
        self
    }

    /// Queue an error for the next call matching `key`: `collections`,
    /// `items:<collection>`, `stream`, `variants:<item>`, `content:<item>`.
    pub(crate) fn fail_next(&self, key: &str, error: CatalogError) {
        self.failures
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(error);
    }

    /// Make the next content open for `item_id` deliver one byte less than
    /// it declares. Checked before queued failures.
    pub(crate) fn truncate_next(&self, item_id: &str) {
        *self
            .truncations
            .lock()
            .unwrap()
            .entry(item_id.to_string())
            .or_default() += 1;
    }

    fn take_truncation(&self, item_id: &str) -> bool {
        match self.truncations.lock().unwrap().get_mut(item_id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn api_call_times(&self) -> Vec<Instant> {
        self.api_calls.lock().unwrap().clone()
    }

    pub(crate) fn content_opens(&self, item_id: &str) -> usize {
        self.content_opens
            .lock()
            .unwrap()
            .get(item_id)
            .copied()
            .unwrap_or(0)
    }

    fn take_failure(&self, key: &str) -> Result<(), CatalogError> {
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
        {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record_api_call(&self) {
        self.api_calls.lock().unwrap().push(Instant::now());
    }

    fn paginate<T: Clone>(&self, all: &[T], page: u32) -> Page<T> {
        let pages = all.len().div_ceil(self.page_size).max(1) as u32;
        let start = (page.saturating_sub(1) as usize) * self.page_size;
        let items = all
            .iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        Page { items, page, pages }
    }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn list_collections(&self, page: u32) -> Result<Page<Collection>, CatalogError> {
        self.record_api_call();
        self.take_failure("collections")?;
        Ok(self.paginate(&self.collections, page))
    }

    async fn list_collection_items(
        &self,
        collection_id: &str,
        page: u32,
    ) -> Result<Page<MediaItem>, CatalogError> {
        self.record_api_call();
        self.take_failure(&format!("items:{collection_id}"))?;
        let items = self
            .members
            .get(collection_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(self.paginate(items, page))
    }

    async fn list_all_items(&self, page: u32) -> Result<Page<MediaItem>, CatalogError> {
        self.record_api_call();
        self.take_failure("stream")?;
        Ok(self.paginate(&self.stream, page))
    }

    async fn get_item_variants(&self, item_id: &str) -> Result<Vec<Variant>, CatalogError> {
        self.record_api_call();
        self.take_failure(&format!("variants:{item_id}"))?;
        self.variants
            .get(item_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("photo {item_id}")))
    }

    async fn open_content(&self, variant: &Variant) -> Result<ContentStream, CatalogError> {
        let item_id = variant
            .url
            .rsplit('/')
            .next()
            .and_then(|name| name.split('_').next())
            .unwrap_or_default()
            .to_string();
        *self
            .content_opens
            .lock()
            .unwrap()
            .entry(item_id.clone())
            .or_default() += 1;
        let truncated = self.take_truncation(&item_id);
        if !truncated {
            self.take_failure(&format!("content:{item_id}"))?;
        }

        let mut data = self
            .content
            .get(&variant.url)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(variant.url.clone()))?;
        let content_length = Some(
            self.declared_lengths
                .get(&variant.url)
                .copied()
                .unwrap_or(data.len() as u64),
        );
        if truncated {
            data.pop();
        }
        // Two chunks so writers see a multi-chunk body.
        let mid = data.len() / 2;
        let chunks = vec![
            Ok(Bytes::copy_from_slice(&data[..mid])),
            Ok(Bytes::copy_from_slice(&data[mid..])),
        ];
        Ok(ContentStream {
            content_length,
            body: stream::iter(chunks).boxed(),
        })
    }
}
