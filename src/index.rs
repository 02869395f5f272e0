//! Two-phase remote index build.
//!
//! Phase one lists every collection. Phase two lists the members of each
//! collection in discovery order, then walks the whole photostream so
//! items outside any collection land in a synthetic "Unsorted" collection.
//! The result maps every item to the ordered set of collections it was
//! seen in; nothing is downloaded until the build completes.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;

use futures_util::stream::{self, Stream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CatalogClient, CatalogError, Collection, CollectionKind, MediaItem, Page};
use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};

pub const UNSORTED_ID: &str = "unsorted";
pub const UNSORTED_TITLE: &str = "Unsorted";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Failed to index {collection}: {source}")]
    Fatal {
        collection: String,
        #[source]
        source: CatalogError,
    },

    #[error("Index build interrupted")]
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Collection titles treated as auto-generated (case-insensitive).
    pub auto_generated_names: Vec<String>,
    pub retry: RetryConfig,
}

/// An item and the discovery indices of every collection it belongs to.
#[derive(Debug, Clone)]
pub struct IndexedItem {
    pub item: MediaItem,
    pub memberships: BTreeSet<usize>,
}

#[derive(Debug, Default)]
pub struct CatalogIndex {
    collections: Vec<Collection>,
    items: Vec<IndexedItem>,
    positions: HashMap<String, usize>,
}

impl CatalogIndex {
    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    pub fn collection(&self, idx: usize) -> Option<&Collection> {
        self.collections.get(idx)
    }

    /// Items in first-seen order.
    pub fn items(&self) -> &[IndexedItem] {
        &self.items
    }

    #[cfg(test)]
    pub fn get(&self, item_id: &str) -> Option<&IndexedItem> {
        self.positions.get(item_id).map(|&p| &self.items[p])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Discovery index of the synthetic Unsorted collection, if present.
    pub fn unsorted_index(&self) -> Option<usize> {
        self.collections
            .iter()
            .rposition(|c| c.kind == CollectionKind::Unsorted)
    }

    pub fn push_collection(&mut self, collection: Collection) -> usize {
        self.collections.push(collection);
        self.collections.len() - 1
    }

    /// Record that `item` belongs to collection `idx`. Repeated
    /// memberships collapse.
    pub fn add_membership(&mut self, idx: usize, item: MediaItem) {
        self.entry(item).memberships.insert(idx);
    }

    /// Record an item without adding a membership.
    fn add_item(&mut self, item: MediaItem) {
        self.entry(item);
    }

    fn entry(&mut self, item: MediaItem) -> &mut IndexedItem {
        let pos = match self.positions.get(&item.id) {
            Some(&p) => p,
            None => {
                self.positions.insert(item.id.clone(), self.items.len());
                self.items.push(IndexedItem {
                    item,
                    memberships: BTreeSet::new(),
                });
                self.items.len() - 1
            }
        };
        &mut self.items[pos]
    }

    /// Assign every item with no membership to a trailing Unsorted
    /// collection. Returns how many items were assigned.
    fn assign_unsorted(&mut self) -> usize {
        if self.items.iter().all(|i| !i.memberships.is_empty()) {
            return 0;
        }
        let idx = self.push_collection(Collection::new(
            UNSORTED_ID,
            UNSORTED_TITLE,
            CollectionKind::Unsorted,
        ));
        let mut assigned = 0;
        for entry in &mut self.items {
            if entry.memberships.is_empty() {
                entry.memberships.insert(idx);
                assigned += 1;
            }
        }
        assigned
    }

    pub fn membership_count(&self) -> usize {
        self.items.iter().map(|i| i.memberships.len()).sum()
    }
}

/// Whether `title` names an auto-generated collection.
pub fn is_auto_generated(title: &str, auto_names: &[String]) -> bool {
    let title = title.trim();
    auto_names.iter().any(|n| n.trim().eq_ignore_ascii_case(title))
}

/// Finite lazy stream of pages, fetched one at a time until the last page.
///
/// A failed fetch yields the error and ends the stream.
pub fn paginate<T, F, Fut>(fetch: F) -> impl Stream<Item = Result<Vec<T>, CatalogError>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, CatalogError>>,
{
    stream::unfold((fetch, Some(1u32)), |(mut fetch, cursor)| async move {
        let page = cursor?;
        match fetch(page).await {
            Ok(p) => {
                let next = if p.is_last() { None } else { Some(page + 1) };
                Some((Ok(p.items), (fetch, next)))
            }
            Err(e) => Some((Err(e), (fetch, None))),
        }
    })
}

fn classify(e: &CatalogError) -> RetryAction {
    if e.is_transient() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

/// Drain a paginated listing, checking the stop signal between pages.
async fn drain<T, F, Fut>(
    label: &str,
    shutdown: &CancellationToken,
    fetch: F,
    mut sink: impl FnMut(Vec<T>),
) -> Result<(), IndexError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, CatalogError>>,
{
    let pages = paginate(fetch);
    tokio::pin!(pages);
    while let Some(page) = pages.next().await {
        let items = page.map_err(|source| IndexError::Fatal {
            collection: label.to_string(),
            source,
        })?;
        sink(items);
        if shutdown.is_cancelled() {
            return Err(IndexError::Interrupted);
        }
    }
    Ok(())
}

/// Build the full item→collections index.
pub async fn build_index(
    client: &CatalogClient,
    config: &IndexConfig,
    shutdown: &CancellationToken,
) -> Result<CatalogIndex, IndexError> {
    let retry = &config.retry;
    let mut index = CatalogIndex::default();

    let mut collections = Vec::new();
    drain(
        "collection list",
        shutdown,
        |page| retry_with_backoff(retry, classify, move || client.collections(page)),
        |batch| collections.extend(batch),
    )
    .await?;

    for mut collection in collections {
        if is_auto_generated(&collection.title, &config.auto_generated_names) {
            collection.kind = CollectionKind::AutoGenerated;
        }
        index.push_collection(collection);
    }
    tracing::info!(collections = index.collections().len(), "Listed collections");

    for idx in 0..index.collections().len() {
        let (id, title) = {
            let c = &index.collections()[idx];
            (c.id.clone(), c.title.clone())
        };
        let mut members = 0usize;
        drain(
            &title,
            shutdown,
            |page| {
                let id = id.as_str();
                retry_with_backoff(retry, classify, move || client.collection_items(id, page))
            },
            |batch| {
                members += batch.len();
                for item in batch {
                    index.add_membership(idx, item);
                }
            },
        )
        .await?;
        tracing::debug!(collection = %title, members, "Indexed collection");
    }

    let mut streamed = 0usize;
    drain(
        "photostream",
        shutdown,
        |page| retry_with_backoff(retry, classify, move || client.all_items(page)),
        |batch| {
            streamed += batch.len();
            for item in batch {
                index.add_item(item);
            }
        },
    )
    .await?;
    let unsorted = index.assign_unsorted();

    tracing::info!(
        items = index.len(),
        streamed,
        memberships = index.membership_count(),
        unsorted,
        "Index build complete"
    );
    Ok(index)
}
