//! Collapse multi-collection membership to one primary collection per item.

use std::collections::{BTreeSet, HashMap};

use crate::catalog::{Collection, CollectionKind};
use crate::index::CatalogIndex;

/// An item seen in more than one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateEntry {
    pub item_id: String,
    pub title: String,
    /// Collection titles in discovery order.
    pub collections: Vec<String>,
    pub primary: String,
}

#[derive(Debug, Default)]
pub struct Resolution {
    primary: HashMap<String, usize>,
    pub duplicates: Vec<DuplicateEntry>,
}

impl Resolution {
    /// Discovery index of the item's primary collection.
    pub fn primary(&self, item_id: &str) -> Option<usize> {
        self.primary.get(item_id).copied()
    }
}

/// Pick the primary collection from an ordered membership set.
///
/// The earliest-discovered manual collection wins; when every membership
/// is auto-generated (or unsorted) the earliest-discovered one does. An
/// empty set resolves to `fallback`.
pub fn primary_for(
    memberships: &BTreeSet<usize>,
    collections: &[Collection],
    fallback: usize,
) -> usize {
    memberships
        .iter()
        .copied()
        .find(|&idx| {
            collections
                .get(idx)
                .is_some_and(|c| c.kind == CollectionKind::Manual)
        })
        .or_else(|| memberships.first().copied())
        .unwrap_or(fallback)
}

pub fn resolve(index: &CatalogIndex) -> Resolution {
    let collections = index.collections();
    // The builder assigns orphans to Unsorted, so the fallback only matters
    // for hand-built indices.
    let fallback = index
        .unsorted_index()
        .unwrap_or_else(|| collections.len().saturating_sub(1));

    let mut resolution = Resolution::default();
    for entry in index.items() {
        let primary = primary_for(&entry.memberships, collections, fallback);
        resolution.primary.insert(entry.item.id.clone(), primary);

        if entry.memberships.len() > 1 {
            let titles = entry
                .memberships
                .iter()
                .filter_map(|&idx| collections.get(idx))
                .map(|c| c.title.clone())
                .collect();
            resolution.duplicates.push(DuplicateEntry {
                item_id: entry.item.id.clone(),
                title: entry.item.title.clone(),
                collections: titles,
                primary: collections
                    .get(primary)
                    .map(|c| c.title.clone())
                    .unwrap_or_default(),
            });
        }
    }
    resolution
}

/// Log the duplicate report.
pub fn log_duplicates(duplicates: &[DuplicateEntry]) {
    if duplicates.is_empty() {
        return;
    }
    tracing::info!(
        count = duplicates.len(),
        "Items found in several collections; each is stored once"
    );
    for dup in duplicates {
        tracing::debug!(
            item = %dup.item_id,
            title = %dup.title,
            collections = ?dup.collections,
            primary = %dup.primary,
            "Duplicate membership"
        );
    }
}
