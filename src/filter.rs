//! Filter stage: turn resolved items into download tasks.
//!
//! Exclusions are applied in order: collection-name pattern, skip-list,
//! auto-generated collections, videos, then the resume ledger.

use std::path::PathBuf;

use glob::{MatchOptions, Pattern};

use crate::catalog::{CollectionKind, MediaKind};
use crate::download::paths::local_download_path;
use crate::download::DownloadTask;
use crate::index::CatalogIndex;
use crate::ledger::Ledger;
use crate::resolve::Resolution;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub directory: PathBuf,
    /// Only primary collections matching this pattern are kept.
    pub album_pattern: Option<Pattern>,
    pub skip_albums: Vec<String>,
    pub include_auto_generated: bool,
    pub download_videos: bool,
    /// Renditions are limited by a size cap, so photos are stored as JPEG.
    pub size_capped: bool,
}

#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub tasks: Vec<DownloadTask>,
    /// Items whose destination is already in the ledger.
    pub already_present: usize,
    /// Items dropped by the pattern, skip-list, or auto-generated rule.
    pub excluded: usize,
    pub skipped_videos: usize,
}

impl FilterConfig {
    fn collection_allowed(&self, title: &str, kind: CollectionKind) -> bool {
        if let Some(pattern) = &self.album_pattern {
            if kind == CollectionKind::Unsorted || !pattern.matches_with(title, MATCH_OPTIONS) {
                return false;
            }
        }
        let title = title.trim();
        if self
            .skip_albums
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case(title))
        {
            return false;
        }
        self.include_auto_generated || kind != CollectionKind::AutoGenerated
    }
}

pub fn plan_downloads(
    index: &CatalogIndex,
    resolution: &Resolution,
    config: &FilterConfig,
    ledger: &Ledger,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();

    for entry in index.items() {
        let Some(collection) = resolution
            .primary(&entry.item.id)
            .and_then(|idx| index.collection(idx))
        else {
            tracing::warn!(item = %entry.item.id, "Item has no primary collection, skipping");
            outcome.excluded += 1;
            continue;
        };

        if !config.collection_allowed(&collection.title, collection.kind) {
            tracing::trace!(item = %entry.item.id, collection = %collection.title, "Excluded");
            outcome.excluded += 1;
            continue;
        }
        if !config.download_videos && entry.item.kind == MediaKind::Video {
            outcome.skipped_videos += 1;
            continue;
        }

        let destination = local_download_path(
            &config.directory,
            &collection.title,
            &collection.id,
            &entry.item,
            config.size_capped,
        );
        if ledger.contains(&destination.key) {
            outcome.already_present += 1;
            continue;
        }
        outcome
            .tasks
            .push(DownloadTask::new(entry.item.clone(), collection, destination));
    }

    tracing::debug!(
        tasks = outcome.tasks.len(),
        already_present = outcome.already_present,
        excluded = outcome.excluded,
        skipped_videos = outcome.skipped_videos,
        "Filtered download plan"
    );
    outcome
}
