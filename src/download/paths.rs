use std::path::{Path, PathBuf};

use crate::catalog::MediaItem;

/// Where a task writes its file, and the ledger key for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub path: PathBuf,
    /// Path relative to the download root, always `/`-separated.
    pub key: String,
}

/// Longest file name most filesystems accept, in bytes.
const MAX_NAME_BYTES: usize = 255;

/// Suffix of the temp file; the final name must leave room for it.
const PART_SUFFIX: &str = ".part";

/// Build the destination for an item stored under its primary collection:
/// `<root>/<collection>/<title>_<id>.<ext>`.
///
/// The item id in the file name keeps destinations unique even when two
/// items share a title. Long titles are shortened so the `.part` name
/// still fits in one path component. `capped` is set when renditions are
/// limited by a size cap.
pub fn local_download_path(
    directory: &Path,
    collection_title: &str,
    collection_id: &str,
    item: &MediaItem,
    capped: bool,
) -> Destination {
    let folder = match clean_filename(truncate_utf8(collection_title, MAX_NAME_BYTES)) {
        f if f.is_empty() => clean_filename(collection_id),
        f => f,
    };
    let id = clean_filename(&item.id);
    let ext = clean_filename(&item.extension(capped));

    // `<title>_<id>.<ext>.part`
    let reserved = 1 + id.len() + 1 + ext.len() + PART_SUFFIX.len();
    let title = clean_filename(&item.title);
    let title = clean_filename(truncate_utf8(&title, MAX_NAME_BYTES.saturating_sub(reserved)));
    let stem = if title.is_empty() { id } else { format!("{title}_{id}") };
    let file_name = format!("{stem}.{ext}");

    Destination {
        path: directory.join(&folder).join(&file_name),
        key: format!("{folder}/{file_name}"),
    }
}

/// Clean a path component by removing characters that are invalid on
/// common filesystems (`/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|`) and
/// control characters, then trimming surrounding spaces and trailing dots.
pub fn clean_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();
    cleaned.trim().trim_end_matches('.').trim_end().to_string()
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a char.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let end = s
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= max_bytes)
        .last()
        .unwrap_or(0);
    &s[..end]
}

/// Sibling temp path the download is streamed into before the rename.
pub fn part_path(download_path: &Path) -> PathBuf {
    let mut name = download_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    download_path.with_file_name(name)
}
