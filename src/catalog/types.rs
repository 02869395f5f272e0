use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Default file extension when the listing carries no format hint.
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Curated by the account owner.
    Manual,
    /// Created by the service itself (e.g. "Auto Upload").
    AutoGenerated,
    /// Synthetic bucket for items in no collection.
    Unsorted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: String,
    pub title: String,
    pub kind: CollectionKind,
    pub photo_count: Option<u64>,
    pub video_count: Option<u64>,
}

impl Collection {
    pub fn new(id: impl Into<String>, title: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            photo_count: None,
            video_count: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    pub title: String,
    pub kind: MediaKind,
    /// Original format reported by the listing ("jpg", "png", ...).
    pub format: Option<String>,
}

/// Formats the listing may report for still images.
const IMAGE_FORMATS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif",
];

impl MediaItem {
    /// File extension for the rendition that will be stored.
    ///
    /// Capped renditions are always JPEG, so a capped photo gets `jpg`
    /// whatever its original format. Videos never take an image extension.
    pub fn extension(&self, capped: bool) -> String {
        let hint = match self.format.as_deref().map(str::trim) {
            Some(f) if !f.is_empty() => Some(f.to_ascii_lowercase()),
            _ => None,
        };
        match (self.kind, hint) {
            (MediaKind::Photo, _) if capped => "jpg".to_string(),
            (MediaKind::Video, Some(f)) if IMAGE_FORMATS.contains(&f.as_str()) => {
                self.kind.default_extension().to_string()
            }
            (_, Some(f)) => f,
            (kind, None) => kind.default_extension().to_string(),
        }
    }
}

/// One downloadable rendition of a media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub url: String,
    /// Approximate size in bytes, when the API reports one.
    pub size: Option<u64>,
    pub media: MediaKind,
}

impl Variant {
    pub fn resolution(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn long_edge(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn is_original(&self) -> bool {
        self.label.to_ascii_lowercase().contains("original")
    }
}

/// One page of a paginated listing. Pages are 1-indexed.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub pages: u32,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.page >= self.pages || self.items.is_empty()
    }
}
