//! Variant selection.

use crate::catalog::{MediaItem, Variant};

/// Chooses which rendition of an item to download.
pub trait VariantPolicy: Send + Sync {
    fn select<'a>(&self, item: &MediaItem, variants: &'a [Variant]) -> Option<&'a Variant>;
}

/// Highest resolution of the item's own media kind, optionally capped on
/// the long edge. Ties go to the original rendition, then the larger size.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestQuality {
    pub max_edge: Option<u32>,
}

impl HighestQuality {
    pub fn new(max_edge: Option<u32>) -> Self {
        Self { max_edge }
    }

    fn within_cap(&self, variant: &Variant) -> bool {
        match self.max_edge {
            None => true,
            // Unknown dimensions can't be checked against a cap.
            Some(cap) => variant.has_dimensions() && variant.long_edge() <= cap,
        }
    }
}

impl VariantPolicy for HighestQuality {
    fn select<'a>(&self, item: &MediaItem, variants: &'a [Variant]) -> Option<&'a Variant> {
        variants
            .iter()
            .filter(|v| v.media == item.kind && self.within_cap(v))
            .max_by_key(|v| (v.resolution(), v.is_original(), v.size.unwrap_or(0)))
    }
}
