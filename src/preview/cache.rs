use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::orientation::AspectRatio;
use super::types::ImageId;

const DEFAULT_CAPACITY: usize = 64;

/// Identifies one cacheable unit of generation work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub image: ImageId,
    pub style_id: u32,
    pub aspect_ratio: AspectRatio,
}

impl Fingerprint {
    pub fn new(image: ImageId, style_id: u32, aspect_ratio: AspectRatio) -> Self {
        Self {
            image,
            style_id,
            aspect_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub preview_url: String,
    pub created_at: i64, // unix ms
}

impl CacheEntry {
    pub fn new(preview_url: impl Into<String>) -> Self {
        Self {
            preview_url: preview_url.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Session-lifetime store of finished previews, shared by every style card.
pub struct PreviewCache {
    inner: Mutex<LruCache<Fingerprint, CacheEntry>>,
}

impl Default for PreviewCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl PreviewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let mut guard = self.inner.lock().ok()?;
        guard.get(fingerprint).cloned()
    }

    /// Entries are immutable: an existing fingerprint keeps its first value.
    pub fn put(&self, fingerprint: Fingerprint, entry: CacheEntry) {
        let Ok(mut guard) = self.inner.lock() else {
            return;
        };
        if guard.contains(&fingerprint) {
            guard.promote(&fingerprint);
            return;
        }
        guard.put(fingerprint, entry);
    }

    /// Drops every entry generated from `image`. Returns how many were removed.
    pub fn invalidate_for_image(&self, image: &ImageId) -> usize {
        let Ok(mut guard) = self.inner.lock() else {
            return 0;
        };
        let stale: Vec<Fingerprint> = guard
            .iter()
            .filter(|(key, _)| &key.image == image)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            guard.pop(key);
        }
        debug!(image = %image, removed = stale.len(), "invalidated preview cache");
        stale.len()
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::types::SourceImage;

    fn key(image: &SourceImage, style_id: u32) -> Fingerprint {
        Fingerprint::new(image.id().clone(), style_id, AspectRatio::Square)
    }

    #[test]
    fn put_then_get_returns_entry() {
        let cache = PreviewCache::new();
        let photo = SourceImage::new("data:image/png;base64,AAAA");
        cache.put(key(&photo, 2), CacheEntry::new("https://cdn/2.png"));

        let hit = cache.get(&key(&photo, 2)).expect("cache hit");
        assert_eq!(hit.preview_url, "https://cdn/2.png");
        assert!(cache.get(&key(&photo, 3)).is_none());
    }

    #[test]
    fn aspect_ratio_is_part_of_the_key() {
        let cache = PreviewCache::new();
        let photo = SourceImage::new("photo");
        cache.put(key(&photo, 2), CacheEntry::new("square.png"));
        let landscape = Fingerprint::new(photo.id().clone(), 2, AspectRatio::Landscape);
        assert!(cache.get(&landscape).is_none());
    }

    #[test]
    fn entries_are_never_overwritten() {
        let cache = PreviewCache::new();
        let photo = SourceImage::new("photo");
        cache.put(key(&photo, 2), CacheEntry::new("first.png"));
        cache.put(key(&photo, 2), CacheEntry::new("second.png"));
        assert_eq!(
            cache.get(&key(&photo, 2)).map(|e| e.preview_url),
            Some("first.png".to_string())
        );
    }

    #[test]
    fn invalidation_only_touches_one_image() {
        let cache = PreviewCache::new();
        let old_photo = SourceImage::new("old");
        let other_photo = SourceImage::new("other");
        cache.put(key(&old_photo, 2), CacheEntry::new("a.png"));
        cache.put(key(&old_photo, 3), CacheEntry::new("b.png"));
        cache.put(key(&other_photo, 2), CacheEntry::new("c.png"));

        assert_eq!(cache.invalidate_for_image(old_photo.id()), 2);
        assert!(cache.get(&key(&old_photo, 2)).is_none());
        assert!(cache.get(&key(&other_photo, 2)).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = PreviewCache::with_capacity(2);
        let photo = SourceImage::new("photo");
        cache.put(key(&photo, 2), CacheEntry::new("2.png"));
        cache.put(key(&photo, 3), CacheEntry::new("3.png"));
        assert!(cache.get(&key(&photo, 2)).is_some());
        cache.put(key(&photo, 4), CacheEntry::new("4.png"));

        assert!(cache.get(&key(&photo, 3)).is_none());
        assert!(cache.get(&key(&photo, 2)).is_some());
        assert!(cache.get(&key(&photo, 4)).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
