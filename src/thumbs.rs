//! Thumbnail cache: bounded LRU of decoded bitmaps.
//!
//! Keys embed the source file's mtime, so an edited file simply misses and
//! gets decoded again. Nothing is ever invalidated explicitly.
//!
//! One `ThumbCache` is created at startup and shared (via `Arc`) between the
//! control thread and the decode workers. Every read and write goes through a
//! single mutex: `get` reorders the recency list, so there is no read-only path.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use image::RgbaImage;
use log::debug;
use lru::LruCache;
use parking_lot::Mutex;

/// Default number of thumbnails kept in memory.
pub const DEFAULT_CAPACITY: usize = 500;

/// Decoded, scaled thumbnail. Cheap to clone.
pub type Bitmap = Arc<RgbaImage>;

/// Cache key: (absolute path, requested size, mtime).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThumbKey {
    pub path: PathBuf,
    pub size: u32,
    /// Nanoseconds since the epoch; 0 when the file could not be stat'ed.
    pub mtime_ns: u128,
}

/// Build the cache key for `path` at `size`.
///
/// An inaccessible file gets mtime 0, which never matches a real entry for a
/// readable file, so the lookup misses and the decode path reports the error.
pub fn make_key(path: &Path, size: u32) -> ThumbKey {
    ThumbKey {
        path: path.to_path_buf(),
        size,
        mtime_ns: mtime_ns(path),
    }
}

fn mtime_ns(path: &Path) -> u128 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// Thread-safe LRU of thumbnails.
pub struct ThumbCache {
    entries: Mutex<LruCache<ThumbKey, Bitmap>>,
}

impl ThumbCache {
    /// A capacity of 0 is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ThumbCache {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Look up a thumbnail, promoting it to most-recently-used on hit.
    pub fn get(&self, key: &ThumbKey) -> Option<Bitmap> {
        self.entries.lock().get(key).cloned()
    }

    /// Insert or replace. Inserting a new key into a full cache evicts
    /// exactly one entry, the least recently used.
    pub fn put(&self, key: ThumbKey, bitmap: Bitmap) {
        let mut entries = self.entries.lock();
        if let Some((old, _)) = entries.push(key.clone(), bitmap) {
            if old != key {
                debug!("thumb cache: evicted {} @{}", old.path.display(), old.size);
            }
        }
    }

    /// Membership test without touching recency.
    pub fn contains(&self, key: &ThumbKey) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for ThumbCache {
    fn default() -> Self {
        ThumbCache::new(DEFAULT_CAPACITY)
    }
}
