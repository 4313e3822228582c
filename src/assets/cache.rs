use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use xxhash_rust::xxh3::Xxh3;

use crate::assets::decode::PixelBuffer;
use crate::foundation::core::CanvasSize;

const XXH3_SEED: u64 = 0x5f3c_9a1e_d2b4_7c61;

/// Asset identity plus the resolution it was decoded at.
///
/// Identity hashes the path together with file length and modification time, so a file
/// rewritten in place gets a fresh entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    asset: u64,
    resolution: Option<(u32, u32)>,
}

impl CacheKey {
    pub fn for_file(path: &Path, meta: Option<&std::fs::Metadata>, target: Option<CanvasSize>) -> Self {
        let mut h = Xxh3::with_seed(XXH3_SEED);
        h.update(path.as_os_str().as_encoded_bytes());
        if let Some(meta) = meta {
            h.update(&meta.len().to_le_bytes());
            if let Ok(modified) = meta.modified()
                && let Ok(since) = modified.duration_since(std::time::UNIX_EPOCH)
            {
                h.update(&since.as_nanos().to_le_bytes());
            }
        }
        Self {
            asset: h.digest(),
            resolution: target.map(|t| (t.width, t.height)),
        }
    }
}

/// Counters reported by [`DecodeCache::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Decodes too large for the budget, returned without being retained.
    pub uncached: u64,
    pub entries: usize,
    pub retained_bytes: usize,
}

struct CacheInner {
    entries: HashMap<CacheKey, Arc<PixelBuffer>>,
    lru: VecDeque<CacheKey>,
    retained_bytes: usize,
    stats: CacheStats,
}

impl CacheInner {
    fn touch(&mut self, key: CacheKey) {
        if let Some(pos) = self.lru.iter().position(|k| *k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key);
    }

    fn evict_until_fits(&mut self, incoming: usize, budget: usize) {
        while self.retained_bytes.saturating_add(incoming) > budget {
            let Some(old) = self.lru.pop_front() else {
                break;
            };
            if let Some(buf) = self.entries.remove(&old) {
                // Renders holding a clone of `buf` keep it alive; only our reference goes.
                self.retained_bytes = self.retained_bytes.saturating_sub(buf.byte_len());
                self.stats.evictions += 1;
            }
        }
    }
}

/// Bounded LRU of decoded buffers, shared by every render an engine runs.
///
/// Lookups and inserts take a short internal lock; decoding happens outside it.
pub struct DecodeCache {
    budget_bytes: usize,
    inner: Mutex<CacheInner>,
}

impl DecodeCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                lru: VecDeque::new(),
                retained_bytes: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn get(&self, key: CacheKey) -> Option<Arc<PixelBuffer>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let hit = inner.entries.get(&key).cloned();
        if hit.is_some() {
            inner.stats.hits += 1;
            inner.touch(key);
        }
        hit
    }

    /// Return the cached buffer for `key`, decoding with `decode` on a miss.
    pub fn get_or_try_insert<E>(
        &self,
        key: CacheKey,
        decode: impl FnOnce() -> Result<PixelBuffer, E>,
    ) -> Result<Arc<PixelBuffer>, E> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }

        let buf = Arc::new(decode()?);

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.stats.misses += 1;
        if let Some(existing) = inner.entries.get(&key).cloned() {
            // Another render decoded the same asset while we were decoding.
            inner.touch(key);
            return Ok(existing);
        }

        let bytes = buf.byte_len();
        if bytes > self.budget_bytes {
            inner.stats.uncached += 1;
            return Ok(buf);
        }
        inner.evict_until_fits(bytes, self.budget_bytes);
        inner.entries.insert(key, Arc::clone(&buf));
        inner.touch(key);
        inner.retained_bytes += bytes;
        Ok(buf)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: inner.entries.len(),
            retained_bytes: inner.retained_bytes,
            ..inner.stats
        }
    }

    /// Drop every retained buffer. Buffers still borrowed by renders stay valid.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.clear();
        inner.lru.clear();
        inner.retained_bytes = 0;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/assets/cache.rs"]
mod tests;
