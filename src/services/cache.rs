use crate::models::PageResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Per-document memoization of normalized page results.
///
/// Keyed by page number. Every [`invalidate_all`](Self::invalidate_all) starts a new
/// *epoch*; writers that captured an older epoch (a scan still finishing a page of the
/// previous document) are refused by [`put_if_current`](Self::put_if_current), so results
/// never leak across documents.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<u32, Arc<PageResult>>>,
    epoch: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current document epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn get(&self, page: u32) -> Option<Arc<PageResult>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&page)
            .cloned()
    }

    pub fn put(&self, page: u32, result: Arc<PageResult>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page, result);
    }

    /// Store `result` only if no invalidation happened since `epoch` was read.
    pub fn put_if_current(&self, epoch: u64, page: u32, result: Arc<PageResult>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // invalidate_all bumps the epoch while holding the write lock
        if self.epoch.load(Ordering::Acquire) != epoch {
            tracing::debug!("Dropping page {} result from stale epoch {}", page, epoch);
            return false;
        }
        entries.insert(page, result);
        true
    }

    /// Drop every entry and start a new epoch.
    pub fn invalidate_all(&self) -> u64 {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let dropped = entries.len();
        entries.clear();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!("Result cache invalidated ({} pages dropped, epoch {})", dropped, epoch);
        epoch
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedLine, Rect};

    fn result(page: u32, text: &str) -> Arc<PageResult> {
        Arc::new(PageResult::new(
            page,
            vec![NormalizedLine {
                text: text.to_string(),
                confidence: 0.9,
                rect: Rect { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
            }],
        ))
    }

    #[test]
    fn test_get_put() {
        let cache = ResultCache::new();
        assert!(cache.get(1).is_none());

        cache.put(1, result(1, "a"));
        assert_eq!(cache.get(1).unwrap().lines[0].text, "a");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_all_clears_and_bumps_epoch() {
        let cache = ResultCache::new();
        cache.put(1, result(1, "a"));
        cache.put(2, result(2, "b"));
        let before = cache.epoch();

        let after = cache.invalidate_all();

        assert!(cache.is_empty());
        assert_eq!(after, before + 1);
        assert_eq!(cache.epoch(), after);
    }

    #[test]
    fn test_stale_epoch_write_is_refused() {
        let cache = ResultCache::new();
        let old_epoch = cache.epoch();
        cache.invalidate_all();

        assert!(!cache.put_if_current(old_epoch, 1, result(1, "stale")));
        assert!(cache.get(1).is_none());

        assert!(cache.put_if_current(cache.epoch(), 1, result(1, "fresh")));
        assert_eq!(cache.get(1).unwrap().lines[0].text, "fresh");
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let cache = Arc::new(ResultCache::new());
        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for page in 1..=200 {
                    cache.put(page, result(page, "w"));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for page in 1..=200 {
                        if let Some(hit) = cache.get(page) {
                            assert_eq!(hit.page, page);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cache.len(), 200);
    }
}
