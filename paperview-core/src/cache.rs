use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::session::DocumentSession;
use crate::{DocumentBackend, DocumentId, PageBackend};

pub const MIN_CACHE_CAPACITY: usize = 10;
pub const MAX_CACHE_CAPACITY: usize = 20;
pub const PREFETCH_RANGE: u32 = 3;

struct CacheEntry {
    handle: Arc<dyn PageBackend>,
    last_access: u64,
}

struct BoundDocument {
    id: DocumentId,
    page_count: u32,
    backend: Arc<dyn DocumentBackend>,
}

/// Bounded page store with least-recently-accessed eviction. The sole
/// long-lived holder of page handles; capacity is derived once per document
/// from its page count and stays fixed until the document changes.
pub struct PageCache {
    entries: HashMap<u32, CacheEntry>,
    capacity: usize,
    bound: Option<BoundDocument>,
    clock: u64,
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

fn capacity_for(page_count: u32) -> usize {
    ((page_count as f32 * 0.1).ceil() as usize).clamp(MIN_CACHE_CAPACITY, MAX_CACHE_CAPACITY)
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            capacity: MIN_CACHE_CAPACITY,
            bound: None,
            clock: 0,
        }
    }

    /// Rebinds the cache to a document. Binding the same session again is a
    /// no-op; a different one discards every entry and recomputes capacity.
    pub fn set_document(&mut self, session: Option<&DocumentSession>) {
        match (&self.bound, session) {
            (Some(bound), Some(session)) if bound.id == session.id => return,
            (None, None) => return,
            _ => {}
        }
        self.entries.clear();
        self.bound = session.map(|session| BoundDocument {
            id: session.id,
            page_count: session.page_count,
            backend: Arc::clone(&session.backend),
        });
        if let Some(bound) = &self.bound {
            self.capacity = capacity_for(bound.page_count);
            debug!(
                page_count = bound.page_count,
                capacity = self.capacity,
                "page cache rebound"
            );
        }
    }

    /// Returns the handle for `index` (1-based), fetching it from the
    /// backend on a miss. Absent when no document is bound, the index is out
    /// of range, or the backend fetch fails; a failed fetch leaves the cache
    /// untouched so the page stays in its "still loading" state.
    pub fn get_page(&mut self, index: u32) -> Option<Arc<dyn PageBackend>> {
        let bound = self.bound.as_ref()?;
        if index < 1 || index > bound.page_count {
            return None;
        }

        self.clock += 1;
        let now = self.clock;

        if let Some(entry) = self.entries.get_mut(&index) {
            entry.last_access = now;
            return Some(Arc::clone(&entry.handle));
        }

        let handle = match bound.backend.page(index) {
            Ok(handle) => handle,
            Err(err) => {
                debug!(page = index, %err, "page fetch failed");
                return None;
            }
        };

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            index,
            CacheEntry {
                handle: Arc::clone(&handle),
                last_access: now,
            },
        );
        Some(handle)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(index, _)| *index);
        if let Some(index) = oldest {
            self.entries.remove(&index);
        }
    }

    /// Warms the cache for the given pages, skipping anything already held.
    pub fn prefetch(&mut self, pages: &[u32]) {
        for &page in pages {
            if !self.entries.contains_key(&page) {
                let _ = self.get_page(page);
            }
        }
    }

    /// Warms pages around `center`, forward-biased: up to `PREFETCH_RANGE`
    /// pages ahead are requested before `PREFETCH_RANGE - 1` pages behind,
    /// since forward scrolling is the likely direction.
    pub fn prefetch_around(&mut self, center: u32) {
        let Some(bound) = self.bound.as_ref() else {
            return;
        };
        let page_count = bound.page_count;

        let mut pages = Vec::new();
        for offset in 1..=PREFETCH_RANGE {
            let ahead = center + offset;
            if ahead <= page_count {
                pages.push(ahead);
            }
        }
        for offset in 1..PREFETCH_RANGE {
            if let Some(behind) = center.checked_sub(offset) {
                if behind >= 1 {
                    pages.push(behind);
                }
            }
        }
        self.prefetch(&pages);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, index: u32) -> bool {
        self.entries.contains_key(&index)
    }
}
