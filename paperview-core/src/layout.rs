use crate::cache::PageCache;
use crate::session::DocumentSession;
use crate::PageSize;

/// Vertical gap between consecutive pages, in layout units.
pub const PAGE_GAP: f32 = 16.0;

/// Computed vertical position of one page at the current zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutEntry {
    pub page_index: u32,
    pub top_offset: f32,
    pub scaled_height: f32,
}

/// Flat ordered layout of every page in the document. Depends only on
/// intrinsic page sizes and the zoom factor, so it is rebuilt wholesale on
/// zoom or document changes and never patched when the cache evicts pages.
#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    entries: Vec<LayoutEntry>,
    total_height: f32,
    first_page_size: Option<PageSize>,
}

impl PageLayout {
    /// Builds the full layout, fetching intrinsic sizes through the cache.
    /// A page whose fetch fails is left out; it picks up a slot on the next
    /// rebuild once the backend recovers.
    pub fn build(cache: &mut PageCache, session: &DocumentSession, zoom: f32) -> Self {
        let mut entries = Vec::with_capacity(session.page_count as usize);
        let mut top = 0.0f32;
        let mut first_page_size = None;

        for index in 1..=session.page_count {
            let Some(handle) = cache.get_page(index) else {
                continue;
            };
            let size = handle.size();
            if first_page_size.is_none() {
                first_page_size = Some(size);
            }
            let scaled_height = size.height * zoom;
            entries.push(LayoutEntry {
                page_index: index,
                top_offset: top,
                scaled_height,
            });
            top += scaled_height + PAGE_GAP;
        }

        Self {
            entries,
            total_height: top,
            first_page_size,
        }
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Total scrollable height, trailing gap included.
    pub fn total_height(&self) -> f32 {
        self.total_height
    }

    pub fn first_page_size(&self) -> Option<PageSize> {
        self.first_page_size
    }

    pub fn entry_for(&self, page_index: u32) -> Option<&LayoutEntry> {
        self.entries
            .iter()
            .find(|entry| entry.page_index == page_index)
    }
}
