use std::time::{Duration, Instant};

use tracing::trace;

use crate::cache::PageCache;
use crate::layout::PageLayout;
use crate::state::{NavState, ScrollPosition, ZoomMode};

/// Extra layout entries materialized on each side of the visible span.
pub const RENDER_BUFFER: usize = 2;

/// How long after a programmatic scroll the controller keeps treating
/// incoming scroll events as its own echo rather than user input.
pub const SCROLL_SETTLE: Duration = Duration::from_millis(100);

/// Horizontal margin subtracted from the container when fitting page width.
const FIT_MARGIN: f32 = 40.0;

/// Contiguous span of layout indices currently materialized, buffer
/// included. Indices into the layout entry slice, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleRange {
    pub start: usize,
    pub end: usize,
}

/// Owns the scrollable surface: turns scroll offset plus viewport size into
/// a visible page range, keeps the cache warm for it, and reconciles the
/// current-page indicator with user scrolling in one direction and explicit
/// navigation in the other.
///
/// The two reconciliation paths must never both fire for one logical
/// change. A scroll-derived page update arms a one-shot flag that swallows
/// the next reciprocal scroll-to-page; an explicit jump opens a short
/// settle window during which scroll events are not read as user input.
#[derive(Debug)]
pub struct ViewportController {
    container_width: f32,
    viewport_height: f32,
    scroll_offset: f32,
    visible: Option<VisibleRange>,
    programmatic_until: Option<Instant>,
    scroll_derived: bool,
}

impl Default for ViewportController {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewportController {
    pub fn new() -> Self {
        Self {
            container_width: 0.0,
            viewport_height: 0.0,
            scroll_offset: 0.0,
            visible: None,
            programmatic_until: None,
            scroll_derived: false,
        }
    }

    /// Clears per-document state. The container dimensions describe the
    /// host window, not the document, and survive a reset.
    pub fn reset(&mut self) {
        self.scroll_offset = 0.0;
        self.visible = None;
        self.programmatic_until = None;
        self.scroll_derived = false;
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.container_width = width.max(0.0);
        self.viewport_height = height.max(0.0);
    }

    pub fn viewport_height(&self) -> f32 {
        self.viewport_height
    }

    pub fn scroll_offset(&self) -> f32 {
        self.scroll_offset
    }

    pub fn visible_range(&self) -> Option<VisibleRange> {
        self.visible
    }

    pub fn is_programmatic_scroll(&self) -> bool {
        self.programmatic_until
            .map_or(false, |until| Instant::now() < until)
    }

    /// Processes a scroll offset change. Recomputes the visible range,
    /// materializes it through the cache with a forward-biased prefetch,
    /// and, outside the programmatic settle window, feeds the page with the
    /// greatest viewport overlap back into the navigation state.
    pub fn handle_scroll(
        &mut self,
        offset: f32,
        layout: &PageLayout,
        cache: &mut PageCache,
        nav: &mut NavState,
    ) {
        self.scroll_offset = offset.max(0.0);
        let visible = compute_visible_range(layout, self.scroll_offset, self.viewport_height);
        self.visible = visible;

        if let Some(range) = visible {
            let entries = layout.entries();
            for entry in &entries[range.start..=range.end] {
                let _ = cache.get_page(entry.page_index);
            }
            cache.prefetch_around(entries[range.start].page_index);
        }

        if !self.is_programmatic_scroll() {
            if let Some(page) =
                page_with_greatest_overlap(layout, self.scroll_offset, self.viewport_height)
            {
                if page != nav.current_page() {
                    trace!(page, "scroll-derived current page");
                    self.scroll_derived = true;
                    nav.set_current_page(page);
                }
            }
        }

        nav.set_scroll(ScrollPosition {
            x: nav.scroll().x,
            y: self.scroll_offset,
        });
    }

    /// Reciprocal half of the feedback loop: aligns the scroll offset with
    /// the current page after an explicit navigation change. Returns the new
    /// offset, or `None` when the change was itself scroll-derived (the
    /// one-shot flag is consumed and no scroll fires).
    pub fn scroll_to_page(&mut self, page: u32, layout: &PageLayout) -> Option<f32> {
        if self.scroll_derived {
            self.scroll_derived = false;
            return None;
        }
        let entry = layout.entry_for(page)?;
        self.programmatic_until = Some(Instant::now() + SCROLL_SETTLE);
        self.scroll_offset = entry.top_offset;
        Some(entry.top_offset)
    }

    /// Scale actually handed to the renderer. Fit modes derive it from the
    /// viewport and the first page's intrinsic size; custom mode passes the
    /// numeric zoom through.
    pub fn effective_scale(&self, nav: &NavState, layout: &PageLayout) -> f32 {
        let Some(size) = layout.first_page_size() else {
            return nav.zoom();
        };
        match nav.zoom_mode() {
            ZoomMode::Custom => nav.zoom(),
            ZoomMode::FitWidth => fit_scale(self.container_width - FIT_MARGIN, size.width),
            ZoomMode::FitPage => {
                let by_width = fit_scale(self.container_width - FIT_MARGIN, size.width);
                let by_height = fit_scale(self.viewport_height - FIT_MARGIN, size.height);
                by_width.min(by_height)
            }
        }
    }
}

fn fit_scale(available: f32, intrinsic: f32) -> f32 {
    if available <= 0.0 || intrinsic <= 0.0 {
        1.0
    } else {
        available / intrinsic
    }
}

/// Scans the layout for the span intersecting `[offset, offset + height]`,
/// expanded by `RENDER_BUFFER` entries on each side.
pub fn compute_visible_range(
    layout: &PageLayout,
    offset: f32,
    height: f32,
) -> Option<VisibleRange> {
    let entries = layout.entries();
    if entries.is_empty() {
        return None;
    }

    let mut start = 0;
    let mut end = entries.len() - 1;

    for (index, entry) in entries.iter().enumerate() {
        if entry.top_offset + entry.scaled_height >= offset {
            start = index.saturating_sub(RENDER_BUFFER);
            break;
        }
    }

    for (index, entry) in entries.iter().enumerate().skip(start) {
        if entry.top_offset > offset + height {
            end = (index + RENDER_BUFFER).min(entries.len() - 1);
            break;
        }
    }

    Some(VisibleRange { start, end })
}

/// The page occupying the largest share of the visible span. Ties go to the
/// earlier page in document order.
pub fn page_with_greatest_overlap(layout: &PageLayout, offset: f32, height: f32) -> Option<u32> {
    let entries = layout.entries();
    if entries.is_empty() || height <= 0.0 {
        return None;
    }

    let mut best_page = entries[0].page_index;
    let mut best_area = 0.0f32;

    for entry in entries {
        let top = entry.top_offset;
        let bottom = top + entry.scaled_height;
        let visible_top = top.max(offset);
        let visible_bottom = bottom.min(offset + height);
        let area = (visible_bottom - visible_top).max(0.0);
        if area > best_area {
            best_area = area;
            best_page = entry.page_index;
        }
    }

    Some(best_page)
}
