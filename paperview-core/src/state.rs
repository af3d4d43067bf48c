use serde::{Deserialize, Serialize};

pub const ZOOM_STEP: f32 = 0.25;
pub const MIN_ZOOM: f32 = 0.25;
pub const MAX_ZOOM: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoomMode {
    #[default]
    Custom,
    FitWidth,
    FitPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollPosition {
    pub x: f32,
    pub y: f32,
}

/// Single source of truth for the current page, zoom factor, zoom mode and
/// scroll offset. All setters are guarded: page numbers clamp to
/// `[1, page_count]` and no-op without a bound document; zoom clamps to
/// `[MIN_ZOOM, MAX_ZOOM]`.
#[derive(Debug, Clone)]
pub struct NavState {
    current_page: u32,
    zoom: f32,
    zoom_mode: ZoomMode,
    scroll: ScrollPosition,
    page_count: u32,
}

impl Default for NavState {
    fn default() -> Self {
        Self {
            current_page: 1,
            zoom: 1.0,
            zoom_mode: ZoomMode::Custom,
            scroll: ScrollPosition::default(),
            page_count: 0,
        }
    }
}

impl NavState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a document of `page_count` pages and rewinds to page 1.
    pub fn bind(&mut self, page_count: u32) {
        self.page_count = page_count;
        self.current_page = 1;
    }

    /// Back to defaults: page 1, zoom 1.0, custom mode, scroll origin.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn has_document(&self) -> bool {
        self.page_count > 0
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn zoom_mode(&self) -> ZoomMode {
        self.zoom_mode
    }

    pub fn scroll(&self) -> ScrollPosition {
        self.scroll
    }

    pub fn set_current_page(&mut self, page: u32) {
        if self.page_count == 0 {
            return;
        }
        self.current_page = page.clamp(1, self.page_count);
    }

    pub fn go_to_page(&mut self, page: u32) {
        self.set_current_page(page);
    }

    pub fn next_page(&mut self) {
        if self.page_count == 0 {
            return;
        }
        if self.current_page < self.page_count {
            self.current_page += 1;
        }
    }

    pub fn prev_page(&mut self) {
        if self.current_page > 1 {
            self.current_page -= 1;
        }
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        self.zoom_mode = ZoomMode::Custom;
    }

    pub fn zoom_in(&mut self) {
        self.zoom = (self.zoom + ZOOM_STEP).min(MAX_ZOOM);
        self.zoom_mode = ZoomMode::Custom;
    }

    pub fn zoom_out(&mut self) {
        self.zoom = (self.zoom - ZOOM_STEP).max(MIN_ZOOM);
        self.zoom_mode = ZoomMode::Custom;
    }

    /// Switches the mode only; the effective scale for fit modes is derived
    /// from the viewport at render time, never stored here.
    pub fn set_zoom_mode(&mut self, mode: ZoomMode) {
        self.zoom_mode = mode;
    }

    pub fn reset_zoom(&mut self) {
        self.zoom = 1.0;
        self.zoom_mode = ZoomMode::Custom;
    }

    pub fn set_scroll(&mut self, scroll: ScrollPosition) {
        self.scroll = scroll;
    }
}
