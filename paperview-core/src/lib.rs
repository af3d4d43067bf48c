use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use uuid::Uuid;

pub mod cache;
pub mod error;
pub mod layout;
pub mod persist;
pub mod recent;
pub mod session;
pub mod state;
#[cfg(test)]
pub(crate) mod testutil;
pub mod viewport;

pub use cache::PageCache;
pub use error::{OpenError, RenderError};
pub use layout::{LayoutEntry, PageLayout, PAGE_GAP};
pub use persist::{
    FilePositionStore, MemoryPositionStore, PositionStore, SavedPosition, WindowGeometry,
};
pub use recent::{RecentFile, RecentFiles};
pub use session::{Command, DocumentSession, Session};
pub use state::{NavState, ScrollPosition, ZoomMode};
pub use viewport::{ViewportController, VisibleRange};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f8a1c42-6e0b-5d11-9b7a-2d4c90aa51e7").expect("valid namespace UUID")
});

/// Stable identifier for a document, derived from its canonicalized path.
/// Keys the persisted per-document state across runs.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, rendered.as_bytes())
}

/// Intrinsic page dimensions in points, at scale 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Cooperative cancellation for in-flight renders. A superseded render
/// observes the token and exits with `RenderError::Cancelled`, which is
/// not a failure.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One decoded page, renderable at any scale. Handles become invalid once
/// their owning session is released; rendering after that reports
/// `RenderError::SessionClosed` rather than touching freed backend state.
pub trait PageBackend: Send + Sync {
    fn size(&self) -> PageSize;
    fn render(&self, scale: f32, cancel: &CancelToken) -> Result<RenderImage, RenderError>;
}

/// A decoded document. Pages are fetched by 1-based index.
pub trait DocumentBackend: Send + Sync {
    fn page_count(&self) -> u32;
    fn page(&self, index: u32) -> Result<Arc<dyn PageBackend>, RenderError>;
    /// Releases backend resources and invalidates all outstanding page
    /// handles issued by this document.
    fn release(&self);
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Decodes raw bytes into a document. The path is an identifier only;
    /// the bytes have already been acquired.
    async fn open(&self, bytes: Vec<u8>, path: &Path) -> Result<Arc<dyn DocumentBackend>, OpenError>;
}
