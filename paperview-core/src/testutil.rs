//! Shared fakes for exercising the viewer core without a real PDF backend.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::PageCache;
use crate::layout::PageLayout;
use crate::session::DocumentSession;
use crate::{
    document_id_for_path, CancelToken, DocumentBackend, DocumentProvider, OpenError, PageBackend,
    PageSize, RenderError, RenderImage,
};

pub(crate) struct FakePage {
    size: PageSize,
    index: u32,
    closed: Arc<AtomicBool>,
}

impl PageBackend for FakePage {
    fn size(&self) -> PageSize {
        self.size
    }

    fn render(&self, _scale: f32, cancel: &CancelToken) -> Result<RenderImage, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        if self.closed.load(Ordering::Relaxed) {
            return Err(RenderError::SessionClosed);
        }
        Ok(RenderImage {
            width: 1,
            height: 1,
            pixels: vec![self.index as u8, 0, 0, 255],
        })
    }
}

pub(crate) struct FakeDocument {
    heights: Vec<f32>,
    closed: Arc<AtomicBool>,
}

impl FakeDocument {
    pub(crate) fn new(heights: Vec<f32>) -> Self {
        Self {
            heights,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl DocumentBackend for FakeDocument {
    fn page_count(&self) -> u32 {
        self.heights.len() as u32
    }

    fn page(&self, index: u32) -> Result<Arc<dyn PageBackend>, RenderError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(RenderError::SessionClosed);
        }
        let height = self
            .heights
            .get((index - 1) as usize)
            .copied()
            .ok_or_else(|| RenderError::Backend(format!("page {index} out of range")))?;
        Ok(Arc::new(FakePage {
            size: PageSize {
                width: 612.0,
                height,
            },
            index,
            closed: Arc::clone(&self.closed),
        }))
    }

    fn release(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

pub(crate) fn fake_session(heights: Vec<f32>, name: &str) -> DocumentSession {
    let backend = Arc::new(FakeDocument::new(heights));
    let path = PathBuf::from(format!("/tmp/{name}"));
    DocumentSession {
        id: document_id_for_path(&path),
        path,
        page_count: backend.page_count(),
        backend,
    }
}

/// Binds a fresh cache to the session and builds its layout at `zoom`.
pub(crate) fn bind_session(session: &DocumentSession, zoom: f32) -> (PageCache, PageLayout) {
    let mut cache = PageCache::new();
    cache.set_document(Some(session));
    let layout = PageLayout::build(&mut cache, session, zoom);
    (cache, layout)
}

/// Provider that decodes every byte payload into a fixed-height fake
/// document, or fails with a configured error. Keeps the backends it issued
/// so tests can assert on release order.
pub(crate) struct FakeProvider {
    heights: Vec<f32>,
    fail_with: Mutex<Option<OpenError>>,
    opened: Mutex<Vec<Arc<FakeDocument>>>,
}

impl FakeProvider {
    pub(crate) fn new(heights: Vec<f32>) -> Self {
        Self {
            heights,
            fail_with: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail_next(&self, error: OpenError) {
        *self.fail_with.lock() = Some(error);
    }

    pub(crate) fn opened(&self) -> Vec<Arc<FakeDocument>> {
        self.opened.lock().clone()
    }
}

#[async_trait::async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(
        &self,
        _bytes: Vec<u8>,
        _path: &Path,
    ) -> Result<Arc<dyn DocumentBackend>, OpenError> {
        if let Some(error) = self.fail_with.lock().take() {
            return Err(error);
        }
        let backend = Arc::new(FakeDocument::new(self.heights.clone()));
        self.opened.lock().push(Arc::clone(&backend));
        Ok(backend)
    }
}
