use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

use paperview_core::{
    CancelToken, DocumentBackend, DocumentProvider, OpenError, PageBackend, PageSize, RenderError,
    RenderImage,
};

/// Binds the pdfium library once and decodes documents from memory.
pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    #[instrument(skip(self, bytes), fields(path = %path.display(), len = bytes.len()))]
    async fn open(
        &self,
        bytes: Vec<u8>,
        path: &Path,
    ) -> Result<Arc<dyn DocumentBackend>, OpenError> {
        let inner = DocInner::open(Arc::clone(&self.pdfium), bytes)?;
        let page_count = inner.page_count()?;
        debug!(page_count, "decoded document");
        Ok(Arc::new(PdfiumDocument {
            inner: Arc::new(inner),
            page_count,
        }))
    }
}

/// The decoded document plus the bindings it borrows. `document` is
/// declared first so it drops before `pdfium`, keeping the transmuted
/// `'static` lifetime honest.
struct DocInner {
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
    closed: AtomicBool,
}

impl DocInner {
    fn open(pdfium: Arc<Pdfium>, bytes: Vec<u8>) -> Result<Self, OpenError> {
        let document = pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .map_err(classify_open_error)?;
        // SAFETY: the PdfDocument borrows the Pdfium bindings owned by the
        // `pdfium` field of the same struct. `document` is declared before
        // `pdfium` and therefore drops first, so the borrow never outlives
        // the bindings.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(Self {
            document: Mutex::new(Some(document)),
            pdfium,
            closed: AtomicBool::new(false),
        })
    }

    fn page_count(&self) -> Result<u32, OpenError> {
        let guard = self.document.lock();
        let document = guard
            .as_ref()
            .ok_or_else(|| OpenError::Unknown("document already released".into()))?;
        Ok(u32::from(document.pages().len()))
    }

    fn with_document<R, F>(&self, f: F) -> Result<R, RenderError>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R, RenderError>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(RenderError::SessionClosed);
        }
        let guard = self.document.lock();
        match guard.as_ref() {
            Some(document) => f(document),
            None => Err(RenderError::SessionClosed),
        }
    }

    fn release(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the document frees pdfium's native handles; any page
        // handle still held elsewhere now fails with SessionClosed.
        self.document.lock().take();
    }
}

struct PdfiumDocument {
    inner: Arc<DocInner>,
    page_count: u32,
}

impl DocumentBackend for PdfiumDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page(&self, index: u32) -> Result<Arc<dyn PageBackend>, RenderError> {
        if index == 0 || index > self.page_count {
            return Err(RenderError::Backend(format!("page {index} out of range")));
        }
        let size = self.inner.with_document(|document| {
            let page = document
                .pages()
                .get((index - 1) as PdfPageIndex)
                .map_err(|err| RenderError::Backend(format!("page {index}: {err:?}")))?;
            Ok(PageSize {
                width: page.width().value,
                height: page.height().value,
            })
        })?;
        Ok(Arc::new(PdfiumPage {
            inner: Arc::clone(&self.inner),
            index,
            size,
        }))
    }

    fn release(&self) {
        self.inner.release();
    }
}

/// Page handle valid for the lifetime of its document session. Looks the
/// page up by index on every render, so it never holds a native page
/// reference across calls.
struct PdfiumPage {
    inner: Arc<DocInner>,
    index: u32,
    size: PageSize,
}

impl PageBackend for PdfiumPage {
    fn size(&self) -> PageSize {
        self.size
    }

    #[instrument(skip(self, cancel), fields(page = self.index))]
    fn render(&self, scale: f32, cancel: &CancelToken) -> Result<RenderImage, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let index = self.index;
        self.inner.with_document(|document| {
            let page = document
                .pages()
                .get((index - 1) as PdfPageIndex)
                .map_err(|err| RenderError::Backend(format!("page {index}: {err:?}")))?;

            let config = PdfRenderConfig::new().scale_page_by_factor(scale.max(0.1));
            let bitmap = page
                .render_with_config(&config)
                .map_err(|err| RenderError::Backend(format!("render page {index}: {err:?}")))?;

            if cancel.is_cancelled() {
                return Err(RenderError::Cancelled);
            }

            Ok(RenderImage {
                width: u32::try_from(bitmap.width()).unwrap_or_default(),
                height: u32::try_from(bitmap.height()).unwrap_or_default(),
                pixels: bitmap.as_rgba_bytes(),
            })
        })
    }
}

fn classify_open_error(err: PdfiumError) -> OpenError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(internal) => match internal {
            PdfiumInternalError::PasswordError | PdfiumInternalError::SecurityError => {
                OpenError::Corrupt("document is password protected".into())
            }
            PdfiumInternalError::FormatError => OpenError::InvalidFormat,
            other => OpenError::Corrupt(format!("{other:?}")),
        },
        other => OpenError::Unknown(format!("{other:?}")),
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match std::env::var("PAPERVIEW_PDFIUM_LIBRARY_PATH") {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load pdfium from {}: {}", path, err);
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}
