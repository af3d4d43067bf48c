use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::cache::PageCache;
use crate::error::{check_signature, OpenError};
use crate::layout::{LayoutEntry, PageLayout};
use crate::persist::{unix_timestamp_ms, PositionStore, SavedPosition};
use crate::recent::RecentFiles;
use crate::state::{NavState, ScrollPosition, ZoomMode};
use crate::viewport::ViewportController;
use crate::{document_id_for_path, DocumentBackend, DocumentId, DocumentProvider, PageBackend};

/// Live handle to one decoded document. Exactly one exists at a time; the
/// owning `Session` releases the backend on close or replacement and no
/// other component may.
pub struct DocumentSession {
    pub id: DocumentId,
    pub path: PathBuf,
    pub page_count: u32,
    pub backend: Arc<dyn DocumentBackend>,
}

#[derive(Debug, Clone)]
pub enum Command {
    NextPage,
    PrevPage,
    GotoPage { page: u32 },
    FirstPage,
    LastPage,
    ZoomIn,
    ZoomOut,
    ResetZoom,
    SetZoom { factor: f32 },
    SetZoomMode { mode: ZoomMode },
    ScrollBy { delta: f32 },
    ScrollTo { offset: f32 },
    CloseDocument,
}

/// Orchestrates the viewer: document lifecycle, navigation state, layout,
/// viewport and cache, plus the persisted reading positions and recent
/// files around them.
pub struct Session {
    document: Option<DocumentSession>,
    nav: NavState,
    cache: PageCache,
    layout: PageLayout,
    viewport: ViewportController,
    recent: RecentFiles,
    recent_path: Option<PathBuf>,
    positions: Arc<dyn PositionStore>,
    error: Option<OpenError>,
}

impl Session {
    pub fn new(
        positions: Arc<dyn PositionStore>,
        recent: RecentFiles,
        recent_path: Option<PathBuf>,
    ) -> Self {
        Self {
            document: None,
            nav: NavState::new(),
            cache: PageCache::new(),
            layout: PageLayout::default(),
            viewport: ViewportController::new(),
            recent,
            recent_path,
            positions,
            error: None,
        }
    }

    pub fn document(&self) -> Option<&DocumentSession> {
        self.document.as_ref()
    }

    pub fn nav(&self) -> &NavState {
        &self.nav
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn recent_files(&self) -> &RecentFiles {
        &self.recent
    }

    pub fn error(&self) -> Option<&OpenError> {
        self.error.as_ref()
    }

    /// Dismisses the current error, returning to whatever was shown before.
    /// An error during open never replaced the previous document, so there
    /// is nothing else to undo.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Decodes `bytes` and installs the result as the live document. On any
    /// failure the previous document, navigation state and layout are left
    /// exactly as they were.
    #[instrument(skip(self, provider, bytes), fields(path = %path.display()))]
    pub async fn open_from_bytes<P: DocumentProvider>(
        &mut self,
        provider: &P,
        bytes: Vec<u8>,
        path: PathBuf,
    ) -> Result<(), OpenError> {
        if let Err(error) = check_signature(&bytes) {
            return Err(self.record_error(error));
        }

        let backend = match provider.open(bytes, &path).await {
            Ok(backend) => backend,
            Err(error) => return Err(self.record_error(error)),
        };

        let session = DocumentSession {
            id: document_id_for_path(&path),
            path: path.clone(),
            page_count: backend.page_count(),
            backend,
        };
        info!(page_count = session.page_count, "document opened");

        self.install(session);
        self.error = None;
        self.recent.add(&path, unix_timestamp_ms());
        self.persist_recent();

        match self.positions.get(&path) {
            Ok(Some(saved)) => {
                self.nav.set_zoom(saved.zoom);
                self.rebuild_layout();
                self.nav.go_to_page(saved.page);
                self.align_scroll_with_page();
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "failed to look up saved reading position"),
        }

        Ok(())
    }

    /// Re-opens a remembered file from disk. A missing file surfaces
    /// `NotFound` and is dropped from the recent list as a corrective side
    /// effect.
    pub async fn open_path<P: DocumentProvider>(
        &mut self,
        provider: &P,
        path: PathBuf,
    ) -> Result<(), OpenError> {
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.recent.remove(&path);
                self.persist_recent();
                return Err(self.record_error(OpenError::NotFound(path)));
            }
            Err(err) => return Err(self.record_error(OpenError::Unknown(err.to_string()))),
        };
        self.open_from_bytes(provider, bytes, path).await
    }

    /// Closes the live document: persists its reading position, releases
    /// the backend, and resets navigation state to defaults.
    #[instrument(skip(self))]
    pub fn close(&mut self) {
        if let Some(session) = self.document.take() {
            self.stash_position(&session);
            session.backend.release();
            info!(path = %session.path.display(), "document closed");
        }
        self.cache.set_document(None);
        self.layout = PageLayout::default();
        self.viewport.reset();
        self.nav.reset();
        self.error = None;
    }

    pub fn apply(&mut self, command: Command) {
        if self.document.is_none() && !matches!(command, Command::CloseDocument) {
            return;
        }
        match command {
            Command::NextPage => {
                self.nav.next_page();
                self.align_scroll_with_page();
            }
            Command::PrevPage => {
                self.nav.prev_page();
                self.align_scroll_with_page();
            }
            Command::GotoPage { page } => {
                self.nav.go_to_page(page);
                self.align_scroll_with_page();
            }
            Command::FirstPage => {
                self.nav.go_to_page(1);
                self.align_scroll_with_page();
            }
            Command::LastPage => {
                self.nav.go_to_page(self.nav.page_count());
                self.align_scroll_with_page();
            }
            Command::ZoomIn => {
                self.nav.zoom_in();
                self.after_zoom_change();
            }
            Command::ZoomOut => {
                self.nav.zoom_out();
                self.after_zoom_change();
            }
            Command::ResetZoom => {
                self.nav.reset_zoom();
                self.after_zoom_change();
            }
            Command::SetZoom { factor } => {
                self.nav.set_zoom(factor);
                self.after_zoom_change();
            }
            Command::SetZoomMode { mode } => {
                // The numeric zoom and therefore the layout stay untouched;
                // fit modes only change the scale derived at render time.
                self.nav.set_zoom_mode(mode);
            }
            Command::ScrollBy { delta } => {
                self.handle_scroll(self.nav.scroll().y + delta);
            }
            Command::ScrollTo { offset } => {
                self.handle_scroll(offset);
            }
            Command::CloseDocument => self.close(),
        }
    }

    /// Viewport resize. Recomputes the visible range at the current offset.
    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport.set_viewport(width, height);
        if self.document.is_some() {
            let offset = self.viewport.scroll_offset();
            self.viewport
                .handle_scroll(offset, &self.layout, &mut self.cache, &mut self.nav);
        }
    }

    /// A scroll offset change from the shell, clamped to the scrollable
    /// extent. When the dominant page changes as a result, the update flows
    /// into navigation state and the reciprocal programmatic scroll is
    /// suppressed by the controller's one-shot flag.
    pub fn handle_scroll(&mut self, offset: f32) {
        if self.document.is_none() {
            return;
        }
        let max_offset = (self.layout.total_height() - self.viewport.viewport_height()).max(0.0);
        let clamped = offset.clamp(0.0, max_offset);

        let page_before = self.nav.current_page();
        self.viewport
            .handle_scroll(clamped, &self.layout, &mut self.cache, &mut self.nav);
        if self.nav.current_page() != page_before {
            self.align_scroll_with_page();
        }
    }

    /// Scale to hand the renderer for the current zoom mode.
    pub fn effective_scale(&self) -> f32 {
        self.viewport.effective_scale(&self.nav, &self.layout)
    }

    /// Layout entries in the visible range paired with their page handles,
    /// materializing through the cache. A `None` handle means that page is
    /// still loading (or its fetch failed) and its slot stays blank.
    pub fn visible_pages(&mut self) -> Vec<(LayoutEntry, Option<Arc<dyn PageBackend>>)> {
        let Some(range) = self.viewport.visible_range() else {
            return Vec::new();
        };
        let entries: Vec<LayoutEntry> = self.layout.entries()[range.start..=range.end].to_vec();
        entries
            .into_iter()
            .map(|entry| {
                let handle = self.cache.get_page(entry.page_index);
                (entry, handle)
            })
            .collect()
    }

    fn install(&mut self, session: DocumentSession) {
        let previous = self.document.take();
        if let Some(previous) = &previous {
            self.stash_position(previous);
        }

        self.cache.set_document(Some(&session));
        self.nav.bind(session.page_count);
        self.nav.set_scroll(ScrollPosition::default());
        self.viewport.reset();
        self.layout = PageLayout::build(&mut self.cache, &session, self.nav.zoom());
        self.document = Some(session);

        // The new session is fully installed; only now let go of the old
        // backend so no component can observe a gap with no live document.
        if let Some(previous) = previous {
            previous.backend.release();
        }
    }

    fn rebuild_layout(&mut self) {
        if let Some(session) = &self.document {
            self.layout = PageLayout::build(&mut self.cache, session, self.nav.zoom());
        }
    }

    fn after_zoom_change(&mut self) {
        self.rebuild_layout();
        self.align_scroll_with_page();
    }

    /// Aligns the scroll offset with the current page unless that page
    /// change was itself scroll-derived, in which case the controller
    /// swallows exactly this one alignment.
    fn align_scroll_with_page(&mut self) {
        let Some(offset) = self
            .viewport
            .scroll_to_page(self.nav.current_page(), &self.layout)
        else {
            return;
        };
        self.viewport
            .handle_scroll(offset, &self.layout, &mut self.cache, &mut self.nav);
    }

    fn stash_position(&self, session: &DocumentSession) {
        let position = SavedPosition {
            page: self.nav.current_page(),
            scroll_y: self.nav.scroll().y,
            zoom: self.nav.zoom(),
            timestamp: unix_timestamp_ms(),
        };
        if let Err(err) = self.positions.save(&session.path, position) {
            warn!(%err, path = %session.path.display(), "failed to save reading position");
        }
    }

    fn persist_recent(&self) {
        if let Some(path) = &self.recent_path {
            if let Err(err) = self.recent.save(path) {
                warn!(%err, "failed to save recent files list");
            }
        }
    }

    fn record_error(&mut self, error: OpenError) -> OpenError {
        warn!(%error, "open attempt failed");
        self.error = Some(error.clone());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::layout::PAGE_GAP;
    use crate::persist::MemoryPositionStore;
    use crate::testutil::FakeProvider;
    use crate::{CancelToken, RenderError};

    fn new_session() -> Session {
        Session::new(Arc::new(MemoryPositionStore::new()), RecentFiles::new(), None)
    }

    fn pdf_bytes() -> Vec<u8> {
        b"%PDF-1.7 fake body".to_vec()
    }

    #[tokio::test]
    async fn open_installs_document_and_records_recent() {
        let provider = FakeProvider::new(vec![1000.0; 10]);
        let mut session = new_session();
        session.set_viewport(800.0, 1000.0);

        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/ten.pdf"))
            .await
            .unwrap();

        assert_eq!(session.document().unwrap().page_count, 10);
        assert_eq!(session.nav().current_page(), 1);
        assert!(session.error().is_none());
        assert_eq!(session.recent_files().len(), 1);
        assert_eq!(session.layout().len(), 10);
    }

    #[tokio::test]
    async fn goto_then_next_follows_layout_offsets() {
        let provider = FakeProvider::new(vec![1000.0; 10]);
        let mut session = new_session();
        session.set_viewport(800.0, 1000.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/nav.pdf"))
            .await
            .unwrap();

        session.apply(Command::GotoPage { page: 2 });
        assert_eq!(session.nav().current_page(), 2);
        let expected = session.layout().entry_for(2).unwrap().top_offset;
        assert_eq!(session.viewport().scroll_offset(), expected);
        assert_eq!(session.nav().scroll().y, expected);

        session.apply(Command::NextPage);
        assert_eq!(session.nav().current_page(), 3);
    }

    #[tokio::test]
    async fn goto_current_page_reaffirms_its_top_offset() {
        let provider = FakeProvider::new(vec![1000.0; 10]);
        let mut session = new_session();
        session.set_viewport(800.0, 1000.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/reaffirm.pdf"))
            .await
            .unwrap();
        session.apply(Command::GotoPage { page: 2 });
        let top = session.layout().entry_for(2).unwrap().top_offset;

        // Drift within the page; the dominant page does not change.
        std::thread::sleep(crate::viewport::SCROLL_SETTLE);
        session.handle_scroll(top + 300.0);
        assert_eq!(session.nav().current_page(), 2);
        assert_eq!(session.viewport().scroll_offset(), top + 300.0);

        session.apply(Command::GotoPage { page: 2 });
        assert_eq!(session.viewport().scroll_offset(), top);
    }

    #[tokio::test]
    async fn goto_clamps_out_of_range_targets() {
        let provider = FakeProvider::new(vec![500.0; 4]);
        let mut session = new_session();
        session.set_viewport(800.0, 600.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/clamp.pdf"))
            .await
            .unwrap();

        session.apply(Command::GotoPage { page: 99 });
        assert_eq!(session.nav().current_page(), 4);
        session.apply(Command::GotoPage { page: 0 });
        assert_eq!(session.nav().current_page(), 1);
    }

    #[tokio::test]
    async fn bad_header_is_invalid_format_and_leaves_document_loaded() {
        let provider = FakeProvider::new(vec![700.0; 3]);
        let mut session = new_session();
        session.set_viewport(800.0, 600.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/keep.pdf"))
            .await
            .unwrap();
        session.apply(Command::GotoPage { page: 3 });

        let result = session
            .open_from_bytes(&provider, b"<html>not a pdf".to_vec(), PathBuf::from("/tmp/bad.pdf"))
            .await;

        assert_eq!(result, Err(OpenError::InvalidFormat));
        assert_eq!(session.error(), Some(&OpenError::InvalidFormat));
        // The open document is untouched.
        assert_eq!(session.document().unwrap().path, Path::new("/tmp/keep.pdf"));
        assert_eq!(session.nav().current_page(), 3);
    }

    #[tokio::test]
    async fn decode_failure_leaves_previous_session_alive() {
        let provider = FakeProvider::new(vec![700.0; 3]);
        let mut session = new_session();
        session.set_viewport(800.0, 600.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/alive.pdf"))
            .await
            .unwrap();

        provider.fail_next(OpenError::Corrupt("password protected".into()));
        let result = session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/locked.pdf"))
            .await;

        assert!(matches!(result, Err(OpenError::Corrupt(_))));
        assert!(!provider.opened()[0].is_released());
        assert_eq!(session.document().unwrap().path, Path::new("/tmp/alive.pdf"));
    }

    #[tokio::test]
    async fn replacement_releases_only_the_previous_backend() {
        let provider = FakeProvider::new(vec![700.0; 3]);
        let mut session = new_session();
        session.set_viewport(800.0, 600.0);

        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/first.pdf"))
            .await
            .unwrap();
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/second.pdf"))
            .await
            .unwrap();

        let opened = provider.opened();
        assert!(opened[0].is_released());
        assert!(!opened[1].is_released());
    }

    #[tokio::test]
    async fn close_releases_backend_and_persists_position() {
        let positions = Arc::new(MemoryPositionStore::new());
        let provider = FakeProvider::new(vec![1000.0; 10]);
        let mut session = Session::new(Arc::clone(&positions) as Arc<dyn PositionStore>,
            RecentFiles::new(), None);
        session.set_viewport(800.0, 1000.0);

        let path = PathBuf::from("/tmp/resume.pdf");
        session
            .open_from_bytes(&provider, pdf_bytes(), path.clone())
            .await
            .unwrap();
        session.apply(Command::GotoPage { page: 4 });
        session.apply(Command::SetZoom { factor: 2.0 });
        session.close();

        assert!(provider.opened()[0].is_released());
        assert!(session.document().is_none());
        assert_eq!(session.nav().current_page(), 1);
        assert_eq!(session.nav().zoom(), 1.0);

        let saved = positions.get(&path).unwrap().unwrap();
        assert_eq!(saved.page, 4);
        assert_eq!(saved.zoom, 2.0);
    }

    #[tokio::test]
    async fn reopening_restores_saved_page_and_zoom() {
        let positions = Arc::new(MemoryPositionStore::new());
        let provider = FakeProvider::new(vec![1000.0; 10]);
        let path = PathBuf::from("/tmp/restore.pdf");
        positions
            .save(
                &path,
                SavedPosition {
                    page: 5,
                    scroll_y: 9999.0,
                    zoom: 2.0,
                    timestamp: 1,
                },
            )
            .unwrap();

        let mut session = Session::new(Arc::clone(&positions) as Arc<dyn PositionStore>,
            RecentFiles::new(), None);
        session.set_viewport(800.0, 1000.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), path)
            .await
            .unwrap();

        assert_eq!(session.nav().current_page(), 5);
        assert_eq!(session.nav().zoom(), 2.0);
        let expected = session.layout().entry_for(5).unwrap().top_offset;
        assert_eq!(session.viewport().scroll_offset(), expected);
    }

    #[tokio::test]
    async fn missing_recent_file_is_dropped_from_the_list() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("vanished.pdf");

        let provider = FakeProvider::new(vec![500.0]);
        let mut recent = RecentFiles::new();
        recent.add(&gone, 1);
        let mut session = Session::new(Arc::new(MemoryPositionStore::new()), recent, None);

        let result = session.open_path(&provider, gone.clone()).await;
        assert_eq!(result, Err(OpenError::NotFound(gone)));
        assert!(session.recent_files().is_empty());
    }

    #[tokio::test]
    async fn open_path_reads_real_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ondisk.pdf");
        std::fs::write(&path, b"%PDF-1.4 payload").unwrap();

        let provider = FakeProvider::new(vec![500.0, 500.0]);
        let mut session = new_session();
        session.set_viewport(800.0, 600.0);
        session.open_path(&provider, path).await.unwrap();
        assert_eq!(session.document().unwrap().page_count, 2);
    }

    #[tokio::test]
    async fn user_scroll_drives_current_page_without_snap_back() {
        let provider = FakeProvider::new(vec![1000.0; 10]);
        let mut session = new_session();
        session.set_viewport(800.0, 1000.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/scroll.pdf"))
            .await
            .unwrap();
        session.apply(Command::GotoPage { page: 3 });

        // Let the programmatic settle window from the goto expire.
        std::thread::sleep(crate::viewport::SCROLL_SETTLE);

        let target = session.layout().entry_for(7).unwrap().top_offset + 10.0;
        session.handle_scroll(target);

        assert_eq!(session.nav().current_page(), 7);
        // No reciprocal programmatic scroll rewrote the offset.
        assert_eq!(session.viewport().scroll_offset(), target);
        assert_eq!(session.nav().scroll().y, target);
    }

    #[tokio::test]
    async fn zoom_change_rescrolls_to_current_page() {
        let provider = FakeProvider::new(vec![1000.0; 10]);
        let mut session = new_session();
        session.set_viewport(800.0, 1000.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/zoom.pdf"))
            .await
            .unwrap();
        session.apply(Command::GotoPage { page: 3 });

        session.apply(Command::ZoomIn);

        // Page heights scaled by 1.25; the offset follows the new layout.
        let expected = 2.0 * (1000.0 * 1.25 + PAGE_GAP);
        assert_eq!(session.nav().zoom(), 1.25);
        assert_eq!(session.viewport().scroll_offset(), expected);
    }

    #[tokio::test]
    async fn zoom_mode_switch_keeps_layout_and_offset() {
        let provider = FakeProvider::new(vec![1000.0; 10]);
        let mut session = new_session();
        session.set_viewport(652.0, 1000.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/fit.pdf"))
            .await
            .unwrap();
        session.apply(Command::GotoPage { page: 2 });
        let offset = session.viewport().scroll_offset();

        session.apply(Command::SetZoomMode { mode: ZoomMode::FitWidth });
        assert_eq!(session.viewport().scroll_offset(), offset);
        // 652 - 40 margin over a 612pt-wide page.
        assert_eq!(session.effective_scale(), 1.0);
    }

    #[tokio::test]
    async fn commands_without_document_are_ignored() {
        let mut session = new_session();
        session.apply(Command::NextPage);
        session.apply(Command::ZoomIn);
        assert_eq!(session.nav().current_page(), 1);
        assert_eq!(session.nav().zoom(), 1.0);
        session.close();
        assert!(session.document().is_none());
    }

    #[tokio::test]
    async fn superseded_render_is_cancelled_not_failed() {
        let provider = FakeProvider::new(vec![500.0]);
        let mut session = new_session();
        session.set_viewport(800.0, 600.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/cancel.pdf"))
            .await
            .unwrap();
        session.handle_scroll(0.0);
        let (_, handle) = session.visible_pages().into_iter().next().unwrap();
        let handle = handle.unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            handle.render(1.0, &cancel),
            Err(RenderError::Cancelled)
        ));

        // The handle itself is still good; only that render was superseded.
        assert!(handle.render(1.0, &CancelToken::new()).is_ok());
    }

    #[tokio::test]
    async fn page_handles_die_with_their_session() {
        let provider = FakeProvider::new(vec![500.0]);
        let mut session = new_session();
        session.set_viewport(800.0, 600.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/stale.pdf"))
            .await
            .unwrap();
        session.handle_scroll(0.0);
        let (_, handle) = session.visible_pages().into_iter().next().unwrap();
        let handle = handle.unwrap();
        assert!(handle.render(1.0, &CancelToken::new()).is_ok());

        session.close();

        assert!(matches!(
            handle.render(1.0, &CancelToken::new()),
            Err(RenderError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn visible_pages_pair_entries_with_handles() {
        let provider = FakeProvider::new(vec![1000.0; 10]);
        let mut session = new_session();
        session.set_viewport(800.0, 1000.0);
        session
            .open_from_bytes(&provider, pdf_bytes(), PathBuf::from("/tmp/vis.pdf"))
            .await
            .unwrap();
        session.handle_scroll(0.0);

        let pages = session.visible_pages();
        assert!(!pages.is_empty());
        assert_eq!(pages[0].0.page_index, 1);
        assert!(pages.iter().all(|(_, handle)| handle.is_some()));
    }
}
