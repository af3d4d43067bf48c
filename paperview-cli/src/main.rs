use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use paperview_core::{
    CancelToken, Command, FilePositionStore, PositionStore, RecentFiles, RenderError, Session,
};
use paperview_render::PdfiumProvider;
use paperview_tty::{write_status_line, DrawParams, EventMapper, KittyRenderer, StatusLine, UiEvent};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "paperview", version, about = "scrolling PDF viewer for kitty")]
struct Args {
    /// Page to open the document on (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<u32>,

    /// Path to the PDF file to open
    file: PathBuf,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "paperview", "paperview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let state_dir = project_dirs.data_local_dir().join("state");
    let positions: Arc<dyn PositionStore> = Arc::new(FilePositionStore::new(state_dir.clone())?);
    let recent_path = state_dir.join("recent.json");
    let recent = RecentFiles::load(&recent_path)?;
    let mut session = Session::new(positions, recent, Some(recent_path));

    let provider = PdfiumProvider::new()?;
    session
        .open_path(&provider, args.file.clone())
        .await
        .map_err(|err| anyhow!("{err}"))
        .with_context(|| format!("failed to open {:?}", args.file))?;

    if let Some(page) = args.page {
        session.apply(Command::GotoPage { page });
    }

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = KittyRenderer::new(stdout);
    let mut event_mapper = EventMapper::new();
    let mut render_cancel = CancelToken::new();
    let mut dirty = true;

    apply_window_size(&mut session)?;

    loop {
        if dirty {
            // Supersede any render still using the previous token.
            render_cancel.cancel();
            render_cancel = CancelToken::new();
            redraw(&mut renderer, &mut session, &event_mapper, &render_cancel)?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ui_event = event_mapper.map_event(event::read()?);
            match ui_event {
                UiEvent::Command(command) => {
                    let closing = matches!(command, Command::CloseDocument);
                    session.apply(command);
                    if closing {
                        break;
                    }
                    dirty = true;
                }
                UiEvent::Resize { .. } => {
                    apply_window_size(&mut session)?;
                    dirty = true;
                }
                UiEvent::Quit => break,
                UiEvent::None => {
                    // Digits typed so far belong in the status line.
                    draw_status(&mut renderer, &session, &event_mapper)?;
                }
            }
        }
    }

    {
        let mut writer = renderer.writer();
        crossterm::execute!(&mut writer, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    }

    session.close();
    Ok(())
}

/// Feeds the terminal's pixel size into the session as the viewport, one
/// status row subtracted.
fn apply_window_size(session: &mut Session) -> Result<()> {
    let window = terminal::window_size()?;
    let total_rows = u32::from(window.rows).max(1);
    let cell_height = f32::from(window.height) / total_rows as f32;
    let width = f32::from(window.width).max(1.0);
    let height = (f32::from(window.height) - cell_height).max(1.0);
    session.set_viewport(width, height);
    Ok(())
}

fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    session: &mut Session,
    event_mapper: &EventMapper,
    cancel: &CancelToken,
) -> Result<()> {
    let window = terminal::window_size()?;
    let total_cols = u32::from(window.columns).max(1);
    let total_rows = u32::from(window.rows).max(1);
    let image_rows = total_rows.saturating_sub(1).max(1);

    renderer.begin_sync_update()?;
    renderer.delete_images()?;
    renderer.clear_all()?;

    let scale = session.effective_scale();
    let current = session.nav().current_page();
    let page = session
        .visible_pages()
        .into_iter()
        .find(|(entry, _)| entry.page_index == current);

    if let Some((_, Some(handle))) = page {
        match handle.render(scale, cancel) {
            Ok(image) => {
                renderer.draw(&image, DrawParams::clamped(total_cols, image_rows))?;
            }
            Err(RenderError::Cancelled) | Err(RenderError::SessionClosed) => {}
            Err(err) => warn!(%err, page = current, "failed to render page"),
        }
    }

    renderer.end_sync_update()?;
    draw_status(renderer, session, event_mapper)?;
    Ok(())
}

fn draw_status(
    renderer: &mut KittyRenderer<io::Stdout>,
    session: &Session,
    event_mapper: &EventMapper,
) -> Result<()> {
    let Some(document) = session.document() else {
        return Ok(());
    };
    let name = document
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| document.path.display().to_string());
    let status = StatusLine {
        name: &name,
        current_page: session.nav().current_page(),
        page_count: session.nav().page_count(),
        zoom: session.nav().zoom(),
        pending: event_mapper.pending_input(),
    };

    let window = terminal::window_size()?;
    let status_row = u32::from(window.rows).max(1).saturating_sub(1);
    let mut writer = renderer.writer();
    crossterm::execute!(
        &mut writer,
        cursor::MoveTo(0, status_row as u16),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(&mut writer, &status)?;
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "paperview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // File only; the terminal is in raw mode and draws images.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
