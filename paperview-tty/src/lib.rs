use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    terminal::{Clear, ClearType},
};
use png::{BitDepth, ColorType, Encoder};
use paperview_core::{Command, RenderImage, ZoomMode};
use tracing::trace;

/// Events the shell acts on, produced by [`EventMapper`].
#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    Resize { width: u16, height: u16 },
    Quit,
    None,
}

/// Maps terminal input to viewer commands, retaining a numeric prefix
/// between key events (vim style: `3j` scrolls three steps, `12g` jumps
/// to page 12).
#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<u32>,
    pending_digits: String,
}

impl EventMapper {
    /// Scroll distance of one `j`/`k` step, in layout points.
    pub const SCROLL_STEP: f32 = 50.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Resize(width, height) => {
                self.reset_count();
                UiEvent::Resize { width, height }
            }
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit);
                    }
                    UiEvent::None
                }
                (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(Command::ScrollBy {
                        delta: Self::SCROLL_STEP * count as f32,
                    })
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(Command::ScrollBy {
                        delta: -Self::SCROLL_STEP * count as f32,
                    })
                }
                (KeyCode::Char(' '), _) | (KeyCode::PageDown, _) => {
                    self.reset_count();
                    UiEvent::Command(Command::NextPage)
                }
                (KeyCode::PageUp, _) => {
                    self.reset_count();
                    UiEvent::Command(Command::PrevPage)
                }
                (KeyCode::Char('g'), KeyModifiers::NONE) => match self.take_prefix() {
                    Some(page) => UiEvent::Command(Command::GotoPage { page }),
                    None => UiEvent::Command(Command::FirstPage),
                },
                (KeyCode::Char('G'), KeyModifiers::SHIFT) | (KeyCode::End, _) => {
                    self.reset_count();
                    UiEvent::Command(Command::LastPage)
                }
                (KeyCode::Home, _) => {
                    self.reset_count();
                    UiEvent::Command(Command::FirstPage)
                }
                (KeyCode::Char('+'), _) => {
                    self.reset_count();
                    UiEvent::Command(Command::ZoomIn)
                }
                (KeyCode::Char('-'), _) => {
                    self.reset_count();
                    UiEvent::Command(Command::ZoomOut)
                }
                (KeyCode::Char('='), _) => {
                    self.reset_count();
                    UiEvent::Command(Command::ResetZoom)
                }
                (KeyCode::Char('w'), KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::Command(Command::SetZoomMode {
                        mode: ZoomMode::FitWidth,
                    })
                }
                (KeyCode::Char('f'), KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::Command(Command::SetZoomMode {
                        mode: ZoomMode::FitPage,
                    })
                }
                (KeyCode::Char('x'), KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::Command(Command::CloseDocument)
                }
                (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            _ => UiEvent::None,
        }
    }

    /// The digits typed so far, shown in the status line until consumed.
    pub fn pending_input(&self) -> Option<&str> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(&self.pending_digits)
        }
    }

    fn push_digit(&mut self, digit: u32) {
        let current = self.pending_count.unwrap_or(0);
        self.pending_count = Some(current.saturating_mul(10).saturating_add(digit));
        if let Some(c) = char::from_digit(digit, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> u32 {
        self.take_prefix().unwrap_or(1)
    }

    fn take_prefix(&mut self) -> Option<u32> {
        self.pending_digits.clear();
        self.pending_count.take().filter(|&count| count > 0)
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

/// Draws rendered pages through the kitty graphics protocol: PNG-encodes
/// the pixels, then transmits them base64-chunked with a direct placement.
/// One page is on screen at a time, so a single image/placement id pair is
/// reused for every transmission.
pub struct KittyRenderer<W: Write> {
    writer: W,
}

const IMAGE_ID: u32 = 1;
const PLACEMENT_ID: u32 = 1;
const CHUNK_SIZE: usize = 4096;

fn encode_png(image: &RenderImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.pixels)?;
    writer.finish()?;
    Ok(buffer)
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let payload = BASE64.encode(encode_png(image)?);
        trace!(
            width = image.width,
            height = image.height,
            bytes = payload.len(),
            "transmitting page image"
        );

        let mut rest = payload.as_bytes();
        let mut first = true;
        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(rest.len().min(CHUNK_SIZE));
            rest = tail;
            let more = if rest.is_empty() { 0 } else { 1 };
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={IMAGE_ID},p={PLACEMENT_ID},\
                     c={},r={},s={},v={},z=-1,m={more}",
                    params.columns, params.rows, image.width, image.height
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={more},q=2")?;
            }
            self.writer.write_all(b";")?;
            self.writer.write_all(chunk)?;
            self.writer.write_all(b"\x1b\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Deletes all transmitted images so a redraw starts from a clean slate.
    pub fn delete_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,q=2\u{1b}\\")?;
        Ok(())
    }

    /// Opens a synchronized-update bracket; paired with
    /// [`end_sync_update`](Self::end_sync_update) it makes the terminal
    /// apply a whole redraw at once instead of flickering through it.
    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Status line for the bottom row: page indicator, zoom, and any pending
/// numeric prefix.
pub struct StatusLine<'a> {
    pub name: &'a str,
    pub current_page: u32,
    pub page_count: u32,
    pub zoom: f32,
    pub pending: Option<&'a str>,
}

pub fn write_status_line<W: Write>(writer: &mut W, status: &StatusLine<'_>) -> io::Result<()> {
    write!(
        writer,
        "{}  [{}/{}]  {:.0}%",
        status.name,
        status.current_page,
        status.page_count,
        status.zoom * 100.0
    )?;
    if let Some(pending) = status.pending {
        write!(writer, "  {pending}")?;
    }
    writer.flush()
}
