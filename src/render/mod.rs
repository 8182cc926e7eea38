mod halfblock;

pub use halfblock::HalfBlockRenderer;

use std::io::Write;

/// One composited preview frame plus the terminal chrome around it.
///
/// The preview keeps its aspect ratio, so `pixel_width`/`pixel_height` may be smaller
/// than the cell area; presenters letterbox it.
pub struct Frame<'a> {
    pub term_cols: u16,
    pub term_rows: u16,
    pub visual_rows: u16,
    pub pixel_width: usize,
    pub pixel_height: usize,
    pub pixels_rgba: &'a [u8],
    pub hud: &'a str,
    pub hud_rows: u16,
    pub overlay: Option<&'a str>,
    pub sync_updates: bool,
}

pub trait Renderer {
    fn name(&self) -> &'static str;
    fn render(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> anyhow::Result<()>;
}

/// Pixel area available to the preview in a `cols` × `visual_rows` cell grid.
pub fn preview_container(cols: u16, visual_rows: u16) -> (usize, usize) {
    (cols.max(1) as usize, (visual_rows.max(1) as usize) * 2)
}

const POPUP_FG: &str = "\x1b[38;2;236;238;246m";
const POPUP_BG: &str = "\x1b[48;2;12;10;20m";
const POPUP_TITLE: &str = "\x1b[1m\x1b[38;2;255;204;2m";

/// Where a popup box lands and what it holds, in 1-based terminal coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupLayout {
    pub row: usize,
    pub col: usize,
    pub width: usize,
    pub lines: Vec<String>,
}

impl PopupLayout {
    /// Wraps `text` to fit the grid and centres the box. `None` when there is nothing to
    /// show or the grid is too small for a frame.
    pub fn fit(text: &str, cols: u16, rows: u16) -> Option<Self> {
        let (cols, rows) = (cols as usize, rows as usize);
        if text.trim().is_empty() || cols < 8 || rows < 4 {
            return None;
        }
        let wrap = cols - 6;
        let mut lines = Vec::new();
        for raw in text.lines() {
            let chars: Vec<char> = raw.chars().collect();
            if chars.is_empty() {
                lines.push(String::new());
            }
            lines.extend(chars.chunks(wrap).map(|c| c.iter().collect::<String>()));
        }
        lines.truncate(rows - 3);

        let inner = lines.iter().map(|l| l.chars().count()).max().unwrap_or(1).max(1);
        let width = inner + 4;
        let height = lines.len() + 2;
        Some(Self {
            row: (rows - height) / 2 + 1,
            col: (cols - width) / 2 + 1,
            width,
            lines,
        })
    }

    pub fn height(&self) -> usize {
        self.lines.len() + 2
    }

    /// Draws the box; the first line is the title.
    pub fn draw(&self, out: &mut dyn Write) -> anyhow::Result<()> {
        let inner = self.width - 4;
        let rule = "─".repeat(self.width - 2);
        write!(out, "\x1b[0m{POPUP_FG}{POPUP_BG}")?;
        write!(out, "\x1b[{};{}H┌{rule}┐", self.row, self.col)?;
        for (i, line) in self.lines.iter().enumerate() {
            let pad = inner - line.chars().count();
            write!(out, "\x1b[{};{}H│ ", self.row + 1 + i, self.col)?;
            if i == 0 {
                write!(out, "{POPUP_TITLE}{line}\x1b[22m{POPUP_FG}")?;
            } else {
                write!(out, "{line}")?;
            }
            write!(out, "{:pad$} │", "")?;
        }
        write!(out, "\x1b[{};{}H└{rule}┘\x1b[0m", self.row + self.height() - 1, self.col)?;
        Ok(())
    }
}
