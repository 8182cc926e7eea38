use crate::render::{Frame, PopupLayout, Renderer};
use std::io::Write;

const UPPER_HALF: char = '\u{2580}';
const BAR: Rgb = [0, 0, 0];

type Rgb = [u8; 3];

/// Two vertical preview pixels per cell: the upper one as foreground, the lower one as
/// background. Colour escapes are only emitted when a cell differs from its left
/// neighbour.
#[derive(Debug, Default)]
pub struct HalfBlockRenderer {
    fg: Option<Rgb>,
    bg: Option<Rgb>,
}

impl HalfBlockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn paint_cell(&mut self, out: &mut dyn Write, upper: Rgb, lower: Rgb) -> std::io::Result<()> {
        if self.fg != Some(upper) {
            write!(out, "\x1b[38;2;{};{};{}m", upper[0], upper[1], upper[2])?;
            self.fg = Some(upper);
        }
        if self.bg != Some(lower) {
            write!(out, "\x1b[48;2;{};{};{}m", lower[0], lower[1], lower[2])?;
            self.bg = Some(lower);
        }
        write!(out, "{UPPER_HALF}")
    }
}

/// Preview placed centred in the cell grid, black bars around it.
struct Letterbox<'a> {
    pixels: &'a [u8],
    width: usize,
    height: usize,
    left: usize,
    top: usize,
}

impl<'a> Letterbox<'a> {
    fn new(frame: &Frame<'a>) -> Self {
        let cols = frame.term_cols as usize;
        let cell_rows = frame.pixel_height.div_ceil(2);
        Self {
            pixels: frame.pixels_rgba,
            width: frame.pixel_width,
            height: frame.pixel_height,
            left: cols.saturating_sub(frame.pixel_width) / 2,
            top: (frame.visual_rows as usize).saturating_sub(cell_rows) / 2 * 2,
        }
    }

    /// Colour at screen pixel `(sx, sy)`, where `sy` counts half-cells.
    fn at(&self, sx: usize, sy: usize) -> Rgb {
        let (Some(x), Some(y)) = (sx.checked_sub(self.left), sy.checked_sub(self.top)) else {
            return BAR;
        };
        if x >= self.width || y >= self.height {
            return BAR;
        }
        let i = (y * self.width + x) * 4;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }
}

fn draw_hud(out: &mut dyn Write, frame: &Frame<'_>) -> std::io::Result<()> {
    let first_row = frame.visual_rows as usize + 1;
    let mut lines = frame.hud.lines();
    for row in first_row..first_row + frame.hud_rows as usize {
        write!(out, "\x1b[{row};1H\x1b[0m\x1b[2K")?;
        if let Some(line) = lines.next() {
            let shown: String = line.chars().take(frame.term_cols as usize).collect();
            out.write_all(shown.as_bytes())?;
        }
    }
    Ok(())
}

impl Renderer for HalfBlockRenderer {
    fn name(&self) -> &'static str {
        "halfblock"
    }

    fn render(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> anyhow::Result<()> {
        let cols = frame.term_cols as usize;
        let rows = frame.visual_rows as usize;
        if cols == 0 || rows == 0 {
            return Ok(());
        }
        let need = frame.pixel_width * frame.pixel_height * 4;
        if frame.pixels_rgba.len() < need {
            write!(
                out,
                "\x1b[H\x1b[0m\x1b[2Jpixel buffer too small (need {need}, got {})",
                frame.pixels_rgba.len()
            )?;
            out.flush()?;
            return Ok(());
        }

        if frame.sync_updates {
            out.write_all(b"\x1b[?2026h")?;
        }
        // Home, reset, autowrap off for full-width rows.
        out.write_all(b"\x1b[H\x1b[0m\x1b[?7l")?;
        self.fg = None;
        self.bg = None;

        let view = Letterbox::new(frame);
        for row in 0..rows {
            for col in 0..cols {
                self.paint_cell(out, view.at(col, row * 2), view.at(col, row * 2 + 1))?;
            }
            out.write_all(b"\r\n")?;
        }

        draw_hud(out, frame)?;
        if let Some(popup) = frame
            .overlay
            .and_then(|text| PopupLayout::fit(text, frame.term_cols, frame.term_rows))
        {
            popup.draw(out)?;
        }

        out.write_all(b"\x1b[?7h")?;
        if frame.sync_updates {
            out.write_all(b"\x1b[?2026l")?;
        }
        out.flush()?;
        Ok(())
    }
}
