use anyhow::{Context, bail};
use crossterm::{QueueableCommand, cursor, terminal};
use std::io::{BufWriter, Stdout, Write, stdout};

/// Smallest grid the preview plus one HUD line fits in.
pub const MIN_COLS: u16 = 8;
pub const MIN_ROWS: u16 = 4;

/// Terminal cell grid as `(cols, rows)`.
pub type CellSize = (u16, u16);

/// Holds the terminal in raw mode on the alternate screen while the live preview runs.
pub struct PreviewScreen {
    restore_sync: bool,
}

impl PreviewScreen {
    /// Enters preview mode and checks the grid is usable. Raw mode is undone by `Drop`
    /// when any later step fails.
    pub fn enter(sync_updates: bool) -> anyhow::Result<(Self, CellSize)> {
        terminal::enable_raw_mode().context("enable raw mode")?;
        let screen = Self {
            restore_sync: sync_updates,
        };

        let mut out = stdout();
        out.queue(terminal::EnterAlternateScreen)?
            .queue(terminal::Clear(terminal::ClearType::All))?
            .queue(cursor::Hide)?;
        out.flush().context("prepare preview screen")?;

        let size = Self::size()?;
        if size.0 < MIN_COLS || size.1 < MIN_ROWS {
            bail!(
                "terminal too small (need at least {MIN_COLS}x{MIN_ROWS}, got {}x{})",
                size.0,
                size.1
            );
        }
        Ok((screen, size))
    }

    pub fn writer(&self) -> BufWriter<Stdout> {
        BufWriter::new(stdout())
    }

    pub fn size() -> anyhow::Result<CellSize> {
        terminal::size().context("query terminal size")
    }
}

impl Drop for PreviewScreen {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut out = stdout();
        if self.restore_sync {
            let _ = out.write_all(b"\x1b[?2026l");
        }
        // Autowrap back on, attributes reset.
        let _ = out.write_all(b"\x1b[?7h\x1b[0m");
        let _ = out.queue(cursor::Show);
        let _ = out.queue(terminal::LeaveAlternateScreen);
        let _ = out.flush();
    }
}
