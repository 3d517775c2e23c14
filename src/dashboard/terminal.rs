//! Terminal surface the dashboard draws on.

use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::{cursor, terminal, ExecutableCommand, QueueableCommand};
use std::io::{self, Stdout, Write};

use super::canvas::{Canvas, Tone};

/// Used when the terminal size cannot be queried (for example when stdout
/// is not a tty).
pub const FALLBACK_WIDTH: usize = 120;

/// Exclusive owner of the output stream while the dashboard runs.
pub struct Terminal<W: Write = Stdout> {
    out: W,
    color: bool,
    alternate: bool,
}

impl Terminal<Stdout> {
    /// Switch stdout to the alternate screen with a hidden cursor. The
    /// previous screen comes back when the terminal is dropped.
    pub fn enter(color: bool) -> io::Result<Self> {
        let mut out = io::stdout();
        out.execute(terminal::EnterAlternateScreen)?;
        out.execute(cursor::Hide)?;
        Ok(Self {
            out,
            color,
            alternate: true,
        })
    }

    pub fn width(&self) -> usize {
        terminal::size()
            .map(|(cols, _)| cols as usize)
            .ok()
            .filter(|cols| *cols > 0)
            .unwrap_or(FALLBACK_WIDTH)
    }
}

impl<W: Write> Terminal<W> {
    /// Draw into an arbitrary writer without touching screen modes.
    pub fn with_writer(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            alternate: false,
        }
    }

    /// Replace the screen contents with `canvas`.
    pub fn draw(&mut self, canvas: &Canvas) -> io::Result<()> {
        self.out.queue(cursor::MoveTo(0, 0))?;
        self.out.queue(terminal::Clear(terminal::ClearType::All))?;

        for (row, line) in canvas.lines().iter().enumerate() {
            let row = u16::try_from(row).unwrap_or(u16::MAX);
            self.out.queue(cursor::MoveTo(0, row))?;
            for span in &line.spans {
                match (self.color, style(span.tone)) {
                    (true, Some((color, bold))) => {
                        if bold {
                            self.out.queue(SetAttribute(Attribute::Bold))?;
                        }
                        self.out.queue(SetForegroundColor(color))?;
                        self.out.queue(Print(&span.text))?;
                        self.out.queue(ResetColor)?;
                        if bold {
                            self.out.queue(SetAttribute(Attribute::Reset))?;
                        }
                    }
                    _ => {
                        self.out.queue(Print(&span.text))?;
                    }
                }
            }
        }
        self.out.flush()
    }
}

impl<W: Write> Drop for Terminal<W> {
    fn drop(&mut self) {
        if self.alternate {
            let _ = self.out.execute(cursor::Show);
            let _ = self.out.execute(terminal::LeaveAlternateScreen);
        }
        let _ = self.out.flush();
    }
}

fn style(tone: Tone) -> Option<(Color, bool)> {
    match tone {
        Tone::Plain => None,
        Tone::Title => Some((Color::Cyan, true)),
        Tone::Muted => Some((Color::DarkGrey, false)),
        Tone::Accent => Some((Color::Blue, false)),
        Tone::Good => Some((Color::Green, false)),
        Tone::Warn => Some((Color::Yellow, false)),
        Tone::Bad => Some((Color::Red, false)),
    }
}
