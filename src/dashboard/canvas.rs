//! Fixed-width text canvas the dashboard draws into.

/// Semantic color of a span; the terminal decides how to show it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Title,
    Muted,
    Accent,
    Good,
    Warn,
    Bad,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub tone: Tone,
}

/// One row of styled text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub spans: Vec<Span>,
}

impl Line {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new().with(text, Tone::Plain)
    }

    pub fn with(mut self, text: impl Into<String>, tone: Tone) -> Self {
        self.push(text, tone);
        self
    }

    /// Append text, merging with the previous span when the tone matches.
    pub fn push(&mut self, text: impl Into<String>, tone: Tone) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        match self.spans.last_mut() {
            Some(last) if last.tone == tone => last.text.push_str(&text),
            _ => self.spans.push(Span { text, tone }),
        }
    }

    /// Width in characters.
    pub fn width(&self) -> usize {
        self.spans.iter().map(|s| s.text.chars().count()).sum()
    }

    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    fn truncate(&mut self, width: usize) {
        let mut remaining = width;
        self.spans.retain_mut(|span| {
            if remaining == 0 {
                return false;
            }
            let len = span.text.chars().count();
            if len > remaining {
                span.text = span.text.chars().take(remaining).collect();
                remaining = 0;
            } else {
                remaining -= len;
            }
            true
        });
    }
}

/// Rows of text no wider than `width` characters. Longer lines are clipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: usize,
    lines: Vec<Line>,
}

impl Canvas {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            lines: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn push(&mut self, mut line: Line) {
        line.truncate(self.width);
        self.lines.push(line);
    }

    /// A full-width line made of `ch`.
    pub fn rule(&mut self, ch: char, tone: Tone) {
        let text: String = std::iter::repeat(ch).take(self.width).collect();
        self.push(Line::new().with(text, tone));
    }

    pub fn blank(&mut self) {
        self.lines.push(Line::new());
    }

    /// The canvas as plain text, one row per line.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line.text().trim_end());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_merges_same_tone() {
        let line = Line::new()
            .with("ab", Tone::Good)
            .with("cd", Tone::Good)
            .with("e", Tone::Bad)
            .with("", Tone::Warn);
        assert_eq!(line.spans.len(), 2);
        assert_eq!(line.text(), "abcde");
        assert_eq!(line.width(), 5);
    }

    #[test]
    fn test_lines_are_clipped_to_width() {
        let mut canvas = Canvas::new(4);
        canvas.push(Line::new().with("ab", Tone::Good).with("—xyz", Tone::Bad));
        canvas.push(Line::plain("ok"));

        assert_eq!(canvas.lines()[0].text(), "ab—x");
        assert_eq!(canvas.lines()[0].width(), 4);
        assert_eq!(canvas.lines()[1].text(), "ok");
    }

    #[test]
    fn test_zero_width_canvas() {
        let mut canvas = Canvas::new(0);
        canvas.push(Line::plain("anything"));
        canvas.rule('=', Tone::Muted);
        assert!(canvas.lines().iter().all(|l| l.width() == 0));
    }

    #[test]
    fn test_rule_and_text() {
        let mut canvas = Canvas::new(3);
        canvas.rule('-', Tone::Muted);
        canvas.blank();
        canvas.push(Line::plain("a  "));
        assert_eq!(canvas.to_text(), "---\n\na\n");
    }
}
