//! Incremental markup renderers for task output.
//!
//! Output chunks arrive with arbitrary boundaries, so a renderer keeps the
//! active style and any half-received escape sequence between calls. A
//! fresh renderer is created for every output channel.

use vte::{Params, Parser, Perform};

/// Turns raw styled text into display markup, one chunk at a time.
pub trait MarkupRenderer {
    fn render(&mut self, chunk: &str) -> String;
}

/// Passes text through untouched. Used by terminal views, which interpret
/// the escape sequences themselves.
#[derive(Debug, Default, Clone)]
pub struct PlainRenderer;

impl MarkupRenderer for PlainRenderer {
    fn render(&mut self, chunk: &str) -> String {
        chunk.to_string()
    }
}

const COLOR_NAMES: [&str; 8] = [
    "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Color {
    index: u8,
    bright: bool,
}

impl Color {
    fn class(self, layer: &str) -> String {
        let name = COLOR_NAMES[usize::from(self.index % 8)];
        if self.bright {
            format!("ansi-bright-{name}-{layer}")
        } else {
            format!("ansi-{name}-{layer}")
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Style {
    bold: bool,
    fg: Option<Color>,
    bg: Option<Color>,
}

impl Style {
    fn is_plain(&self) -> bool {
        *self == Style::default()
    }

    fn open_tag(&self) -> String {
        let mut classes = Vec::new();
        if self.bold {
            classes.push("ansi-bold".to_string());
        }
        if let Some(fg) = self.fg {
            classes.push(fg.class("fg"));
        }
        if let Some(bg) = self.bg {
            classes.push(bg.class("bg"));
        }
        format!("<span class=\"{}\">", classes.join(" "))
    }

    fn apply_sgr(&mut self, params: &Params) {
        if params.is_empty() {
            *self = Style::default();
            return;
        }
        let mut params = params.iter();
        while let Some(param) = params.next() {
            let code = param.first().copied().unwrap_or(0);
            match code {
                0 => *self = Style::default(),
                1 => self.bold = true,
                22 => self.bold = false,
                30..=37 => self.fg = Some(basic(code - 30, false)),
                39 => self.fg = None,
                40..=47 => self.bg = Some(basic(code - 40, false)),
                49 => self.bg = None,
                90..=97 => self.fg = Some(basic(code - 90, true)),
                100..=107 => self.bg = Some(basic(code - 100, true)),
                // Extended colours are not mapped. The colon form keeps its
                // arguments as subparameters; the semicolon form spends the
                // following parameters.
                38 | 48 if param.len() == 1 => {
                    match params.next().and_then(|p| p.first().copied()) {
                        Some(5) => {
                            params.next();
                        }
                        Some(2) => {
                            params.nth(2);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }
}

fn basic(index: u16, bright: bool) -> Color {
    Color {
        index: index as u8,
        bright,
    }
}

/// Markup produced while the parser walks one chunk.
#[derive(Debug, Default)]
struct HtmlWriter {
    style: Style,
    span_open: bool,
    out: String,
}

impl HtmlWriter {
    fn push_char(&mut self, c: char) {
        if !self.span_open && !self.style.is_plain() {
            self.out.push_str(&self.style.open_tag());
            self.span_open = true;
        }
        match c {
            '&' => self.out.push_str("&amp;"),
            '<' => self.out.push_str("&lt;"),
            '>' => self.out.push_str("&gt;"),
            '"' => self.out.push_str("&quot;"),
            '\'' => self.out.push_str("&#x27;"),
            _ => self.out.push(c),
        }
    }

    fn set_style(&mut self, next: Style) {
        if next != self.style && self.span_open {
            self.out.push_str("</span>");
            self.span_open = false;
        }
        self.style = next;
    }

    /// Close the chunk's span and hand back its markup. The style stays.
    fn finish(&mut self) -> String {
        if self.span_open {
            self.out.push_str("</span>");
            self.span_open = false;
        }
        std::mem::take(&mut self.out)
    }
}

impl Perform for HtmlWriter {
    fn print(&mut self, c: char) {
        self.push_char(c);
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.push_char(char::from(byte));
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        if action != 'm' || ignore || !intermediates.is_empty() {
            return;
        }
        let mut next = self.style;
        next.apply_sgr(params);
        self.set_style(next);
    }
}

/// HTML renderer for ANSI SGR sequences.
///
/// Each rendered chunk is balanced: a style still active at the end of a
/// chunk has its span closed there and reopened before the next text.
/// Other control sequences (cursor movement, OSC titles, charset switches)
/// are dropped.
pub struct AnsiHtmlRenderer {
    parser: Parser,
    writer: HtmlWriter,
}

impl AnsiHtmlRenderer {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            writer: HtmlWriter::default(),
        }
    }
}

impl Default for AnsiHtmlRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkupRenderer for AnsiHtmlRenderer {
    fn render(&mut self, chunk: &str) -> String {
        self.parser.advance(&mut self.writer, chunk.as_bytes());
        self.writer.finish()
    }
}
