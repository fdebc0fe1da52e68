//! Colour helpers for task output and console status lines
//!
//! Text written into task output is always styled: it is replayed to
//! dashboards, not to this process's terminal. Status lines follow the
//! terminal's colour support.

use console::{style, Style};

fn paint(style: Style, text: &str) -> String {
    style.force_styling(true).apply_to(text).to_string()
}

pub fn blue(text: &str) -> String {
    paint(Style::new().blue(), text)
}

pub fn green(text: &str) -> String {
    paint(Style::new().green(), text)
}

pub fn magenta(text: &str) -> String {
    paint(Style::new().magenta(), text)
}

pub fn red(text: &str) -> String {
    paint(Style::new().red(), text)
}

pub fn yellow(text: &str) -> String {
    paint(Style::new().yellow(), text)
}

/// `Tag:        message` with a green, column-aligned tag.
pub fn status_line(tag: &str, msg: &str) -> String {
    let label = format!("{tag}:");
    format!("{} {msg}", style(format!("{label:<12}")).green())
}

pub fn status_ok(tag: &str, msg: &str) {
    println!("{}", status_line(tag, msg));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_colours_are_forced() {
        assert_eq!(red("x"), "\x1b[31mx\x1b[0m");
        assert_eq!(green("ok"), "\x1b[32mok\x1b[0m");
    }

    #[test]
    fn status_line_pads_tag() {
        assert_eq!(
            console::strip_ansi_codes(&status_line("Started", "Counter")),
            "Started:     Counter"
        );
    }
}
