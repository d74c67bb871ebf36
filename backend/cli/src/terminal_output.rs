//! Status notes and plain-text tables for the CLI.

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";

#[derive(Clone, Copy)]
enum Tone {
    Info,
    Warn,
    Error,
    Success,
}

impl Tone {
    /// (ANSI color, glyph, plain-text prefix)
    fn style(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Tone::Info => ("\x1b[36m", "ℹ", "INFO:"),
            Tone::Warn => ("\x1b[33m", "⚠", "WARN:"),
            Tone::Error => ("\x1b[31m", "✗", "ERROR:"),
            Tone::Success => ("\x1b[32m", "✓", "OK:"),
        }
    }
}

/// Honors `NO_COLOR` and dumb terminals.
fn color_enabled() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::env::var_os("COLORTERM").is_some()
        || std::env::var("TERM").is_ok_and(|t| t != "dumb")
}

fn format_note(tone: Tone, msg: &str, color: bool) -> String {
    let (ansi, glyph, plain) = tone.style();
    if color {
        format!("{ansi}{BOLD}{glyph}{RESET} {msg}")
    } else {
        format!("{plain} {msg}")
    }
}

pub fn note_info(msg: &str) {
    println!("{}", format_note(Tone::Info, msg, color_enabled()));
}

pub fn note_warn(msg: &str) {
    println!("{}", format_note(Tone::Warn, msg, color_enabled()));
}

pub fn note_error(msg: &str) {
    eprintln!("{}", format_note(Tone::Error, msg, color_enabled()));
}

pub fn note_success(msg: &str) {
    println!("{}", format_note(Tone::Success, msg, color_enabled()));
}

/// Remove `ESC [ ... m` sequences.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_escape = false;
    for c in s.chars() {
        match (in_escape, c) {
            (false, '\x1b') => in_escape = true,
            (false, c) => out.push(c),
            (true, 'm') => in_escape = false,
            (true, _) => {}
        }
    }
    out
}

fn visible_width(s: &str) -> usize {
    strip_ansi(s).chars().count()
}

pub enum Align {
    Left,
    Right,
}

pub struct Column {
    pub header: String,
    pub align: Align,
}

impl Column {
    pub fn left(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            align: Align::Left,
        }
    }

    pub fn right(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            align: Align::Right,
        }
    }

    fn pad(&self, cell: &str, width: usize) -> String {
        let fill = " ".repeat(width.saturating_sub(visible_width(cell)));
        match self.align {
            Align::Left => format!("{cell}{fill}"),
            Align::Right => format!("{fill}{cell}"),
        }
    }
}

/// Bold header, dashed rule, then one line per row. Missing cells render empty.
pub fn render_table(columns: &[Column], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(|cell| visible_width(cell))
                .fold(visible_width(&col.header), usize::max)
        })
        .collect();

    let line = |cells: Vec<String>| format!("  {}  \n", cells.join("  "));

    let header = columns
        .iter()
        .zip(&widths)
        .map(|(col, &w)| col.pad(&col.header, w))
        .collect::<Vec<_>>()
        .join("  ");
    let mut out = format!("{BOLD}  {header}  {RESET}\n");
    out.push_str(&line(widths.iter().map(|&w| "-".repeat(w)).collect()));
    for row in rows {
        out.push_str(&line(
            columns
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, (col, &w))| col.pad(row.get(i).map(String::as_str).unwrap_or(""), w))
                .collect(),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi() {
        assert_eq!(strip_ansi(&format!("{BOLD}hello{RESET}")), "hello");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn plain_notes_use_prefixes() {
        assert_eq!(format_note(Tone::Warn, "careful", false), "WARN: careful");
        assert!(format_note(Tone::Success, "done", true).ends_with(" done"));
    }

    #[test]
    fn renders_aligned_table() {
        let cols = vec![Column::left("Name"), Column::right("Count")];
        let rows = vec![
            vec!["alice".to_string(), "42".to_string()],
            vec!["bob".to_string(), "7".to_string()],
        ];
        let table = strip_ansi(&render_table(&cols, &rows));
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "  Name   Count  ");
        assert_eq!(lines[1], "  -----  -----  ");
        assert_eq!(lines[2], "  alice     42  ");
        assert_eq!(lines[3], "  bob        7  ");
    }

    #[test]
    fn short_rows_render_blank_cells() {
        let cols = vec![Column::left("A"), Column::left("B")];
        let table = render_table(&cols, &[vec!["x".to_string()]]);
        assert_eq!(table.lines().nth(2), Some("  x     "));
    }
}
