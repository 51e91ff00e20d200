//! Printers: text (owo-colors) and markdown (termimad), plus rendering of
//! execution records, variable tables and session stats.

use std::collections::BTreeMap;

use owo_colors::OwoColorize;
use termimad::MadSkin;
use unicode_width::UnicodeWidthStr;

use crate::execution::{ExecutionRecord, VariableInfo};
use crate::session::SessionStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Cyan,
    Magenta,
    Yellow,
    Red,
}

impl Color {
    /// Unknown names mean "no color".
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "green" => Some(Self::Green),
            "cyan" => Some(Self::Cyan),
            "magenta" => Some(Self::Magenta),
            "yellow" => Some(Self::Yellow),
            "red" => Some(Self::Red),
            _ => None,
        }
    }
}

fn paint(text: &str, color: Option<Color>) -> String {
    match color {
        Some(Color::Green) => text.green().to_string(),
        Some(Color::Cyan) => text.cyan().to_string(),
        Some(Color::Magenta) => text.magenta().to_string(),
        Some(Color::Yellow) => text.yellow().to_string(),
        Some(Color::Red) => text.red().to_string(),
        None => text.to_string(),
    }
}

pub struct TextPrinter {
    pub color: Option<Color>,
    /// Plain output when stdout is not a terminal.
    pub styled: bool,
}

impl TextPrinter {
    fn style(&self, text: &str, color: Option<Color>) -> String {
        if self.styled {
            paint(text, color)
        } else {
            text.to_string()
        }
    }

    pub fn print(&self, text: &str) {
        println!("{}", self.style(text, self.color));
    }

    /// Prints what a snippet produced, in the order a user expects to read it.
    pub fn print_record(&self, record: &ExecutionRecord) {
        print!("{}", record.stdout);
        if !record.stderr.is_empty() {
            eprint!("{}", self.style(&record.stderr, Some(Color::Yellow)));
        }
        if let Some(result) = &record.result {
            println!("{}", self.style(result, self.color));
        }
        if !record.error.is_empty() {
            eprint!("{}", self.style(&record.error, Some(Color::Red)));
        }
        for artifact in &record.artifacts {
            let title = artifact
                .title
                .as_deref()
                .map(|t| format!(" \"{t}\""))
                .unwrap_or_default();
            let line = format!(
                "[figure {}{title}: {}x{} {}, {} bytes]",
                artifact.index + 1,
                artifact.width,
                artifact.height,
                artifact.format,
                artifact.data.len()
            );
            println!("{}", self.style(&line, Some(Color::Cyan)));
        }
    }

    pub fn print_variables(&self, vars: &BTreeMap<String, VariableInfo>) {
        if vars.is_empty() {
            println!("{}", self.style("(no variables)", Some(Color::Yellow)));
            return;
        }
        print!("{}", variables_table(vars));
    }

    pub fn print_stats(&self, stats: &SessionStats) {
        print!("{}", stats_text(stats));
    }
}

/// Left-aligned columns measured in display width, so wide characters in
/// names or reprs do not break alignment.
pub fn variables_table(vars: &BTreeMap<String, VariableInfo>) -> String {
    let headers = ["name", "type", "size", "value"];
    let rows: Vec<[&str; 4]> = vars
        .iter()
        .map(|(name, info)| {
            [
                name.as_str(),
                info.type_name.as_str(),
                info.size.as_str(),
                info.repr.as_str(),
            ]
        })
        .collect();

    let mut widths = headers.map(UnicodeWidthStr::width);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.width());
        }
    }

    let mut out = String::new();
    for row in std::iter::once(&headers).chain(rows.iter()) {
        let mut line = String::new();
        for (i, cell) in row.iter().enumerate() {
            line.push_str(cell);
            if i + 1 < row.len() {
                line.push_str(&" ".repeat(widths[i] - cell.width() + 2));
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

pub fn stats_text(stats: &SessionStats) -> String {
    let when = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    format!(
        "code blocks:   {}\ntotal lines:   {}\nexecutions:    {} ({} ok, {} failed)\nfigures:       {}\nfirst run:     {}\nlast run:      {}\n",
        stats.code_blocks,
        stats.total_lines,
        stats.executions,
        stats.successful,
        stats.failed,
        stats.artifacts,
        when(stats.first_activity),
        when(stats.last_activity),
    )
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default() }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(type_name: &str, repr: &str, size: &str) -> VariableInfo {
        VariableInfo {
            type_name: type_name.to_string(),
            repr: repr.to_string(),
            size: size.to_string(),
        }
    }

    #[test]
    fn table_columns_line_up_with_wide_chars() {
        let mut vars = BTreeMap::new();
        vars.insert("x".to_string(), info("int", "5", "scalar"));
        vars.insert("s".to_string(), info("str", "'日本'", "length: 2"));
        let table = variables_table(&vars);
        assert_eq!(
            table,
            "name  type  size       value\n\
             s     str   length: 2  '日本'\n\
             x     int   scalar     5\n"
        );
    }

    #[test]
    fn color_names() {
        assert_eq!(Color::from_name("Green"), Some(Color::Green));
        assert_eq!(Color::from_name("plaid"), None);
    }

    #[test]
    fn unstyled_text_has_no_escapes() {
        let p = TextPrinter { color: Some(Color::Red), styled: false };
        assert_eq!(p.style("boom", p.color), "boom");
    }
}
