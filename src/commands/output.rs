//! Rendering command results as text, JSON or tables.
#![allow(clippy::print_stdout)]

use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;

/// Return the terminal width in columns.
///
/// Asks the terminal first, then the `COLUMNS` environment variable, and
/// falls back to 80.
#[must_use]
pub fn terminal_columns() -> usize {
    if let Some((terminal_size::Width(w), _)) = terminal_size::terminal_size()
        && w > 0
    {
        return usize::from(w);
    }
    std::env::var("COLUMNS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(80)
}

/// Print `value` as pretty JSON on stdout.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialised.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print pre-rendered text on stdout.
pub fn print_text(text: &str) {
    print!("{text}");
}

/// A plain text table with left-aligned columns.
#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Table with the given column headers.
    #[must_use]
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row.
    pub fn row<S: Into<String>>(&mut self, cells: impl IntoIterator<Item = S>) {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    /// `true` when no rows were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render with two spaces between columns. The last column is cut to
    /// fit `max_width` and marked with `…`.
    #[must_use]
    pub fn render(&self, max_width: usize) -> String {
        let columns = self.headers.len();
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        let lines = std::iter::once(&self.headers).chain(&self.rows);
        for cells in lines {
            let mut line = String::new();
            for (i, (cell, width)) in cells.iter().zip(&widths).enumerate() {
                if i + 1 == columns {
                    line.push_str(cell);
                } else {
                    let _ = write!(line, "{cell:<width$}  ");
                }
            }
            let _ = writeln!(out, "{}", truncate(line.trim_end(), max_width));
        }
        out
    }
}

fn truncate(line: &str, max_width: usize) -> String {
    if line.chars().count() <= max_width || max_width == 0 {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(max_width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
