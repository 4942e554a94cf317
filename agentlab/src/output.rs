//! Output rendering: aligned text tables or JSON.
//!
//! Command output goes to stdout. In `--json` mode every command prints
//! exactly one JSON document (or one object per line for tail commands).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Pretty-printed JSON document.
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string_pretty(value).context("encode JSON output")?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{text}").context("write stdout")?;
        Ok(())
    }

    /// One compact JSON object per line.
    pub fn json_line<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value).context("encode JSON output")?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{text}").context("write stdout")?;
        stdout.flush().context("flush stdout")?;
        Ok(())
    }

    pub fn line(&self, text: impl AsRef<str>) {
        println!("{}", text.as_ref());
    }

    /// Diagnostics that must not pollute stdout.
    pub fn warn(&self, text: impl AsRef<str>) {
        eprintln!("Warning: {}", text.as_ref());
    }

    /// JSON in `--json` mode, else whatever `text` prints.
    pub fn render<T: Serialize + ?Sized>(&self, value: &T, text: impl FnOnce()) -> Result<()> {
        if self.json {
            self.json(value)
        } else {
            text();
            Ok(())
        }
    }
}

/// Column-aligned table, two spaces between columns.
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    pub fn render(&self) -> String {
        let columns = self.headers.len();
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate().take(columns) {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let format_row = |cells: &[String]| {
            let mut line = String::new();
            for (i, &width) in widths.iter().enumerate() {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                if i + 1 == columns {
                    line.push_str(cell);
                } else {
                    line.push_str(&format!("{cell:<width$}  "));
                }
            }
            line.trim_end().to_string()
        };

        let mut out = vec![format_row(&self.headers)];
        out.extend(self.rows.iter().map(|r| format_row(r)));
        out.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}

/// Render an optional value, `-` when absent or empty.
pub fn or_dash<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "-".to_string())
}

/// Daemon timestamps are opaque strings; RFC 3339 ones are shown in UTC.
pub fn format_timestamp(raw: Option<&str>) -> String {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => "-".to_string(),
        Some(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => ts
                .with_timezone(&Utc)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            Err(_) => s.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_alignment() {
        let mut table = Table::new(["VMID", "STATE", "IP"]);
        table.row(["9001", "RUNNING", "10.77.0.5"]);
        table.row(["12", "STOPPED", ""]);
        assert_eq!(
            table.render(),
            "VMID  STATE    IP\n9001  RUNNING  10.77.0.5\n12    STOPPED"
        );
    }

    #[test]
    fn test_or_dash() {
        assert_eq!(or_dash(Some(9001)), "9001");
        assert_eq!(or_dash(Some("")), "-");
        assert_eq!(or_dash(None::<u32>), "-");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(
            format_timestamp(Some("2026-02-01T10:00:00+02:00")),
            "2026-02-01 08:00:00"
        );
        assert_eq!(format_timestamp(Some("yesterday")), "yesterday");
        assert_eq!(format_timestamp(None), "-");
    }
}
