use std::fmt::Write;

use anyhow::{bail, Context};
use serde::Serialize;
use serde_json::Value;

use crate::utils::escape_html;

/// Rows added by the running task, shown in report and completion mails
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Report {
    columns: Vec<String>,
    rows: Vec<Row>,
    next_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    index: usize,
    cells: Vec<(String, Value)>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Appends a row, `row` must serialize to a map
    pub fn push<T: Serialize + ?Sized>(&mut self, row: &T) -> anyhow::Result<()> {
        let value = serde_json::to_value(row).context("Failed to serialize report row")?;
        let Value::Object(map) = value else {
            bail!("Report rows must serialize to a map of column to value, got: {value}");
        };
        for key in map.keys() {
            if !self.columns.contains(key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(Row {
            index: self.next_index,
            cells: map.into_iter().collect(),
        });
        self.next_index += 1;
        Ok(())
    }

    /// Appends every row of `other` keeping their original indices
    pub fn extend(&mut self, other: Report) {
        for column in other.columns {
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
        self.next_index = self.next_index.max(other.next_index);
        self.rows.extend(other.rows);
    }

    /// The last `n` rows
    pub fn tail(&self, n: usize) -> Report {
        let start = self.rows.len().saturating_sub(n);
        let rows = self.rows[start..].to_vec();
        let columns = self
            .columns
            .iter()
            .filter(|c| rows.iter().any(|r| r.get(c).is_some()))
            .cloned()
            .collect();
        Report {
            columns,
            rows,
            next_index: self.next_index,
        }
    }

    /// Markdown style table, numeric columns are right aligned
    pub fn to_pipe_table(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut header = vec![String::new()];
        header.extend(self.columns.iter().cloned());
        let body: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                let mut line = vec![row.index.to_string()];
                line.extend(self.columns.iter().map(|c| row.cell_text(c)));
                line
            })
            .collect();
        let numeric: Vec<bool> = (0..header.len())
            .map(|i| i == 0 || self.rows.iter().all(|r| r.is_numeric(&header[i])))
            .collect();
        let widths: Vec<usize> = (0..header.len())
            .map(|i| {
                body.iter()
                    .map(|line| line[i].chars().count())
                    .chain(std::iter::once(header[i].chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        let format_line = |out: &mut String, cells: &[String]| {
            out.push('|');
            for (i, cell) in cells.iter().enumerate() {
                let w = widths[i];
                // Writing to a String is infallible
                let _ = if numeric[i] {
                    write!(out, " {cell:>w$} |")
                } else {
                    write!(out, " {cell:<w$} |")
                };
            }
            out.push('\n');
        };
        format_line(&mut out, &header);
        out.push('|');
        for (i, w) in widths.iter().enumerate() {
            let dashes = "-".repeat(w + 1);
            if numeric[i] {
                out.push_str(&format!("{dashes}:|"));
            } else {
                out.push_str(&format!(":{dashes}|"));
            }
        }
        out.push('\n');
        for line in &body {
            format_line(&mut out, line);
        }
        out.pop();
        out
    }

    pub fn to_html(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut out = String::from("<table border=\"1\" class=\"report\">\n  <thead>\n    <tr>\n      <th></th>\n");
        for column in &self.columns {
            out.push_str(&format!("      <th>{}</th>\n", escape_html(column)));
        }
        out.push_str("    </tr>\n  </thead>\n  <tbody>\n");
        for row in &self.rows {
            out.push_str(&format!("    <tr>\n      <th>{}</th>\n", row.index));
            for column in &self.columns {
                out.push_str(&format!(
                    "      <td>{}</td>\n",
                    escape_html(&row.cell_text(column))
                ));
            }
            out.push_str("    </tr>\n");
        }
        out.push_str("  </tbody>\n</table>");
        out
    }
}

impl Row {
    fn get(&self, column: &str) -> Option<&Value> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// Missing cells count as numeric so they do not change a column's alignment
    fn is_numeric(&self, column: &str) -> bool {
        matches!(self.get(column), None | Some(Value::Number(_)) | Some(Value::Null))
    }

    fn cell_text(&self, column: &str) -> String {
        match self.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}
