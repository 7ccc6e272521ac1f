//! Box-drawn tables.

use console::measure_text_width;

#[derive(Debug)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    widths: Vec<usize>,
    right_aligned: Vec<bool>,
}

impl Table {
    pub fn new(headers: Vec<&str>) -> Self {
        Self {
            widths: headers.iter().map(|h| measure_text_width(h)).collect(),
            right_aligned: vec![false; headers.len()],
            headers: headers.into_iter().map(String::from).collect(),
            rows: Vec::new(),
        }
    }

    /// Right-align a column (numbers).
    pub fn align_right(mut self, column: usize) -> Self {
        if let Some(flag) = self.right_aligned.get_mut(column) {
            *flag = true;
        }
        self
    }

    /// Extra cells beyond the header count are dropped.
    pub fn add_row(&mut self, row: Vec<&str>) {
        let row: Vec<String> = row
            .into_iter()
            .take(self.headers.len())
            .map(String::from)
            .collect();
        for (width, cell) in self.widths.iter_mut().zip(&row) {
            *width = (*width).max(measure_text_width(cell));
        }
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            self.border('┌', '┬', '┐'),
            self.line(&self.headers),
            self.border('├', '┼', '┤'),
        ];
        lines.extend(self.rows.iter().map(|row| self.line(row)));
        lines.push(self.border('└', '┴', '┘'));
        lines.join("\n")
    }

    fn border(&self, left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = self.widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{}{}{}", left, segments.join(&mid.to_string()), right)
    }

    fn line(&self, row: &[String]) -> String {
        let mut s = String::from("│");
        for (i, width) in self.widths.iter().enumerate() {
            let cell = row.get(i).map(String::as_str).unwrap_or("");
            let pad = " ".repeat(width - measure_text_width(cell));
            if self.right_aligned[i] {
                s.push_str(&format!(" {}{} │", pad, cell));
            } else {
                s.push_str(&format!(" {}{} │", cell, pad));
            }
        }
        s
    }
}
