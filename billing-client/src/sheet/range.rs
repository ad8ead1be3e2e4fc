use std::fmt;

use serde::{Deserialize, Serialize};

use super::rows::COLUMN_COUNT;

/// A rectangular slice of a sheet, addressed by 1-based row numbers.
///
/// `rows: None` means every populated row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub sheet: String,
    pub rows: Option<(usize, usize)>,
    pub columns: usize,
}

impl RangeSpec {
    /// `Sheet1!A1:I1`
    pub fn header(sheet: &str) -> Self {
        Self {
            sheet: sheet.to_string(),
            rows: Some((1, 1)),
            columns: COLUMN_COUNT,
        }
    }

    /// `Sheet1!A:I`
    pub fn ledger(sheet: &str) -> Self {
        Self {
            sheet: sheet.to_string(),
            rows: None,
            columns: COLUMN_COUNT,
        }
    }

    /// A1 notation, used for logging and for stores that speak it natively.
    pub fn a1(&self) -> String {
        let last = column_letter(self.columns.max(1));
        match self.rows {
            Some((from, to)) => format!("{}!A{from}:{last}{to}", self.sheet),
            None => format!("{}!A:{last}", self.sheet),
        }
    }

    /// Zero-based row window `[start, end)` for in-memory row slices.
    pub fn row_window(&self, total_rows: usize) -> (usize, usize) {
        match self.rows {
            Some((from, to)) => {
                let start = from.saturating_sub(1).min(total_rows);
                let end = to.min(total_rows).max(start);
                (start, end)
            }
            None => (0, total_rows),
        }
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.a1())
    }
}

fn column_letter(index: usize) -> String {
    let mut n = index;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    out.iter().rev().collect()
}
