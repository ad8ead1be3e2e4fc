//! Fixed nine-column ledger layout shared by every tabular store.

use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date};

use crate::domain::{format_amount, parse_amount, BillRecord};

pub const COLUMN_COUNT: usize = 9;

pub const HEADER: [&str; COLUMN_COUNT] = [
    "Tenant Name",
    "Previous Reading",
    "Current Reading",
    "Units Consumed",
    "Cost per Unit",
    "Total Bill",
    "Date",
    "Water Units",
    "Water Cost",
];

const HEADER_KEYWORDS: [&str; 8] = [
    "tenant", "name", "reading", "cost", "bill", "unit", "date", "water",
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("row {0} is empty")]
    Empty(usize),
}

pub fn header_row() -> Vec<String> {
    HEADER.iter().map(|h| h.to_string()).collect()
}

/// A row is treated as a header when any cell mentions a column keyword.
pub fn is_header_row(row: &[String]) -> bool {
    row.iter().any(|cell| {
        let lower = cell.to_lowercase();
        HEADER_KEYWORDS.iter().any(|k| lower.contains(k))
    })
}

/// Serialize a record into the ledger column order, rounding to 2 decimals.
pub fn encode_record(record: &BillRecord) -> Vec<String> {
    vec![
        record.tenant_name.clone(),
        format_amount(record.previous_reading),
        format_amount(record.current_reading),
        format_amount(record.units_consumed),
        format_amount(record.cost_per_unit),
        format_amount(record.total_bill),
        record.iso_date(),
        format_amount(record.water_units),
        format_amount(record.water_cost),
    ]
}

/// A ledger row as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// 1-based row number in the sheet, header included.
    pub row_number: usize,
    pub tenant_name: String,
    pub previous_reading: f64,
    pub current_reading: f64,
    pub units_consumed: f64,
    pub cost_per_unit: f64,
    pub total_bill: f64,
    pub date: String,
    pub water_units: f64,
    pub water_cost: f64,
    pub has_water_data: bool,
}

impl LedgerEntry {
    pub fn parsed_date(&self) -> Option<Date> {
        let fmt = format_description!("[year]-[month]-[day]");
        let trimmed = self.date.trim();
        let day = trimmed.get(..10).unwrap_or(trimmed);
        Date::parse(day, &fmt).ok()
    }

    /// Loose identity used to find a row again before deleting it.
    pub fn same_entry(&self, other: &LedgerEntry) -> bool {
        self.tenant_name == other.tenant_name
            && self.date == other.date
            && (self.current_reading - other.current_reading).abs() < 0.01
            && (self.total_bill - other.total_bill).abs() < 0.01
    }
}

pub fn decode_row(row: &[String], row_number: usize) -> Result<LedgerEntry, RowError> {
    if row.is_empty() {
        return Err(RowError::Empty(row_number));
    }
    let cell = |idx: usize| row.get(idx).map(String::as_str).unwrap_or("");
    let water_units_raw = cell(7);
    let water_cost_raw = cell(8);
    let water_units = parse_amount(water_units_raw);
    let water_cost = parse_amount(water_cost_raw);

    Ok(LedgerEntry {
        row_number,
        tenant_name: cell(0).to_string(),
        previous_reading: parse_amount(cell(1)),
        current_reading: parse_amount(cell(2)),
        units_consumed: parse_amount(cell(3)),
        cost_per_unit: parse_amount(cell(4)),
        total_bill: parse_amount(cell(5)),
        date: cell(6).to_string(),
        water_units,
        water_cost,
        has_water_data: !water_units_raw.is_empty()
            || !water_cost_raw.is_empty()
            || water_units > 0.0
            || water_cost > 0.0,
    })
}

/// Decode every data row, skipping a detected header and empty rows.
pub fn ledger_entries(rows: &[Vec<String>]) -> Vec<LedgerEntry> {
    let start = data_start(rows);
    rows.iter()
        .enumerate()
        .skip(start)
        .filter_map(|(idx, row)| decode_row(row, idx + 1).ok())
        .collect()
}

/// Index of the first data row (1 when row 0 looks like a header).
pub fn data_start(rows: &[Vec<String>]) -> usize {
    match rows.first() {
        Some(first) if is_header_row(first) => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn encode_record_follows_column_order() {
        let record = BillRecord {
            tenant_name: "Family 1".to_string(),
            previous_reading: 100.0,
            current_reading: 150.0,
            units_consumed: 50.0,
            cost_per_unit: 10.0,
            electricity_cost: 500.0,
            water_units: 36.363636,
            water_cost: 363.636363,
            total_bill: 863.636363,
            date: date!(2024 - 01 - 31),
        };
        let row = encode_record(&record);
        assert_eq!(row.len(), COLUMN_COUNT);
        assert_eq!(
            row,
            strings(&[
                "Family 1", "100", "150", "50", "10", "863.64", "2024-01-31", "36.36", "363.64"
            ])
        );
    }

    #[test]
    fn header_detection_uses_keywords() {
        assert!(is_header_row(&header_row()));
        assert!(is_header_row(&strings(&["TENANT"])));
        assert!(!is_header_row(&strings(&["Shop", "100", "150"])));
    }

    #[test]
    fn short_rows_decode_with_zero_defaults() {
        let entry = decode_row(&strings(&["Shop", "100", "150"]), 4).unwrap();
        assert_eq!(entry.row_number, 4);
        assert_eq!(entry.current_reading, 150.0);
        assert_eq!(entry.total_bill, 0.0);
        assert_eq!(entry.date, "");
        assert!(!entry.has_water_data);
        assert!(entry.parsed_date().is_none());
    }

    #[test]
    fn ledger_entries_skip_header_and_number_rows_from_one() {
        let rows = vec![
            header_row(),
            strings(&["Shop", "100", "150", "50", "10", "500", "2024-02-01", "0", "0"]),
            vec![],
            strings(&["Water Motor", "0", "100", "100", "10", "1000", "2024-02-01"]),
        ];
        let entries = ledger_entries(&rows);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].row_number, 2);
        assert_eq!(entries[1].row_number, 4);
        assert_eq!(entries[0].parsed_date(), Some(date!(2024 - 02 - 01)));
        assert!(entries[0].has_water_data);
    }

    #[test]
    fn same_entry_tolerates_rounding_noise() {
        let a = decode_row(&strings(&["Shop", "1", "150", "", "", "500", "2024-02-01"]), 2).unwrap();
        let mut b = a.clone();
        b.total_bill += 0.005;
        b.row_number = 9;
        assert!(a.same_entry(&b));
        b.date = "2024-02-02".to_string();
        assert!(!a.same_entry(&b));
    }
}
