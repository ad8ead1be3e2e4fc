pub mod range;
pub mod rows;

pub use range::RangeSpec;
pub use rows::{
    data_start, decode_row, encode_record, header_row, is_header_row, ledger_entries, LedgerEntry,
    RowError, COLUMN_COUNT, HEADER,
};
