pub mod amount;
pub mod bill;
pub mod family;
pub mod identity;
pub mod meter;
pub mod tariff;

pub use amount::{format_amount, parse_amount, round2};
pub use bill::BillRecord;
pub use family::{check_member_count, FamilyConfig, FamilyConfigError, MAX_MEMBERS};
pub use identity::Identity;
pub use meter::{MeterId, MeterReading, MeterRole};
pub use tariff::Tariff;
