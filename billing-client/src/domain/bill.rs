use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date};

/// One tenant's bill for one billing run.
///
/// Water fields hold the exact (unrounded) allocation; rounding to two
/// decimals happens when the record is rendered or written out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillRecord {
    pub tenant_name: String,
    pub previous_reading: f64,
    pub current_reading: f64,
    pub units_consumed: f64,
    pub cost_per_unit: f64,
    pub electricity_cost: f64,
    pub water_units: f64,
    pub water_cost: f64,
    pub total_bill: f64,
    pub date: Date,
}

impl BillRecord {
    pub fn iso_date(&self) -> String {
        let fmt = format_description!("[year]-[month]-[day]");
        self.date
            .format(&fmt)
            .unwrap_or_else(|_| self.date.to_string())
    }

    /// Water-only records carry a share of the shared pump but no consumption.
    pub fn is_water_only(&self) -> bool {
        self.units_consumed == 0.0 && self.water_units > 0.0
    }

    /// Return a copy with a water share attached and folded into the total.
    pub fn with_water(mut self, water_units: f64, water_cost: f64) -> Self {
        self.water_units = water_units;
        self.water_cost = water_cost;
        self.total_bill = self.electricity_cost + water_cost;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn record() -> BillRecord {
        BillRecord {
            tenant_name: "Family 1".to_string(),
            previous_reading: 10.0,
            current_reading: 10.0,
            units_consumed: 0.0,
            cost_per_unit: 10.0,
            electricity_cost: 0.0,
            water_units: 0.0,
            water_cost: 0.0,
            total_bill: 0.0,
            date: date!(2024 - 03 - 07),
        }
    }

    #[test]
    fn iso_date_is_calendar_date() {
        assert_eq!(record().iso_date(), "2024-03-07");
    }

    #[test]
    fn with_water_adds_cost_to_total() {
        let r = record().with_water(36.36, 363.64);
        assert_eq!(r.total_bill, 363.64);
        assert!(r.is_water_only());
    }
}
