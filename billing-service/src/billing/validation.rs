//! Form input checks run before anything reaches the ledger.

use std::collections::BTreeMap;

use billing_client::domain::{parse_amount, BillRecord, MeterId, MeterReading, Tariff};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    error::{BillingError, ValidationErrors},
    household::{Household, PreviousReadings},
};

pub const COST_REQUIRED: &str = "Cost per unit is required";
pub const NOT_POSITIVE: &str = "Must be a valid positive number";
pub const NOT_INCREASING: &str = "Must be greater than previous reading";
pub const NOTHING_READ: &str = "Please enter at least one current reading";
pub const TENANT_REQUIRED: &str = "Tenant name is required";

/// Water share attached to a single-reading submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterInput {
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub cost: String,
}

/// One tenant's reading as entered. Numbers stay as text until parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillForm {
    pub tenant_name: String,
    #[serde(default)]
    pub previous_reading: String,
    #[serde(default)]
    pub current_reading: String,
    #[serde(default)]
    pub cost_per_unit: String,
    #[serde(default)]
    pub water: Option<WaterInput>,
}

impl BillForm {
    pub fn validate(&self) -> Result<(), BillingError> {
        let mut errors = ValidationErrors::new();
        if self.tenant_name.trim().is_empty() {
            errors.add("tenant_name", TENANT_REQUIRED);
        }
        errors.into_result()
    }

    /// Build the record with permissive parsing: blank or unparsable numbers
    /// count as zero.
    pub fn to_record(&self, date: Date) -> BillRecord {
        let previous_reading = parse_amount(&self.previous_reading);
        let current_reading = parse_amount(&self.current_reading);
        let cost_per_unit = parse_amount(&self.cost_per_unit);
        let units_consumed = current_reading - previous_reading;
        let electricity_cost = units_consumed * cost_per_unit;

        let record = BillRecord {
            tenant_name: self.tenant_name.trim().to_string(),
            previous_reading,
            current_reading,
            units_consumed,
            cost_per_unit,
            electricity_cost,
            water_units: 0.0,
            water_cost: 0.0,
            total_bill: electricity_cost,
            date,
        };
        match &self.water {
            Some(w) => record.with_water(parse_amount(&w.units), parse_amount(&w.cost)),
            None => record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingInput {
    pub meter_id: MeterId,
    #[serde(default)]
    pub current_reading: String,
}

/// A whole household run: one tariff and a current reading per meter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunForm {
    #[serde(default)]
    pub cost_per_unit: String,
    #[serde(default)]
    pub readings: Vec<ReadingInput>,
}

fn strict_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Check a run form against the known previous readings and turn it into
/// readings for the engine. Errors are keyed by `cost_per_unit`, meter id or
/// `readings`.
pub fn validate_run(
    form: &RunForm,
    household: &Household,
    previous: &PreviousReadings,
) -> Result<(Tariff, Vec<MeterReading>), BillingError> {
    let mut errors = ValidationErrors::new();

    let cost = form.cost_per_unit.trim();
    let tariff = if cost.is_empty() {
        errors.add("cost_per_unit", COST_REQUIRED);
        None
    } else {
        let tariff = strict_number(cost).map(Tariff::new).filter(Tariff::is_positive);
        if tariff.is_none() {
            errors.add("cost_per_unit", NOT_POSITIVE);
        }
        tariff
    };

    let mut current = BTreeMap::new();
    for input in &form.readings {
        if household.meter(&input.meter_id).is_none() {
            errors.add(input.meter_id.as_str(), "Unknown meter");
            continue;
        }
        let raw = input.current_reading.trim();
        if raw.is_empty() {
            continue;
        }
        match strict_number(raw) {
            Some(v) if v >= 0.0 => {
                if v <= previous.get(&input.meter_id) {
                    errors.add(input.meter_id.as_str(), NOT_INCREASING);
                } else {
                    current.insert(input.meter_id.clone(), v);
                }
            }
            _ => errors.add(input.meter_id.as_str(), NOT_POSITIVE),
        }
    }

    if errors.is_empty() && current.is_empty() {
        errors.add("readings", NOTHING_READ);
    }

    match tariff {
        Some(tariff) if errors.is_empty() => Ok((tariff, household.readings(&previous.readings, &current))),
        _ => {
            metrics::counter!("validation_rejected_total").increment(1);
            tracing::debug!(fields = errors.len(), "run form rejected");
            Err(BillingError::Validation(errors))
        }
    }
}
