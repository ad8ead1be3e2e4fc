//! Bill computation and shared-utility allocation.
//!
//! Everything in here is pure: no IO, no clock, no session.

pub mod validation;

use billing_client::domain::{BillRecord, FamilyConfig, MeterId, MeterReading, MeterRole, Tariff};
use serde::Serialize;
use time::Date;

pub use validation::{validate_run, BillForm, ReadingInput, RunForm, WaterInput};

/// Bill one meter on its own consumption. Water fields start at zero.
pub fn compute_individual_bill(reading: &MeterReading, tariff: &Tariff, date: Date) -> BillRecord {
    let previous = reading.previous_reading;
    let current = reading.current_reading.unwrap_or(0.0);
    let units_consumed = current - previous;
    let electricity_cost = units_consumed * tariff.cost_per_unit;

    BillRecord {
        tenant_name: reading.display_name.clone(),
        previous_reading: previous,
        current_reading: current,
        units_consumed,
        cost_per_unit: tariff.cost_per_unit,
        electricity_cost,
        water_units: 0.0,
        water_cost: 0.0,
        total_bill: electricity_cost,
        date,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyShare {
    pub meter_id: MeterId,
    pub display_name: String,
    pub member_count: u32,
    /// Exact share; round only when displaying.
    pub units_share: f64,
    pub cost_share: f64,
}

/// Split of one water-source reading across families.
///
/// Shares are exact. Rounding units and cost independently for display means
/// the displayed cost shares need not add up to the displayed total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub source: MeterId,
    pub total_units: f64,
    pub total_cost: f64,
    pub total_members: u64,
    pub shares: Vec<FamilyShare>,
}

impl Allocation {
    pub fn share_for(&self, meter_id: &MeterId) -> Option<&FamilyShare> {
        self.shares.iter().find(|s| &s.meter_id == meter_id)
    }
}

pub fn allocate_shared_utility(
    source: &MeterReading,
    tariff: &Tariff,
    families: &[FamilyConfig],
) -> Allocation {
    let total_units = source.units().unwrap_or(0.0).max(0.0);
    let total_cost = total_units * tariff.cost_per_unit;
    let total_members: u64 = families.iter().map(|f| u64::from(f.member_count)).sum();

    let shares = families
        .iter()
        .map(|f| {
            let (units_share, cost_share) = if total_members == 0 {
                (0.0, 0.0)
            } else {
                let members = f64::from(f.member_count);
                let total = total_members as f64;
                (total_units * members / total, total_cost * members / total)
            };
            FamilyShare {
                meter_id: f.meter_id.clone(),
                display_name: f.display_name.clone(),
                member_count: f.member_count,
                units_share,
                cost_share,
            }
        })
        .collect();

    Allocation {
        source: source.meter_id.clone(),
        total_units,
        total_cost,
        total_members,
        shares,
    }
}

/// Allocation for whichever water source in `readings` was read, if any.
pub fn compute_allocation(
    readings: &[MeterReading],
    tariff: &Tariff,
    families: &[FamilyConfig],
) -> Option<Allocation> {
    readings
        .iter()
        .find(|r| r.role == MeterRole::WaterSource && r.is_read())
        .map(|source| allocate_shared_utility(source, tariff, families))
}

/// A family's share of the household in hundredths of a percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilyPercentage {
    pub meter_id: MeterId,
    pub hundredths: u32,
}

impl FamilyPercentage {
    pub fn percent(&self) -> f64 {
        f64::from(self.hundredths) / 100.0
    }
}

/// Member-count percentages rounded to two decimals, with the rounding
/// remainder given to the largest family so the total is exactly 100.00.
///
/// Ties for largest go to the family listed first.
pub fn normalize_percentages(families: &[FamilyConfig]) -> Vec<FamilyPercentage> {
    let total: u64 = families.iter().map(|f| u64::from(f.member_count)).sum();
    if total == 0 {
        return families
            .iter()
            .map(|f| FamilyPercentage {
                meter_id: f.meter_id.clone(),
                hundredths: 0,
            })
            .collect();
    }

    // round(members / total * 10000), half away from zero, in integers.
    let mut rounded: Vec<i64> = families
        .iter()
        .map(|f| ((u64::from(f.member_count) * 20_000 + total) / (2 * total)) as i64)
        .collect();

    let diff = 10_000 - rounded.iter().sum::<i64>();
    if diff != 0 {
        let mut largest = 0;
        for (idx, f) in families.iter().enumerate() {
            if f.member_count > families[largest].member_count {
                largest = idx;
            }
        }
        rounded[largest] += diff;
    }

    families
        .iter()
        .zip(rounded)
        .map(|(f, hundredths)| FamilyPercentage {
            meter_id: f.meter_id.clone(),
            hundredths: hundredths.max(0) as u32,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingRun {
    /// Water-source record first, then one record per billed meter in
    /// enumeration order.
    pub records: Vec<BillRecord>,
    pub allocation: Option<Allocation>,
    /// Readings to start the next run from.
    pub next_readings: Vec<MeterReading>,
}

pub fn build_billing_run(
    readings: &[MeterReading],
    tariff: &Tariff,
    families: &[FamilyConfig],
    date: Date,
) -> BillingRun {
    let source = readings
        .iter()
        .find(|r| r.role == MeterRole::WaterSource && r.is_read());
    let allocation = source.map(|s| allocate_shared_utility(s, tariff, families));

    let mut records = Vec::with_capacity(readings.len());
    if let Some(source) = source {
        records.push(compute_individual_bill(source, tariff, date));
    }

    for reading in readings.iter().filter(|r| r.role != MeterRole::WaterSource) {
        let share = allocation
            .as_ref()
            .and_then(|a| a.share_for(&reading.meter_id))
            .map(|s| (s.units_share, s.cost_share))
            .unwrap_or((0.0, 0.0));

        match (reading.is_read(), reading.role) {
            (true, MeterRole::FamilyMember) => {
                let bill = compute_individual_bill(reading, tariff, date);
                records.push(bill.with_water(share.0, share.1));
            }
            (true, _) => records.push(compute_individual_bill(reading, tariff, date)),
            (false, MeterRole::FamilyMember) if share.0 > 0.0 => {
                records.push(water_only_bill(reading, tariff, share.0, share.1, date));
            }
            _ => {}
        }
    }

    BillingRun {
        records,
        allocation,
        next_readings: readings.iter().map(MeterReading::advanced).collect(),
    }
}

fn water_only_bill(
    reading: &MeterReading,
    tariff: &Tariff,
    water_units: f64,
    water_cost: f64,
    date: Date,
) -> BillRecord {
    BillRecord {
        tenant_name: reading.display_name.clone(),
        previous_reading: reading.previous_reading,
        current_reading: reading.previous_reading,
        units_consumed: 0.0,
        cost_per_unit: tariff.cost_per_unit,
        electricity_cost: 0.0,
        water_units,
        water_cost,
        total_bill: water_cost,
        date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billing_client::domain::round2;
    use time::macros::date;

    const DAY: Date = date!(2024 - 05 - 01);

    fn families(counts: &[u32]) -> Vec<FamilyConfig> {
        counts
            .iter()
            .enumerate()
            .map(|(i, c)| {
                FamilyConfig::new(format!("family{}", i + 1).as_str(), format!("Family {}", i + 1), *c)
                    .unwrap()
            })
            .collect()
    }

    fn water(prev: f64, cur: Option<f64>) -> MeterReading {
        MeterReading::new("water_motor", "Water Motor", MeterRole::WaterSource, prev, cur)
    }

    fn family(n: usize, prev: f64, cur: Option<f64>) -> MeterReading {
        MeterReading::new(
            format!("family{n}").as_str(),
            format!("Family {n}"),
            MeterRole::FamilyMember,
            prev,
            cur,
        )
    }

    #[test]
    fn shop_bill_example() {
        let shop = MeterReading::new("shop", "Shop", MeterRole::Independent, 100.0, Some(150.0));
        let bill = compute_individual_bill(&shop, &Tariff::new(10.0), DAY);
        assert_eq!(bill.units_consumed, 50.0);
        assert_eq!(bill.electricity_cost, 500.0);
        assert_eq!(bill.total_bill, 500.0);
        assert_eq!(bill.water_units, 0.0);
        assert_eq!(bill.water_cost, 0.0);
    }

    #[test]
    fn individual_bill_is_idempotent() {
        let r = family(1, 12.5, Some(40.25));
        let t = Tariff::new(7.3);
        assert_eq!(compute_individual_bill(&r, &t, DAY), compute_individual_bill(&r, &t, DAY));
    }

    #[test]
    fn zero_tariff_gives_zero_cost() {
        let r = family(1, 0.0, Some(10.0));
        let bill = compute_individual_bill(&r, &Tariff::new(0.0), DAY);
        assert_eq!(bill.units_consumed, 10.0);
        assert_eq!(bill.total_bill, 0.0);
    }

    #[test]
    fn water_allocation_example() {
        let alloc = allocate_shared_utility(&water(0.0, Some(100.0)), &Tariff::new(10.0), &families(&[4, 4, 2, 1]));
        assert_eq!(alloc.total_units, 100.0);
        assert_eq!(alloc.total_cost, 1000.0);
        assert_eq!(alloc.total_members, 11);

        let f1 = alloc.share_for(&MeterId::new("family1")).unwrap();
        assert_eq!(round2(f1.units_share), 36.36);
        assert_eq!(round2(f1.cost_share), 363.64);
        assert!((f1.cost_share - 4000.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn shares_sum_to_totals_unrounded() {
        for (units, cost, counts) in [
            (100.0, 10.0, vec![4, 4, 2, 1]),
            (37.0, 3.3, vec![1, 2, 3]),
            (0.0, 10.0, vec![5]),
            (1234.5, 0.0, vec![7, 1, 1]),
            (99.99, 12.34, vec![3, 3, 3]),
        ] {
            let alloc = allocate_shared_utility(&water(10.0, Some(10.0 + units)), &Tariff::new(cost), &families(&counts));
            let unit_sum: f64 = alloc.shares.iter().map(|s| s.units_share).sum();
            let cost_sum: f64 = alloc.shares.iter().map(|s| s.cost_share).sum();
            assert!((unit_sum - alloc.total_units).abs() < 1e-9, "units {counts:?}");
            assert!((cost_sum - alloc.total_cost).abs() < 1e-9, "cost {counts:?}");
        }
    }

    #[test]
    fn no_members_means_zero_shares() {
        let alloc = allocate_shared_utility(&water(0.0, Some(50.0)), &Tariff::new(10.0), &[]);
        assert_eq!(alloc.total_members, 0);
        assert!(alloc.shares.is_empty());
        assert_eq!(alloc.total_cost, 500.0);
    }

    #[test]
    fn huge_member_counts_do_not_overflow_the_total() {
        let unchecked = |id: &str, count: u32| FamilyConfig {
            meter_id: MeterId::new(id),
            display_name: id.to_string(),
            member_count: count,
        };
        let fams = vec![unchecked("family1", u32::MAX), unchecked("family2", 2)];
        let alloc = allocate_shared_utility(&water(0.0, Some(100.0)), &Tariff::new(1.0), &fams);
        assert_eq!(alloc.total_members, u64::from(u32::MAX) + 2);
        let unit_sum: f64 = alloc.shares.iter().map(|s| s.units_share).sum();
        assert!((unit_sum - 100.0).abs() < 1e-6);
        assert!(alloc.shares[1].units_share > 0.0);
    }

    #[test]
    fn displayed_cost_shares_can_drift_from_total() {
        // 3 equal families sharing 100: each 33.33 displayed, sum 99.99.
        let alloc = allocate_shared_utility(&water(0.0, Some(10.0)), &Tariff::new(10.0), &families(&[1, 1, 1]));
        let displayed: f64 = alloc.shares.iter().map(|s| round2(s.cost_share)).sum();
        assert!((displayed - 99.99).abs() < 1e-9);
        assert_eq!(alloc.total_cost, 100.0);
    }

    #[test]
    fn percentages_example_gives_remainder_to_largest() {
        let pct = normalize_percentages(&families(&[4, 4, 2, 1]));
        let values: Vec<u32> = pct.iter().map(|p| p.hundredths).collect();
        assert_eq!(values, vec![3637, 3636, 1818, 909]);
        assert_eq!(pct[0].percent(), 36.37);
    }

    #[test]
    fn percentages_always_total_one_hundred() {
        for counts in [
            vec![1, 1, 1],
            vec![4, 4, 2, 1],
            vec![1, 1, 1, 1, 1, 1, 1],
            vec![7, 3, 9, 2],
            vec![1],
            vec![13, 17, 19, 23],
            vec![2, 2, 2, 2, 2, 2],
        ] {
            let total: u32 = normalize_percentages(&families(&counts)).iter().map(|p| p.hundredths).sum();
            assert_eq!(total, 10_000, "{counts:?}");
        }
    }

    #[test]
    fn percentage_tie_goes_to_first_listed() {
        // 1/3 each: 33.33 * 3 = 99.99, first family gets the extra 0.01.
        let pct = normalize_percentages(&families(&[2, 2, 2]));
        let values: Vec<u32> = pct.iter().map(|p| p.hundredths).collect();
        assert_eq!(values, vec![3334, 3333, 3333]);
    }

    #[test]
    fn percentages_with_no_members_are_zero() {
        assert!(normalize_percentages(&[]).is_empty());
    }

    fn household_readings(water_cur: Option<f64>, f1: Option<f64>, f3: Option<f64>) -> Vec<MeterReading> {
        vec![
            MeterReading::new("shop", "Shop", MeterRole::Independent, 100.0, Some(150.0)),
            family(1, 10.0, f1),
            family(2, 20.0, None),
            family(3, 30.0, f3),
            family(4, 40.0, None),
            water(0.0, water_cur),
        ]
    }

    #[test]
    fn billing_run_puts_water_source_first_then_enumeration_order() {
        let run = build_billing_run(
            &household_readings(Some(100.0), Some(20.0), None),
            &Tariff::new(10.0),
            &families(&[4, 4, 2, 1]),
            DAY,
        );
        let names: Vec<&str> = run.records.iter().map(|r| r.tenant_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Water Motor", "Shop", "Family 1", "Family 2", "Family 3", "Family 4"]
        );
        assert_eq!(run.records[0].total_bill, 1000.0);
    }

    #[test]
    fn read_family_gets_water_share_added_to_total() {
        let run = build_billing_run(
            &household_readings(Some(100.0), Some(20.0), None),
            &Tariff::new(10.0),
            &families(&[4, 4, 2, 1]),
            DAY,
        );
        let f1 = &run.records[2];
        assert_eq!(f1.units_consumed, 10.0);
        assert_eq!(f1.electricity_cost, 100.0);
        assert_eq!(round2(f1.water_units), 36.36);
        assert_eq!(round2(f1.water_cost), 363.64);
        assert!((f1.total_bill - (100.0 + 4000.0 / 11.0)).abs() < 1e-9);
    }

    #[test]
    fn unread_family_gets_water_only_record() {
        let run = build_billing_run(
            &household_readings(Some(100.0), Some(20.0), None),
            &Tariff::new(10.0),
            &families(&[4, 4, 2, 1]),
            DAY,
        );
        let f3 = run.records.iter().find(|r| r.tenant_name == "Family 3").unwrap();
        assert_eq!(f3.previous_reading, 30.0);
        assert_eq!(f3.current_reading, 30.0);
        assert_eq!(f3.units_consumed, 0.0);
        assert_eq!(f3.total_bill, f3.water_cost);
        assert!(f3.is_water_only());
    }

    #[test]
    fn without_water_reading_families_get_zero_water() {
        let run = build_billing_run(
            &household_readings(None, Some(20.0), Some(35.0)),
            &Tariff::new(10.0),
            &families(&[4, 4, 2, 1]),
            DAY,
        );
        assert!(run.allocation.is_none());
        let names: Vec<&str> = run.records.iter().map(|r| r.tenant_name.as_str()).collect();
        assert_eq!(names, vec!["Shop", "Family 1", "Family 3"]);
        assert!(run.records.iter().all(|r| r.water_cost == 0.0));
        assert_eq!(run.records[2].total_bill, 50.0);
    }

    #[test]
    fn zero_water_units_produce_no_water_only_records() {
        let run = build_billing_run(
            &household_readings(Some(0.0), None, None),
            &Tariff::new(10.0),
            &families(&[4, 4, 2, 1]),
            DAY,
        );
        let names: Vec<&str> = run.records.iter().map(|r| r.tenant_name.as_str()).collect();
        assert_eq!(names, vec!["Water Motor", "Shop"]);
    }

    #[test]
    fn next_readings_advance_only_read_meters() {
        let run = build_billing_run(
            &household_readings(Some(100.0), Some(20.0), None),
            &Tariff::new(10.0),
            &families(&[4, 4, 2, 1]),
            DAY,
        );
        let prev: Vec<f64> = run.next_readings.iter().map(|r| r.previous_reading).collect();
        assert_eq!(prev, vec![150.0, 20.0, 20.0, 30.0, 40.0, 100.0]);
        assert!(run.next_readings.iter().all(|r| r.current_reading.is_none()));
    }

    #[test]
    fn compute_allocation_needs_a_read_water_source() {
        let t = Tariff::new(10.0);
        let f = families(&[1, 1]);
        assert!(compute_allocation(&household_readings(None, None, None), &t, &f).is_none());
        let alloc = compute_allocation(&household_readings(Some(8.0), None, None), &t, &f).unwrap();
        assert_eq!(alloc.shares[0].units_share, 4.0);
    }
}
