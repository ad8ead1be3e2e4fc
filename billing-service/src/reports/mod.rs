//! Usage summaries over ledger entries: per tenant, per month and per year.
//!
//! Utility tenants (the water pump, the shop) are totalled separately from
//! families. Entries whose date does not parse are left out of the monthly
//! and yearly views.

use std::collections::BTreeMap;

use billing_client::sheet::LedgerEntry;
use serde::{Deserialize, Serialize};
use time::Month;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    pub utility_tenants: Vec<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            utility_tenants: vec!["Water Motor".to_string(), "Shop".to_string()],
        }
    }
}

impl ReportOptions {
    pub fn is_utility(&self, tenant_name: &str) -> bool {
        self.utility_tenants.iter().any(|u| u == tenant_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    pub units: f64,
    pub water_units: f64,
    pub bill: f64,
    pub utility_units: f64,
    pub utility_bill: f64,
}

impl Totals {
    fn add(&mut self, entry: &LedgerEntry, utility: bool) {
        if utility {
            self.utility_units += entry.units_consumed;
            self.utility_bill += entry.total_bill;
        } else {
            self.units += entry.units_consumed;
            self.water_units += entry.water_units;
            self.bill += entry.total_bill;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantHistory {
    pub tenant_name: String,
    /// Newest first.
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub totals: Totals,
    pub entries: Vec<LedgerEntry>,
    pub utility_entries: Vec<LedgerEntry>,
}

impl PeriodSummary {
    fn add(&mut self, entry: &LedgerEntry, utility: bool) {
        self.totals.add(entry, utility);
        if utility {
            self.utility_entries.push(entry.clone());
        } else {
            self.entries.push(entry.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthSummary {
    pub year: i32,
    pub month: u8,
    /// e.g. "May 2024"
    pub label: String,
    #[serde(flatten)]
    pub summary: PeriodSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearSummary {
    pub year: i32,
    #[serde(flatten)]
    pub summary: PeriodSummary,
    /// Newest first.
    pub months: Vec<MonthSummary>,
}

/// Entries grouped by tenant (alphabetical), each tenant's newest first.
/// Utility tenants are left out.
pub fn tenant_history(entries: &[LedgerEntry], opts: &ReportOptions) -> Vec<TenantHistory> {
    let mut by_tenant: BTreeMap<&str, Vec<LedgerEntry>> = BTreeMap::new();
    for entry in entries.iter().filter(|e| !opts.is_utility(&e.tenant_name)) {
        by_tenant.entry(entry.tenant_name.as_str()).or_default().push(entry.clone());
    }
    by_tenant
        .into_iter()
        .map(|(name, mut entries)| {
            // Undated rows sort last.
            entries.sort_by(|a, b| b.parsed_date().cmp(&a.parsed_date()));
            TenantHistory {
                tenant_name: name.to_string(),
                entries,
            }
        })
        .collect()
}

fn month_summaries(groups: BTreeMap<(i32, u8), PeriodSummary>) -> Vec<MonthSummary> {
    groups
        .into_iter()
        .rev()
        .map(|((year, month), summary)| MonthSummary {
            year,
            month,
            label: Month::try_from(month)
                .map(|m| format!("{m} {year}"))
                .unwrap_or_else(|_| format!("{year}-{month:02}")),
            summary,
        })
        .collect()
}

pub fn monthly_summary(entries: &[LedgerEntry], opts: &ReportOptions) -> Vec<MonthSummary> {
    let mut months: BTreeMap<(i32, u8), PeriodSummary> = BTreeMap::new();
    for entry in entries {
        let Some(date) = entry.parsed_date() else {
            continue;
        };
        months
            .entry((date.year(), u8::from(date.month())))
            .or_default()
            .add(entry, opts.is_utility(&entry.tenant_name));
    }
    month_summaries(months)
}

pub fn yearly_summary(entries: &[LedgerEntry], opts: &ReportOptions) -> Vec<YearSummary> {
    let mut years: BTreeMap<i32, (PeriodSummary, BTreeMap<(i32, u8), PeriodSummary>)> = BTreeMap::new();
    for entry in entries {
        let Some(date) = entry.parsed_date() else {
            continue;
        };
        let utility = opts.is_utility(&entry.tenant_name);
        let (year, months) = years.entry(date.year()).or_default();
        year.add(entry, utility);
        months
            .entry((date.year(), u8::from(date.month())))
            .or_default()
            .add(entry, utility);
    }
    years
        .into_iter()
        .rev()
        .map(|(year, (summary, months))| YearSummary {
            year,
            summary,
            months: month_summaries(months),
        })
        .collect()
}
