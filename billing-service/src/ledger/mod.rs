//! The bill ledger: a nine-column sheet in the tabular store, accessed
//! through the current session.

use std::sync::Arc;

use billing_client::{
    domain::BillRecord,
    sheet::{data_start, decode_row, encode_record, header_row, ledger_entries, LedgerEntry, RangeSpec, COLUMN_COUNT},
};

use crate::{
    backend::TabularStore,
    error::BillingError,
    household::{Household, PreviousReadings},
    session::SessionManager,
};

pub const ENTRY_NOT_FOUND: &str = "Could not find the entry in the spreadsheet";

#[derive(Clone)]
pub struct BillLedger {
    store: Arc<dyn TabularStore>,
    session: Arc<SessionManager>,
    sheet: String,
}

impl BillLedger {
    pub fn new(store: Arc<dyn TabularStore>, session: Arc<SessionManager>, sheet: impl Into<String>) -> Self {
        Self {
            store,
            session,
            sheet: sheet.into(),
        }
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    async fn rows(&self, range: RangeSpec) -> Result<Vec<Vec<String>>, BillingError> {
        let store = &self.store;
        self.session
            .authorized("get_rows", |token| async move { store.get_rows(&token, &range).await })
            .await
    }

    /// Write the header row when it is missing or short. Anything but an
    /// authorization failure is logged and ignored.
    pub async fn ensure_header(&self) -> Result<(), BillingError> {
        let range = RangeSpec::header(&self.sheet);
        let result = match self.rows(range.clone()).await {
            Ok(rows) if rows.first().map(|r| r.len() >= COLUMN_COUNT).unwrap_or(false) => Ok(()),
            Ok(_) => {
                let store = &self.store;
                self.session
                    .authorized("update_range", |token| async move {
                        store.update_range(&token, &range, vec![header_row()]).await
                    })
                    .await
            }
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.is_authorization() => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, sheet = %self.sheet, "could not check ledger header, continuing");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    pub async fn append_record(&self, record: &BillRecord) -> Result<(), BillingError> {
        let row = encode_record(record);
        let store = &self.store;
        let sheet = self.sheet.as_str();
        self.session
            .authorized("append_row", |token| async move { store.append_row(&token, sheet, row).await })
            .await?;
        metrics::counter!("bill_records_submitted_total").increment(1);
        tracing::debug!(tenant = %record.tenant_name, total = record.total_bill, "appended bill record");
        Ok(())
    }

    pub async fn entries(&self) -> Result<Vec<LedgerEntry>, BillingError> {
        let rows = self.rows(RangeSpec::ledger(&self.sheet)).await?;
        Ok(ledger_entries(&rows))
    }

    /// Latest reading per meter and latest cost per unit found in the ledger.
    /// Backend outages degrade to zeroed readings; an authorization failure
    /// is returned (the session is already torn down).
    pub async fn previous_readings(
        &self,
        household: &Household,
        default_cost_per_unit: f64,
    ) -> Result<PreviousReadings, BillingError> {
        let rows = match self.rows(RangeSpec::ledger(&self.sheet)).await {
            Ok(rows) => rows,
            Err(e) if e.is_authorization() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "could not read previous readings, using defaults");
                metrics::counter!("prefetch_degraded_total").increment(1);
                let mut degraded = PreviousReadings::zeroed(household, default_cost_per_unit);
                degraded.degraded = true;
                return Ok(degraded);
            }
        };
        Ok(scan_previous(&rows, household, default_cost_per_unit))
    }

    /// Remove the first row matching `entry` by tenant, date, current reading
    /// and total.
    pub async fn delete_entry(&self, entry: &LedgerEntry) -> Result<(), BillingError> {
        let rows = self.rows(RangeSpec::ledger(&self.sheet)).await?;
        let start = data_start(&rows);
        let row_number = rows
            .iter()
            .enumerate()
            .skip(start)
            .filter_map(|(idx, row)| decode_row(row, idx + 1).ok())
            .find(|candidate| candidate.same_entry(entry))
            .map(|found| found.row_number)
            .ok_or_else(|| BillingError::Invariant(ENTRY_NOT_FOUND.to_string()))?;

        let store = &self.store;
        let sheet = self.sheet.as_str();
        self.session
            .authorized("delete_row", |token| async move {
                store.delete_row(&token, sheet, row_number).await
            })
            .await?;
        tracing::info!(tenant = %entry.tenant_name, date = %entry.date, row_number, "deleted ledger entry");
        Ok(())
    }

    /// Delete `old` and append `new` in its place at the end of the ledger.
    pub async fn replace_entry(&self, old: &LedgerEntry, new: &BillRecord) -> Result<(), BillingError> {
        self.delete_entry(old).await?;
        self.append_record(new).await
    }

    /// Create a new sheet with the header row and return its id.
    pub async fn create_ledger(&self, title: &str) -> Result<String, BillingError> {
        let store = &self.store;
        let id = self
            .session
            .authorized("create_sheet", |token| async move { store.create_sheet(&token, title).await })
            .await?;
        let range = RangeSpec::header(title);
        self.session
            .authorized("update_range", |token| async move {
                store.update_range(&token, &range, vec![header_row()]).await
            })
            .await?;
        tracing::info!(title, id = %id, "created ledger");
        Ok(id)
    }
}

fn scan_previous(rows: &[Vec<String>], household: &Household, default_cost_per_unit: f64) -> PreviousReadings {
    let mut previous = PreviousReadings::zeroed(household, default_cost_per_unit);
    for row in rows.iter().skip(data_start(rows)) {
        if row.len() < 3 {
            continue;
        }
        if let Some(cost) = row.get(4).and_then(|c| c.trim().parse::<f64>().ok()).filter(|c| c.is_finite()) {
            previous.cost_per_unit = cost;
        }
        let Ok(entry) = decode_row(row, 0) else {
            continue;
        };
        if let Some(meter) = household.match_tenant(entry.tenant_name.trim()) {
            previous.readings.insert(meter.clone(), entry.current_reading);
        }
    }
    previous
}
