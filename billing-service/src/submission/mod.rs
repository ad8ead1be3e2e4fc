//! Submission flow: validate forms, build billing runs and write them to the
//! ledger one record at a time.

use std::{collections::HashSet, path::PathBuf, sync::Arc};

use billing_client::{
    domain::{check_member_count, BillRecord, FamilyConfig, MeterId, MeterReading},
    sheet::{encode_record, LedgerEntry},
};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::{
    billing::{build_billing_run, normalize_percentages, validate_run, Allocation, BillForm, FamilyPercentage, RunForm},
    clock::Clock,
    error::{BillingError, ValidationErrors},
    household::{Household, PreviousReadings},
    ledger::BillLedger,
    session::SessionManager,
};

/// Deterministic id of a record's position and content within a run.
pub fn record_fingerprint(position: usize, record: &BillRecord) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(position as u64).to_le_bytes());
    for cell in encode_record(record) {
        hasher.update(cell.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.finalize().to_hex().to_string()
}

/// A billing run that stopped part-way. Records are kept in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRun {
    pub records: Vec<BillRecord>,
    pub fingerprints: Vec<String>,
    pub submitted: HashSet<String>,
    #[serde(skip)]
    next_readings: Vec<MeterReading>,
    pub allocation: Option<Allocation>,
    pub percentages: Vec<FamilyPercentage>,
}

impl PendingRun {
    fn new(
        records: Vec<BillRecord>,
        next_readings: Vec<MeterReading>,
        allocation: Option<Allocation>,
        percentages: Vec<FamilyPercentage>,
    ) -> Self {
        let fingerprints = records
            .iter()
            .enumerate()
            .map(|(i, r)| record_fingerprint(i, r))
            .collect();
        Self {
            records,
            fingerprints,
            submitted: HashSet::new(),
            next_readings,
            allocation,
            percentages,
        }
    }

    pub fn remaining(&self) -> usize {
        self.fingerprints
            .iter()
            .filter(|f| !self.submitted.contains(*f))
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub records: Vec<BillRecord>,
    pub allocation: Option<Allocation>,
    pub percentages: Vec<FamilyPercentage>,
    /// Records written by this call.
    pub submitted: usize,
    /// Records already written by an earlier, interrupted attempt.
    pub skipped: usize,
}

pub struct BillingService {
    ledger: BillLedger,
    clock: Arc<dyn Clock>,
    household: RwLock<Household>,
    default_cost_per_unit: f64,
    family_settings_path: Option<PathBuf>,
    previous: RwLock<Option<PreviousReadings>>,
    pending: Mutex<Option<PendingRun>>,
    // One run at a time; submissions are never parallel.
    run_lock: Mutex<()>,
}

impl BillingService {
    pub fn new(
        ledger: BillLedger,
        clock: Arc<dyn Clock>,
        household: Household,
        default_cost_per_unit: f64,
        family_settings_path: Option<PathBuf>,
    ) -> Self {
        Self {
            ledger,
            clock,
            household: RwLock::new(household),
            default_cost_per_unit,
            family_settings_path,
            previous: RwLock::new(None),
            pending: Mutex::new(None),
            run_lock: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &BillLedger {
        &self.ledger
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        self.ledger.session()
    }

    pub async fn household(&self) -> Household {
        self.household.read().await.clone()
    }

    pub async fn families(&self) -> Vec<FamilyConfig> {
        self.household.read().await.families()
    }

    pub async fn pending_run(&self) -> Option<PendingRun> {
        self.pending.lock().await.clone()
    }

    /// Submit one tenant's reading as a single ledger row.
    pub async fn submit_reading(&self, form: &BillForm) -> Result<BillRecord, BillingError> {
        form.validate()?;
        self.session().current_token()?;
        let record = form.to_record(self.clock.now().date());
        let _run = self.run_lock.lock().await;
        self.ledger.ensure_header().await?;
        self.ledger.append_record(&record).await?;
        tracing::info!(tenant = %record.tenant_name, total = record.total_bill, "submitted reading");
        Ok(record)
    }

    /// Validate a household run, compute every bill and write them in order.
    /// Stops at the first failed write and keeps the rest as a pending run.
    pub async fn submit_run(&self, form: &RunForm) -> Result<RunReport, BillingError> {
        self.session().current_token()?;
        let _run = self.run_lock.lock().await;
        if self.pending.lock().await.is_some() {
            return Err(BillingError::Invariant(
                "A previous billing run did not finish; retry it first".to_string(),
            ));
        }

        let previous = self.previous_readings().await?;
        if previous.degraded {
            tracing::warn!("previous readings unavailable, refusing to bill against zeroed readings");
            return Err(BillingError::Transient(
                "Could not load previous readings from the ledger; try again".to_string(),
            ));
        }
        let household = self.household().await;
        let (tariff, readings) = validate_run(form, &household, &previous)?;
        let families = household.families();
        let run = build_billing_run(&readings, &tariff, &families, self.clock.now().date());
        tracing::info!(
            records = run.records.len(),
            water = run.allocation.is_some(),
            cost_per_unit = tariff.cost_per_unit,
            "built billing run"
        );

        self.ledger.ensure_header().await?;
        let pending = PendingRun::new(
            run.records,
            run.next_readings,
            run.allocation,
            normalize_percentages(&families),
        );
        self.drive(pending).await
    }

    /// Resubmit the records an interrupted run did not write, in order.
    pub async fn retry_pending_run(&self) -> Result<RunReport, BillingError> {
        self.session().current_token()?;
        let _run = self.run_lock.lock().await;
        let pending = self
            .pending
            .lock()
            .await
            .take()
            .ok_or_else(|| BillingError::Invariant("No billing run to retry".to_string()))?;
        tracing::info!(remaining = pending.remaining(), "retrying billing run");
        self.drive(pending).await
    }

    async fn drive(&self, mut pending: PendingRun) -> Result<RunReport, BillingError> {
        let skipped = pending.records.len() - pending.remaining();
        let mut submitted = 0;

        for idx in 0..pending.records.len() {
            if pending.submitted.contains(&pending.fingerprints[idx]) {
                continue;
            }
            if let Err(e) = self.ledger.append_record(&pending.records[idx]).await {
                metrics::counter!("billing_runs_failed_total").increment(1);
                tracing::warn!(
                    error = %e,
                    tenant = %pending.records[idx].tenant_name,
                    submitted,
                    "billing run stopped, remaining records kept for retry"
                );
                *self.pending.lock().await = Some(pending);
                return Err(e);
            }
            let fingerprint = pending.fingerprints[idx].clone();
            pending.submitted.insert(fingerprint);
            submitted += 1;
        }

        if let Some(previous) = self.previous.write().await.as_mut() {
            previous.advance(&pending.next_readings);
            if let Some(first) = pending.records.first() {
                previous.cost_per_unit = first.cost_per_unit;
            }
        }
        metrics::counter!("billing_runs_completed_total").increment(1);
        tracing::info!(submitted, skipped, "billing run complete");

        Ok(RunReport {
            records: pending.records,
            allocation: pending.allocation,
            percentages: pending.percentages,
            submitted,
            skipped,
        })
    }

    /// Cached previous readings, fetched from the ledger on first use.
    pub async fn previous_readings(&self) -> Result<PreviousReadings, BillingError> {
        if let Some(cached) = self.previous.read().await.as_ref() {
            return Ok(cached.clone());
        }
        self.refresh_previous_readings().await
    }

    /// Re-read the ledger. Degraded results are returned but not cached.
    pub async fn refresh_previous_readings(&self) -> Result<PreviousReadings, BillingError> {
        let household = self.household().await;
        let previous = self
            .ledger
            .previous_readings(&household, self.default_cost_per_unit)
            .await?;
        let mut cached = self.previous.write().await;
        *cached = if previous.degraded { None } else { Some(previous.clone()) };
        Ok(previous)
    }

    /// Rename a family or change its member count and persist the result.
    pub async fn update_family(
        &self,
        meter_id: &MeterId,
        name: Option<&str>,
        members: Option<u32>,
    ) -> Result<Vec<FamilyConfig>, BillingError> {
        let mut household = self.household.write().await;
        let is_family = household
            .families()
            .iter()
            .any(|f| &f.meter_id == meter_id);
        if !is_family {
            return Err(BillingError::Validation(ValidationErrors::single(
                "meter_id",
                format!("'{meter_id}' is not a family meter"),
            )));
        }
        if let Some(members) = members {
            check_member_count(meter_id, members)
                .map_err(|e| BillingError::Validation(ValidationErrors::single("members", e.to_string())))?;
        }

        if household.update_family(meter_id, name, members) {
            tracing::info!(meter = %meter_id, "updated family settings");
            if let Some(path) = &self.family_settings_path {
                if let Err(e) = household.family_settings().save(path) {
                    tracing::warn!(error = %e, path = %path.display(), "failed to persist family settings");
                }
            }
        }
        Ok(household.families())
    }

    pub async fn delete_entry(&self, entry: &LedgerEntry) -> Result<(), BillingError> {
        let _run = self.run_lock.lock().await;
        self.ledger.delete_entry(entry).await?;
        *self.previous.write().await = None;
        Ok(())
    }

    pub async fn replace_entry(&self, old: &LedgerEntry, new: &BillForm) -> Result<BillRecord, BillingError> {
        new.validate()?;
        let record = new.to_record(self.clock.now().date());
        let _run = self.run_lock.lock().await;
        self.ledger.replace_entry(old, &record).await?;
        *self.previous.write().await = None;
        Ok(record)
    }
}
