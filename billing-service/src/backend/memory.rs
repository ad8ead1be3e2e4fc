use std::collections::{BTreeMap, HashSet};

use billing_client::sheet::RangeSpec;
use tokio::sync::{Mutex, RwLock};

use super::{read_rows, write_rows, AccessToken, TabularStore};
use crate::error::BackendFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    GetRows,
    AppendRow,
    UpdateRange,
    DeleteRow,
    CreateSheet,
}

#[derive(Debug)]
struct InjectedFailure {
    op: StoreOp,
    /// Calls of `op` that still succeed before this one fires.
    skip: usize,
    failure: BackendFailure,
}

/// In-process ledger store. Sheets are created on first write; reading a
/// missing sheet yields no rows.
#[derive(Debug, Default)]
pub struct MemorySheetStore {
    sheets: RwLock<BTreeMap<String, Vec<Vec<String>>>>,
    rejected: RwLock<HashSet<AccessToken>>,
    failures: Mutex<Vec<InjectedFailure>>,
}

impl MemorySheetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_rows(sheet: &str, rows: Vec<Vec<String>>) -> Self {
        let store = Self::new();
        store.sheets.write().await.insert(sheet.to_string(), rows);
        store
    }

    /// Fail the next call of `op` with `failure`.
    pub async fn fail_next(&self, op: StoreOp, failure: BackendFailure) {
        self.fail_after(op, 0, failure).await;
    }

    /// Let `skip` calls of `op` through, then fail one with `failure`.
    pub async fn fail_after(&self, op: StoreOp, skip: usize, failure: BackendFailure) {
        self.failures.lock().await.push(InjectedFailure { op, skip, failure });
    }

    /// Answer every call made with `token` as an expired credential.
    pub async fn reject_token(&self, token: &AccessToken) {
        self.rejected.write().await.insert(token.clone());
    }

    pub async fn snapshot(&self, sheet: &str) -> Vec<Vec<String>> {
        self.sheets.read().await.get(sheet).cloned().unwrap_or_default()
    }

    async fn check(&self, token: &AccessToken, op: StoreOp) -> Result<(), BackendFailure> {
        if self.rejected.read().await.contains(token) {
            return Err(BackendFailure::unauthenticated());
        }
        let mut failures = self.failures.lock().await;
        if let Some(pos) = failures.iter().position(|f| f.op == op) {
            if failures[pos].skip == 0 {
                return Err(failures.remove(pos).failure);
            }
            failures[pos].skip -= 1;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TabularStore for MemorySheetStore {
    async fn get_rows(
        &self,
        token: &AccessToken,
        range: &RangeSpec,
    ) -> Result<Vec<Vec<String>>, BackendFailure> {
        self.check(token, StoreOp::GetRows).await?;
        let sheets = self.sheets.read().await;
        Ok(sheets
            .get(&range.sheet)
            .map(|rows| read_rows(rows, range))
            .unwrap_or_default())
    }

    async fn append_row(
        &self,
        token: &AccessToken,
        sheet: &str,
        row: Vec<String>,
    ) -> Result<(), BackendFailure> {
        self.check(token, StoreOp::AppendRow).await?;
        self.sheets
            .write()
            .await
            .entry(sheet.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    async fn update_range(
        &self,
        token: &AccessToken,
        range: &RangeSpec,
        rows: Vec<Vec<String>>,
    ) -> Result<(), BackendFailure> {
        self.check(token, StoreOp::UpdateRange).await?;
        let start = range.rows.map(|(from, _)| from.saturating_sub(1)).unwrap_or(0);
        let mut sheets = self.sheets.write().await;
        write_rows(sheets.entry(range.sheet.clone()).or_default(), start, rows);
        Ok(())
    }

    async fn delete_row(
        &self,
        token: &AccessToken,
        sheet: &str,
        row_number: usize,
    ) -> Result<(), BackendFailure> {
        self.check(token, StoreOp::DeleteRow).await?;
        let mut sheets = self.sheets.write().await;
        let rows = sheets
            .get_mut(sheet)
            .ok_or_else(|| BackendFailure::Text(format!("no sheet named '{sheet}'")))?;
        if row_number == 0 || row_number > rows.len() {
            return Err(BackendFailure::Text(format!("row {row_number} out of range")));
        }
        rows.remove(row_number - 1);
        Ok(())
    }

    async fn create_sheet(&self, token: &AccessToken, title: &str) -> Result<String, BackendFailure> {
        self.check(token, StoreOp::CreateSheet).await?;
        let mut sheets = self.sheets.write().await;
        if sheets.contains_key(title) {
            return Err(BackendFailure::Api {
                code: Some(400),
                status: Some("INVALID_ARGUMENT".to_string()),
                message: format!("A sheet with the name \"{title}\" already exists."),
            });
        }
        sheets.insert(title.to_string(), Vec::new());
        Ok(title.to_string())
    }
}
