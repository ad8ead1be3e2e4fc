//! Collaborators the billing core talks to: an identity provider that hands
//! out access tokens and a tabular store that holds the bill ledger.

pub mod csv_store;
pub mod identity;
pub mod memory;

use std::fmt;

use billing_client::{domain::Identity, sheet::RangeSpec};
use serde::{Deserialize, Serialize};

pub use csv_store::CsvSheetStore;
pub use identity::ConfiguredIdentityProvider;
pub use memory::{MemorySheetStore, StoreOp};

use crate::error::BackendFailure;

/// Scopes requested on every token exchange.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/userinfo.email",
];

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Never print the secret itself.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(..{})", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    /// Lifetime reported by the provider, in seconds.
    pub expires_in: Option<u64>,
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange_token(&self, scopes: &[&str]) -> Result<TokenGrant, BackendFailure>;

    async fn fetch_identity(&self, token: &AccessToken) -> Result<Identity, BackendFailure>;

    async fn revoke(&self, token: &AccessToken) -> Result<(), BackendFailure>;
}

/// Rows of strings addressed by sheet and A1-style range.
#[async_trait::async_trait]
pub trait TabularStore: Send + Sync {
    async fn get_rows(
        &self,
        token: &AccessToken,
        range: &RangeSpec,
    ) -> Result<Vec<Vec<String>>, BackendFailure>;

    async fn append_row(
        &self,
        token: &AccessToken,
        sheet: &str,
        row: Vec<String>,
    ) -> Result<(), BackendFailure>;

    /// Overwrite the rows starting at the range's first row.
    async fn update_range(
        &self,
        token: &AccessToken,
        range: &RangeSpec,
        rows: Vec<Vec<String>>,
    ) -> Result<(), BackendFailure>;

    /// Delete one row; `row_number` is 1-based.
    async fn delete_row(
        &self,
        token: &AccessToken,
        sheet: &str,
        row_number: usize,
    ) -> Result<(), BackendFailure>;

    /// Create an empty sheet and return its id.
    async fn create_sheet(&self, token: &AccessToken, title: &str) -> Result<String, BackendFailure>;
}

/// Overwrite `rows` into `sheet` starting at the 0-based `start`, padding
/// with empty rows as needed. Shared by the in-process stores.
pub(crate) fn write_rows(sheet: &mut Vec<Vec<String>>, start: usize, rows: Vec<Vec<String>>) {
    for (offset, row) in rows.into_iter().enumerate() {
        let idx = start + offset;
        if sheet.len() <= idx {
            sheet.resize_with(idx + 1, Vec::new);
        }
        sheet[idx] = row;
    }
}

/// Rows of `sheet` selected by `range`.
pub(crate) fn read_rows(sheet: &[Vec<String>], range: &RangeSpec) -> Vec<Vec<String>> {
    let (start, end) = range.row_window(sheet.len());
    sheet[start..end]
        .iter()
        .map(|row| row.iter().take(range.columns).cloned().collect())
        .collect()
}
