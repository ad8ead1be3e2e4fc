use std::{
    fs::{self, File},
    io,
    path::PathBuf,
};

use billing_client::sheet::RangeSpec;
use tokio::sync::Mutex;

use super::{read_rows, write_rows, AccessToken, TabularStore};
use crate::error::BackendFailure;

/// File-backed ledger store: one headerless CSV file per sheet under `dir`.
///
/// Access tokens are not checked; the files are local to this host.
pub struct CsvSheetStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles on the files.
    lock: Mutex<()>,
}

impl CsvSheetStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn path(&self, sheet: &str) -> PathBuf {
        let safe: String = sheet
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == ' ' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.csv"))
    }

    fn load(&self, sheet: &str) -> Result<Option<Vec<Vec<String>>>, BackendFailure> {
        let path = self.path(sheet);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendFailure::transport(format!("failed to open {}: {e}", path.display()))),
        };
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| BackendFailure::transport(format!("failed to read CSV record: {e}")))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Some(rows))
    }

    fn store(&self, sheet: &str, rows: &[Vec<String>]) -> Result<(), BackendFailure> {
        fs::create_dir_all(&self.dir).map_err(BackendFailure::transport)?;
        let path = self.path(sheet);
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .map_err(|e| BackendFailure::transport(format!("failed to open {}: {e}", path.display())))?;
        for row in rows {
            wtr.write_record(row).map_err(BackendFailure::transport)?;
        }
        wtr.flush().map_err(BackendFailure::transport)
    }
}

#[async_trait::async_trait]
impl TabularStore for CsvSheetStore {
    async fn get_rows(
        &self,
        _token: &AccessToken,
        range: &RangeSpec,
    ) -> Result<Vec<Vec<String>>, BackendFailure> {
        let _guard = self.lock.lock().await;
        let rows = self.load(&range.sheet)?.unwrap_or_default();
        Ok(read_rows(&rows, range))
    }

    async fn append_row(
        &self,
        _token: &AccessToken,
        sheet: &str,
        row: Vec<String>,
    ) -> Result<(), BackendFailure> {
        let _guard = self.lock.lock().await;
        let mut rows = self.load(sheet)?.unwrap_or_default();
        rows.push(row);
        self.store(sheet, &rows)
    }

    async fn update_range(
        &self,
        _token: &AccessToken,
        range: &RangeSpec,
        new_rows: Vec<Vec<String>>,
    ) -> Result<(), BackendFailure> {
        let _guard = self.lock.lock().await;
        let mut rows = self.load(&range.sheet)?.unwrap_or_default();
        let start = range.rows.map(|(from, _)| from.saturating_sub(1)).unwrap_or(0);
        write_rows(&mut rows, start, new_rows);
        self.store(&range.sheet, &rows)
    }

    async fn delete_row(
        &self,
        _token: &AccessToken,
        sheet: &str,
        row_number: usize,
    ) -> Result<(), BackendFailure> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .load(sheet)?
            .ok_or_else(|| BackendFailure::Text(format!("no sheet named '{sheet}'")))?;
        if row_number == 0 || row_number > rows.len() {
            return Err(BackendFailure::Text(format!("row {row_number} out of range")));
        }
        rows.remove(row_number - 1);
        self.store(sheet, &rows)
    }

    async fn create_sheet(&self, _token: &AccessToken, title: &str) -> Result<String, BackendFailure> {
        let _guard = self.lock.lock().await;
        if self.load(title)?.is_some() {
            return Err(BackendFailure::Text(format!("sheet '{title}' already exists")));
        }
        self.store(title, &[])?;
        tracing::info!(sheet = title, dir = %self.dir.display(), "created ledger sheet");
        Ok(title.to_string())
    }
}
