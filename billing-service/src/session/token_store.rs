use std::{
    fs, io,
    path::PathBuf,
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::backend::AccessToken;

/// Token persisted across restarts together with the moment it was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedToken {
    pub access_token: AccessToken,
    /// Unix time in milliseconds.
    pub obtained_at_ms: i64,
}

impl PersistedToken {
    pub fn new(access_token: AccessToken, obtained_at: OffsetDateTime) -> Self {
        Self {
            access_token,
            obtained_at_ms: (obtained_at.unix_timestamp_nanos() / 1_000_000) as i64,
        }
    }

    pub fn obtained_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.obtained_at_ms) * 1_000_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<PersistedToken>;
    fn save(&self, token: &PersistedToken) -> io::Result<()>;
    fn clear(&self) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<PersistedToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holding(token: PersistedToken) -> Self {
        Self {
            slot: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<PersistedToken> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn save(&self, token: &PersistedToken) -> io::Result<()> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// JSON file holding at most one token.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<PersistedToken> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "ignoring unreadable persisted token");
                None
            }
        }
    }

    fn save(&self, token: &PersistedToken) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(token).map_err(io::Error::other)?;
        fs::write(&self.path, json)
    }

    fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
