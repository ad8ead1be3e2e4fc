use serde::Deserialize;
use std::{fs, path::PathBuf};

use crate::{
    household::{Household, MeterSpec},
    reports::ReportOptions,
    session::SessionSettings,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Csv,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub kind: StoreKind,
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_sheet")]
    pub sheet: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Csv,
            dir: default_store_dir(),
            sheet: default_sheet(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_sheet() -> String {
    "Sheet1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub token_path: PathBuf,
    #[serde(default = "default_max_token_age_minutes")]
    pub max_token_age_minutes: i64,
    #[serde(default = "default_notice_seconds")]
    pub notice_seconds: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_path: PathBuf::from("data/session-token.json"),
            max_token_age_minutes: default_max_token_age_minutes(),
            notice_seconds: default_notice_seconds(),
        }
    }
}

impl SessionConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            max_token_age: time::Duration::minutes(self.max_token_age_minutes),
            notice_duration: time::Duration::seconds(self.notice_seconds),
        }
    }
}

fn default_max_token_age_minutes() -> i64 {
    55
}

fn default_notice_seconds() -> i64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_token_env")]
    pub token_env: String,
    pub user_id: String,
    pub display_name: String,
    pub email: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            user_id: "local".to_string(),
            display_name: "Local User".to_string(),
            email: "local@localhost".to_string(),
        }
    }
}

fn default_token_env() -> String {
    "BILLING_ACCESS_TOKEN".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TariffConfig {
    pub default_cost_per_unit: f64,
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self {
            default_cost_per_unit: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub tariff: TariffConfig,
    /// Household layout; the seven-meter default when empty.
    #[serde(default)]
    pub meters: Vec<MeterSpec>,
    #[serde(default)]
    pub reports: ReportOptions,
    pub family_settings_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("BILLING_CONFIG").unwrap_or_else(|_| "billing-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    pub fn household(&self) -> anyhow::Result<Household> {
        if self.meters.is_empty() {
            return Ok(Household::default_layout());
        }
        Ok(Household::new(self.meters.clone())?)
    }
}
