use std::sync::Arc;

use billing_client::domain::Identity;

use crate::{
    backend::{ConfiguredIdentityProvider, CsvSheetStore, IdentityProvider, MemorySheetStore, TabularStore},
    clock::{Clock, SystemClock},
    config::{AppConfig, StoreKind},
    household::FamilySettings,
    ledger::BillLedger,
    reports::ReportOptions,
    session::{FileTokenStore, SessionManager, TokenStore},
    submission::BillingService,
};

/// Everything a binary needs, built once from configuration.
#[derive(Clone)]
pub struct App {
    pub session: Arc<SessionManager>,
    pub billing: Arc<BillingService>,
    pub reports: ReportOptions,
}

impl App {
    pub fn build(cfg: &AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn TabularStore> = match cfg.store.kind {
            StoreKind::Csv => Arc::new(CsvSheetStore::new(cfg.store.dir.clone())),
            StoreKind::Memory => Arc::new(MemorySheetStore::new()),
        };
        let identity: Arc<dyn IdentityProvider> = Arc::new(ConfiguredIdentityProvider::from_env(
            Identity {
                id: cfg.identity.user_id.clone(),
                display_name: cfg.identity.display_name.clone(),
                email: cfg.identity.email.clone(),
            },
            cfg.identity.token_env.clone(),
        ));
        let tokens: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(cfg.session.token_path.clone()));

        Self::assemble(cfg, store, identity, tokens, Arc::new(SystemClock))
    }

    /// Wire the app from explicit collaborators.
    pub fn assemble(
        cfg: &AppConfig,
        store: Arc<dyn TabularStore>,
        identity: Arc<dyn IdentityProvider>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let mut household = cfg.household()?;
        if let Some(path) = &cfg.family_settings_path {
            household.apply_family_settings(&FamilySettings::load(path));
        }

        let session = Arc::new(SessionManager::new(identity, tokens, clock.clone(), cfg.session.settings()));
        session.on_session_change(|change| {
            metrics::counter!("session_transitions_total", "to" => change.to.to_string()).increment(1);
        });

        let ledger = BillLedger::new(store, session.clone(), cfg.store.sheet.clone());
        let billing = Arc::new(BillingService::new(
            ledger,
            clock,
            household,
            cfg.tariff.default_cost_per_unit,
            cfg.family_settings_path.clone(),
        ));

        tracing::info!(
            store = ?cfg.store.kind,
            sheet = %cfg.store.sheet,
            meters = cfg.meters.len(),
            "billing app assembled"
        );
        Ok(Self {
            session,
            billing,
            reports: cfg.reports.clone(),
        })
    }
}
