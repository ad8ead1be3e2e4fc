use anyhow::Result;
use billing_service::{api, config::AppConfig, metrics_server, observability, App};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let app = App::build(&cfg)?;

    let state = app.session.restore().await;
    tracing::info!(%state, "session restored");
    if app.session.is_authenticated() {
        match app.billing.refresh_previous_readings().await {
            Ok(previous) if previous.degraded => tracing::warn!("ledger unavailable, starting from zeroed readings"),
            Ok(previous) => tracing::info!(cost_per_unit = previous.cost_per_unit, "loaded previous readings"),
            Err(e) => tracing::warn!(error = %e, "could not load previous readings"),
        }
    }

    api::serve(app, &cfg.server.bind_addr).await
}
