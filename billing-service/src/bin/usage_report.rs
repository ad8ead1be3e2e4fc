use std::env;

use anyhow::{bail, Result};
use billing_client::domain::format_amount;
use billing_service::{
    config::AppConfig,
    observability,
    reports::{monthly_summary, tenant_history, yearly_summary},
    App,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing_for(&["usage_report=info"]);

    let view = env::args().nth(1).unwrap_or_else(|| "monthly".to_string());

    let cfg = AppConfig::load()?;
    let app = App::build(&cfg)?;
    app.session.restore().await;
    if !app.session.is_authenticated() {
        app.session.sign_in().await?;
    }

    let entries = app.billing.ledger().entries().await?;
    tracing::info!(entries = entries.len(), "loaded ledger");

    match view.as_str() {
        "monthly" => {
            for month in monthly_summary(&entries, &app.reports) {
                let t = &month.summary.totals;
                tracing::info!(
                    month = %month.label,
                    units = %format_amount(t.units),
                    water_units = %format_amount(t.water_units),
                    bill = %format_amount(t.bill),
                    utility_units = %format_amount(t.utility_units),
                    utility_bill = %format_amount(t.utility_bill),
                    "monthly usage"
                );
            }
        }
        "yearly" => {
            for year in yearly_summary(&entries, &app.reports) {
                let t = &year.summary.totals;
                tracing::info!(
                    year = year.year,
                    months = year.months.len(),
                    units = %format_amount(t.units),
                    bill = %format_amount(t.bill),
                    utility_bill = %format_amount(t.utility_bill),
                    "yearly usage"
                );
            }
        }
        "tenants" => {
            for tenant in tenant_history(&entries, &app.reports) {
                let latest = tenant.entries.first();
                tracing::info!(
                    tenant = %tenant.tenant_name,
                    bills = tenant.entries.len(),
                    latest_date = latest.map(|e| e.date.as_str()).unwrap_or("-"),
                    latest_total = %latest.map(|e| format_amount(e.total_bill)).unwrap_or_default(),
                    "tenant history"
                );
            }
        }
        other => bail!("unknown view '{other}', expected monthly, yearly or tenants"),
    }
    Ok(())
}
