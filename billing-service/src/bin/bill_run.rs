use std::{collections::BTreeMap, env, fs};

use anyhow::{bail, Context, Result};
use billing_client::domain::{format_amount, MeterId};
use billing_service::{
    billing::{ReadingInput, RunForm},
    config::AppConfig,
    observability, App,
};
use serde::Deserialize;

/// Readings file, e.g.
///
/// ```toml
/// cost_per_unit = 10
/// [readings]
/// shop = 150
/// water_motor = "1240.5"
/// ```
#[derive(Debug, Deserialize)]
struct ReadingsFile {
    cost_per_unit: toml::Value,
    #[serde(default)]
    readings: BTreeMap<MeterId, toml::Value>,
}

fn as_input(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing_for(&["bill_run=info"]);

    let Some(path) = env::args().nth(1) else {
        bail!("usage: bill_run <readings.toml>");
    };
    let contents = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let file: ReadingsFile = toml::from_str(&contents).with_context(|| format!("parsing {path}"))?;

    let cfg = AppConfig::load()?;
    let app = App::build(&cfg)?;
    app.session.restore().await;
    if !app.session.is_authenticated() {
        app.session.sign_in().await?;
    }

    let form = RunForm {
        cost_per_unit: as_input(&file.cost_per_unit),
        readings: file
            .readings
            .iter()
            .map(|(meter_id, value)| ReadingInput {
                meter_id: meter_id.clone(),
                current_reading: as_input(value),
            })
            .collect(),
    };

    let report = app.billing.submit_run(&form).await?;
    for record in &report.records {
        tracing::info!(
            tenant = %record.tenant_name,
            units = %format_amount(record.units_consumed),
            water_cost = %format_amount(record.water_cost),
            total = %format_amount(record.total_bill),
            "bill"
        );
    }
    for pct in &report.percentages {
        tracing::info!(family = %pct.meter_id, percent = pct.percent(), "water share");
    }
    tracing::info!(submitted = report.submitted, "billing run written");
    Ok(())
}
