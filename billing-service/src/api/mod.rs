//! JSON over HTTP for the billing service.

use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use billing_client::{
    domain::{BillRecord, FamilyConfig, Identity, MeterId, MeterReading, MeterRole, Tariff},
    sheet::LedgerEntry,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    app::App,
    billing::{allocate_shared_utility, normalize_percentages, Allocation, BillForm, FamilyPercentage, RunForm},
    error::{BillingError, ValidationErrors},
    household::PreviousReadings,
    reports::{monthly_summary, tenant_history, yearly_summary, MonthSummary, TenantHistory, YearSummary},
    session::{SessionNotice, SessionState},
    submission::RunReport,
};

/// `BillingError` as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub BillingError);

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BillingError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::Authorization(_) => StatusCode::UNAUTHORIZED,
            BillingError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::Invariant(_) => StatusCode::CONFLICT,
        };
        metrics::counter!("http_errors_total", "kind" => self.0.kind()).increment(1);
        let body = match &self.0 {
            BillingError::Validation(fields) => json!({ "error": "validation", "fields": fields }),
            other => json!({ "error": other.kind(), "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(app: App) -> Router {
    Router::new()
        .route("/session", get(session_status))
        .route("/session/sign-in", post(sign_in))
        .route("/session/sign-out", post(sign_out))
        .route("/allocation", post(allocation))
        .route("/families", get(families))
        .route("/families/:meter_id", put(update_family))
        .route("/readings", post(submit_reading))
        .route("/billing-runs", post(submit_run))
        .route("/billing-runs/retry", post(retry_run))
        .route("/previous-readings", get(previous_readings))
        .route("/ledgers", post(create_ledger))
        .route("/entries", get(list_entries).delete(delete_entry).put(replace_entry))
        .route("/reports/tenants", get(report_tenants))
        .route("/reports/monthly", get(report_monthly))
        .route("/reports/yearly", get(report_yearly))
        .with_state(app)
}

pub async fn serve(app: App, bind_addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "billing api listening");
    axum::serve(listener, router(app).into_make_service()).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub identity: Option<Identity>,
    pub notice: Option<SessionNotice>,
}

fn session_view(app: &App) -> SessionView {
    SessionView {
        state: app.session.status(),
        identity: app.session.identity(),
        notice: app.session.active_notice(),
    }
}

async fn session_status(State(app): State<App>) -> Json<SessionView> {
    Json(session_view(&app))
}

async fn sign_in(State(app): State<App>) -> ApiResult<SessionView> {
    app.session.sign_in().await?;
    Ok(Json(session_view(&app)))
}

async fn sign_out(State(app): State<App>) -> Json<SessionView> {
    app.session.sign_out().await;
    Json(session_view(&app))
}

#[derive(Debug, Deserialize)]
pub struct AllocationRequest {
    pub previous_reading: f64,
    pub current_reading: f64,
    pub cost_per_unit: f64,
    /// Defaults to the household's families.
    #[serde(default)]
    pub families: Option<Vec<FamilyConfig>>,
}

#[derive(Debug, Serialize)]
pub struct AllocationView {
    pub allocation: Allocation,
    pub percentages: Vec<FamilyPercentage>,
}

async fn allocation(State(app): State<App>, Json(req): Json<AllocationRequest>) -> ApiResult<AllocationView> {
    let families = match req.families {
        Some(families) => {
            let mut errors = ValidationErrors::new();
            for family in &families {
                if let Err(e) = family.validate() {
                    errors.add(family.meter_id.as_str(), e.to_string());
                }
            }
            errors.into_result()?;
            families
        }
        None => app.billing.families().await,
    };
    let source = MeterReading::new(
        "water_source",
        "Water Source",
        MeterRole::WaterSource,
        req.previous_reading,
        Some(req.current_reading),
    );
    Ok(Json(AllocationView {
        allocation: allocate_shared_utility(&source, &Tariff::new(req.cost_per_unit), &families),
        percentages: normalize_percentages(&families),
    }))
}

#[derive(Debug, Serialize)]
pub struct FamiliesView {
    pub families: Vec<FamilyConfig>,
    pub percentages: Vec<FamilyPercentage>,
}

impl FamiliesView {
    fn new(families: Vec<FamilyConfig>) -> Self {
        let percentages = normalize_percentages(&families);
        Self { families, percentages }
    }
}

async fn families(State(app): State<App>) -> Json<FamiliesView> {
    Json(FamiliesView::new(app.billing.families().await))
}

#[derive(Debug, Deserialize)]
pub struct FamilyUpdate {
    pub name: Option<String>,
    pub members: Option<u32>,
}

async fn update_family(
    State(app): State<App>,
    Path(meter_id): Path<String>,
    Json(update): Json<FamilyUpdate>,
) -> ApiResult<FamiliesView> {
    let families = app
        .billing
        .update_family(&MeterId::new(meter_id), update.name.as_deref(), update.members)
        .await?;
    Ok(Json(FamiliesView::new(families)))
}

async fn submit_reading(State(app): State<App>, Json(form): Json<BillForm>) -> ApiResult<BillRecord> {
    Ok(Json(app.billing.submit_reading(&form).await?))
}

async fn submit_run(State(app): State<App>, Json(form): Json<RunForm>) -> ApiResult<RunReport> {
    Ok(Json(app.billing.submit_run(&form).await?))
}

async fn retry_run(State(app): State<App>) -> ApiResult<RunReport> {
    Ok(Json(app.billing.retry_pending_run().await?))
}

async fn previous_readings(State(app): State<App>) -> ApiResult<PreviousReadings> {
    Ok(Json(app.billing.refresh_previous_readings().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateLedger {
    pub title: String,
}

async fn create_ledger(
    State(app): State<App>,
    Json(req): Json<CreateLedger>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let id = app.billing.ledger().create_ledger(req.title.trim()).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn list_entries(State(app): State<App>) -> ApiResult<Vec<LedgerEntry>> {
    Ok(Json(app.billing.ledger().entries().await?))
}

async fn delete_entry(State(app): State<App>, Json(entry): Json<LedgerEntry>) -> Result<StatusCode, ApiError> {
    app.billing.delete_entry(&entry).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ReplaceEntry {
    pub old: LedgerEntry,
    pub new: BillForm,
}

async fn replace_entry(State(app): State<App>, Json(req): Json<ReplaceEntry>) -> ApiResult<BillRecord> {
    Ok(Json(app.billing.replace_entry(&req.old, &req.new).await?))
}

async fn report_tenants(State(app): State<App>) -> ApiResult<Vec<TenantHistory>> {
    let entries = app.billing.ledger().entries().await?;
    Ok(Json(tenant_history(&entries, &app.reports)))
}

async fn report_monthly(State(app): State<App>) -> ApiResult<Vec<MonthSummary>> {
    let entries = app.billing.ledger().entries().await?;
    Ok(Json(monthly_summary(&entries, &app.reports)))
}

async fn report_yearly(State(app): State<App>) -> ApiResult<Vec<YearSummary>> {
    let entries = app.billing.ledger().entries().await?;
    Ok(Json(yearly_summary(&entries, &app.reports)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::{
        backend::{ConfiguredIdentityProvider, MemorySheetStore},
        clock::ManualClock,
        config::AppConfig,
        session::MemoryTokenStore,
    };
    use time::macros::datetime;

    fn app() -> App {
        let identity = Identity {
            id: "u".to_string(),
            display_name: "U".to_string(),
            email: "u@example.com".to_string(),
        };
        App::assemble(
            &AppConfig::default(),
            Arc::new(MemorySheetStore::new()),
            Arc::new(ConfiguredIdentityProvider::with_token(identity, "tok")),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(ManualClock::new(datetime!(2024-05-01 09:00 UTC))),
        )
        .unwrap()
    }

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (BillingError::Validation(ValidationErrors::single("shop", "bad")), StatusCode::UNPROCESSABLE_ENTITY),
            (BillingError::Authorization("x".into()), StatusCode::UNAUTHORIZED),
            (BillingError::Transient("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (BillingError::Invariant("x".into()), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn run_requires_sign_in() {
        let app = app();
        app.session.restore().await;
        let form = RunForm {
            cost_per_unit: "10".to_string(),
            readings: vec![],
        };
        let err = submit_run(State(app.clone()), Json(form)).await.unwrap_err();
        assert!(err.0.is_authorization());

        let Json(view) = sign_in(State(app.clone())).await.unwrap();
        assert_eq!(view.state, SessionState::Authenticated);
        assert_eq!(view.identity.map(|i| i.email).as_deref(), Some("u@example.com"));
    }

    #[tokio::test]
    async fn allocation_defaults_to_household_families() {
        let app = app();
        let Json(view) = allocation(
            State(app),
            Json(AllocationRequest {
                previous_reading: 0.0,
                current_reading: 100.0,
                cost_per_unit: 10.0,
                families: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(view.allocation.total_members, 11);
        let hundredths: Vec<u32> = view.percentages.iter().map(|p| p.hundredths).collect();
        assert_eq!(hundredths, vec![3637, 3636, 1818, 909]);
    }

    #[tokio::test]
    async fn allocation_rejects_out_of_range_member_counts() {
        let err = allocation(
            State(app()),
            Json(AllocationRequest {
                previous_reading: 0.0,
                current_reading: 100.0,
                cost_per_unit: 10.0,
                families: Some(vec![
                    FamilyConfig {
                        meter_id: MeterId::new("family1"),
                        display_name: "Family 1".to_string(),
                        member_count: u32::MAX,
                    },
                    FamilyConfig {
                        meter_id: MeterId::new("family2"),
                        display_name: "Family 2".to_string(),
                        member_count: 0,
                    },
                ]),
            }),
        )
        .await
        .unwrap_err();
        match &err.0 {
            BillingError::Validation(fields) => {
                assert!(fields.get("family1").is_some());
                assert!(fields.get("family2").is_some());
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn family_update_rejects_non_family_meter() {
        let app = app();
        let err = update_family(
            State(app.clone()),
            Path("shop".to_string()),
            Json(FamilyUpdate {
                name: Some("Store".to_string()),
                members: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        let Json(view) = update_family(
            State(app),
            Path("family1".to_string()),
            Json(FamilyUpdate {
                name: None,
                members: Some(5),
            }),
        )
        .await
        .unwrap();
        assert_eq!(view.families[0].member_count, 5);
        assert_eq!(view.percentages.iter().map(|p| p.hundredths).sum::<u32>(), 10_000);
    }

    #[tokio::test]
    async fn reports_read_back_submitted_runs() {
        let app = app();
        app.session.restore().await;
        app.session.sign_in().await.unwrap();

        let form = RunForm {
            cost_per_unit: "10".to_string(),
            readings: vec![crate::billing::ReadingInput {
                meter_id: MeterId::new("family2"),
                current_reading: "30".to_string(),
            }],
        };
        submit_run(State(app.clone()), Json(form)).await.unwrap();

        let Json(months) = report_monthly(State(app.clone())).await.unwrap();
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].label, "May 2024");
        assert_eq!(months[0].summary.totals.bill, 300.0);

        let Json(tenants) = report_tenants(State(app)).await.unwrap();
        assert_eq!(tenants[0].tenant_name, "Family 2");
    }
}
