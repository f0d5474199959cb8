//! Axum HTTP surface for the matching engine.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use dealmatch_engine::{EngineError, MatchRequestBody, MatchRunSummary, MatchingEngine};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "dealmatch-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MatchingEngine>,
}

impl AppState {
    pub fn new(engine: Arc<MatchingEngine>) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Serialize)]
struct MatchingResults {
    processed_companies: usize,
    new_matches: usize,
    updated_matches: usize,
}

#[derive(Debug, Serialize)]
struct MatchingResponse {
    success: bool,
    results: MatchingResults,
}

impl MatchingResponse {
    fn from_summary(summary: &MatchRunSummary) -> Self {
        Self {
            success: true,
            results: MatchingResults {
                processed_companies: summary.processed_companies,
                new_matches: summary.new_matches,
                updated_matches: summary.updated_matches,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    timestamp: String,
}

// Every failure class comes back as a 500 with the same body shape; the
// callers key off `error`, not the status code.
fn failure(err: &EngineError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: err.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }),
    )
        .into_response()
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/matching", post(matching_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "matching API listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn matching_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MatchRequestBody>,
) -> Response {
    let request = match body.into_request() {
        Ok(request) => request,
        Err(err) => return failure(&err),
    };
    match state.engine.run(request).await {
        Ok(summary) => {
            info!(
                mode = summary.mode.as_str(),
                processed_companies = summary.processed_companies,
                new_matches = summary.new_matches,
                updated_matches = summary.updated_matches,
                skipped = summary.skipped,
                "matching run completed"
            );
            Json(MatchingResponse::from_summary(&summary)).into_response()
        }
        Err(err) => {
            error!(error = %err, "matching run failed");
            failure(&err)
        }
    }
}

async fn healthz_handler() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use dealmatch_core::{
        Company, CompanyStatus, GeographicScope, Mandate, MandateStatus, MandateType,
    };
    use dealmatch_engine::{EngineConfig, MemoryAuditSink};
    use dealmatch_store::MemoryMatchStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn seeded_app() -> (Router, Uuid) {
        let store = Arc::new(MemoryMatchStore::new());
        let company = Company {
            id: Uuid::new_v4(),
            name: "Aceros del Norte".into(),
            industry: "industrial".into(),
            country: Some("España".into()),
            region: None,
            geographic_scope: GeographicScope::Nacional,
            annual_revenue: 8_000_000.0,
            seller_ready: true,
            buyer_active: false,
            engagement_score: 85,
            status: CompanyStatus::Activa,
        };
        let mandate = Mandate {
            id: Uuid::new_v4(),
            name: "Buy-side industrials".into(),
            mandate_type: MandateType::Compra,
            target_sectors: vec!["industrial".into()],
            target_locations: vec!["España".into()],
            min_revenue: 1_000_000.0,
            max_revenue: Some(50_000_000.0),
            status: MandateStatus::Active,
        };
        let company_id = company.id;
        store.put_company(company).await;
        store.put_mandate(mandate).await;

        let engine = Arc::new(MatchingEngine::new(
            store,
            Arc::new(MemoryAuditSink::new()),
            EngineConfig::default(),
        ));
        (app(AppState::new(engine)), company_id)
    }

    async fn post_matching(router: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let resp = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/matching")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn company_request_returns_counters() {
        let (router, company_id) = seeded_app().await;
        let (status, json) =
            post_matching(router, serde_json::json!({ "company_id": company_id })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], serde_json::json!(true));
        assert_eq!(json["results"]["processed_companies"], serde_json::json!(1));
        assert_eq!(json["results"]["new_matches"], serde_json::json!(1));
        assert_eq!(json["results"]["updated_matches"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn empty_body_is_rejected_with_error_shape() {
        let (router, _) = seeded_app().await;
        let (status, json) = post_matching(router, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("required"));
        assert!(json["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn two_discriminators_are_rejected() {
        let (router, company_id) = seeded_app().await;
        let (status, json) = post_matching(
            router,
            serde_json::json!({
                "company_id": company_id,
                "recalculate_all_matches": true
            }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("mutually exclusive"));
    }

    #[tokio::test]
    async fn unknown_company_maps_to_failure_shape() {
        let (router, _) = seeded_app().await;
        let (status, json) =
            post_matching(router, serde_json::json!({ "company_id": Uuid::new_v4() })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (router, _) = seeded_app().await;
        let resp = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
