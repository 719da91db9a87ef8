//! Axum JSON API over ingestion, enrichment, scoring and the daily digest.

use std::sync::Arc;

use afois_adapters::UsaSpendingClient;
use afois_core::{AnalysisResult, IncumbentData, StoredOpportunity};
use afois_storage::{AnalysisStore, OpportunityStore};
use afois_sync::{
    analyze_opportunity, draft_capability, maybe_build_scheduler, open_stores, run_daily_digest,
    DigestOutcome, DraftingService, HttpScoringService, IncumbentService, IngestConfig,
    IngestError, IngestPipeline, LogNotificationService, NotificationService, ScoringService,
    ServiceError, Stores, TemplateDraftingService,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

const LIST_LIMIT: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub stores: Stores,
    pub incumbents: IncumbentService,
    pub scorer: Option<Arc<dyn ScoringService>>,
    pub drafter: Arc<dyn DraftingService>,
    pub notifier: Arc<dyn NotificationService>,
}

impl AppState {
    /// Services are wired from the pipeline's config. Scoring stays disabled without a URL.
    pub fn new(pipeline: Arc<IngestPipeline>, stores: Stores) -> Self {
        let http = pipeline.http().clone();
        let config = pipeline.config();
        let scorer = config.scoring_service_url.clone().map(|url| {
            Arc::new(HttpScoringService::new(http.clone(), url)) as Arc<dyn ScoringService>
        });
        let incumbents = IncumbentService::new(
            http,
            UsaSpendingClient::new(config.usaspending_base_url.clone()),
        );
        Self {
            pipeline,
            stores,
            incumbents,
            scorer,
            drafter: Arc::new(TemplateDraftingService::default()),
            notifier: Arc::new(LogNotificationService),
        }
    }

    pub async fn from_config(config: IngestConfig) -> anyhow::Result<Self> {
        let stores = open_stores(&config).await?;
        let pipeline = IngestPipeline::from_config(config, stores.opportunities.clone())?;
        Ok(Self::new(Arc::new(pipeline), stores))
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn ScoringService>) -> Self {
        self.scorer = Some(scorer);
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct OrgSelector {
    org_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
struct OpportunityRequest {
    #[serde(alias = "opportunityId")]
    opportunity_id: Option<Uuid>,
    #[serde(default, alias = "orgId")]
    org_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
struct CompetitorsRequest {
    naics: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpportunityView {
    #[serde(flatten)]
    opportunity: StoredOpportunity,
    analysis: Option<AnalysisResult>,
    incumbent_data: Option<IncumbentData>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/ingest/sam", get(ingest_sam_handler).post(ingest_sam_handler))
        .route("/api/ingest/subnet", get(ingest_subnet_handler))
        .route("/api/ingest/usaspending", post(incumbent_handler))
        .route("/api/competitors", post(competitors_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/ai/draft-capability", post(draft_handler))
        .route("/api/notify/daily", get(notify_handler))
        .route("/api/opportunities", get(opportunities_handler))
        .route("/api/opportunities/{id}", get(opportunity_detail_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("AFOIS_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let state = AppState::from_config(IngestConfig::from_env()).await?;
    let scheduler = maybe_build_scheduler(Arc::clone(&state.pipeline)).await?;
    if let Some(scheduler) = &scheduler {
        scheduler.start().await?;
    }
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "afois-web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn ingest_sam_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrgSelector>,
    body: Bytes,
) -> Response {
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice::<OrgSelector>(&body) {
            Ok(selector) => selector.org_id,
            Err(err) => return error_json(StatusCode::BAD_REQUEST, format!("invalid body: {err}")),
        }
    };
    match state.pipeline.run_sam(from_body.or(query.org_id)).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => ingest_error(err),
    }
}

async fn ingest_subnet_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.pipeline.run_subnet().await).into_response()
}

async fn incumbent_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpportunityRequest>,
) -> Response {
    let Some(id) = req.opportunity_id else {
        return error_json(StatusCode::BAD_REQUEST, "opportunity_id is required");
    };
    let stores = &state.stores;
    match state
        .incumbents
        .refresh_incumbent(stores.opportunities.as_ref(), stores.analyses.as_ref(), id)
        .await
    {
        Ok(data) => Json(json!({ "success": true, "data": data })).into_response(),
        Err(err) => service_error(err),
    }
}

async fn competitors_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompetitorsRequest>,
) -> Response {
    let Some(naics) = req.naics.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) else {
        return error_json(StatusCode::BAD_REQUEST, "naics is required");
    };
    match state.incumbents.competitors(&naics, Utc::now().date_naive()).await {
        Ok(competitors) => Json(json!({ "naics": naics, "competitors": competitors })).into_response(),
        Err(err) => service_error(err.into()),
    }
}

async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpportunityRequest>,
) -> Response {
    let Some(id) = req.opportunity_id else {
        return error_json(StatusCode::BAD_REQUEST, "opportunity_id is required");
    };
    let Some(scorer) = &state.scorer else {
        return service_error(ServiceError::NotConfigured {
            service: "scoring service",
        });
    };
    let profile = match state.pipeline.resolve_targeting(req.org_id).await {
        Ok(targeting) => targeting.company_profile(),
        Err(err) => return ingest_error(err),
    };
    let stores = &state.stores;
    match analyze_opportunity(
        stores.opportunities.as_ref(),
        stores.analyses.as_ref(),
        scorer.as_ref(),
        &profile,
        id,
    )
    .await
    {
        Ok(analysis) => Json(json!({ "success": true, "analysis": analysis })).into_response(),
        Err(err) => service_error(err),
    }
}

async fn draft_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpportunityRequest>,
) -> Response {
    let Some(id) = req.opportunity_id else {
        return error_json(StatusCode::BAD_REQUEST, "opportunity_id is required");
    };
    let stores = &state.stores;
    match draft_capability(
        stores.opportunities.as_ref(),
        stores.analyses.as_ref(),
        state.drafter.as_ref(),
        id,
    )
    .await
    {
        Ok(text) => Json(json!({ "text": text })).into_response(),
        Err(err) => service_error(err),
    }
}

async fn notify_handler(State(state): State<Arc<AppState>>) -> Response {
    let config = state.pipeline.config();
    match run_daily_digest(
        state.stores.analyses.as_ref(),
        state.notifier.as_ref(),
        config.digest_min_score,
        config.digest_limit,
    )
    .await
    {
        Ok(DigestOutcome::Sent { count }) => Json(json!({ "success": true, "count": count })).into_response(),
        Ok(DigestOutcome::Empty) => {
            Json(json!({ "message": "No new high-score opportunities found." })).into_response()
        }
        Err(err) => service_error(err),
    }
}

async fn opportunities_handler(State(state): State<Arc<AppState>>) -> Response {
    let stores = &state.stores;
    let stored = match stores.opportunities.list_opportunities(LIST_LIMIT).await {
        Ok(stored) => stored,
        Err(err) => return service_error(err.into()),
    };
    let mut views = Vec::with_capacity(stored.len());
    for opportunity in stored {
        match view_for(stores.analyses.as_ref(), opportunity).await {
            Ok(view) => views.push(view),
            Err(err) => return service_error(err),
        }
    }
    Json(views).into_response()
}

async fn opportunity_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    let stores = &state.stores;
    let stored = match stores.opportunities.opportunity_by_id(id).await {
        Ok(Some(stored)) => stored,
        Ok(None) => return service_error(ServiceError::NotFound(id)),
        Err(err) => return service_error(err.into()),
    };
    match view_for(stores.analyses.as_ref(), stored).await {
        Ok(view) => Json(view).into_response(),
        Err(err) => service_error(err),
    }
}

async fn view_for(
    analyses: &dyn AnalysisStore,
    opportunity: StoredOpportunity,
) -> Result<OpportunityView, ServiceError> {
    let record = analyses.analysis_record(opportunity.id).await?;
    let (analysis, incumbent_data) = record
        .map(|r| (r.analysis, r.incumbent_data))
        .unwrap_or_default();
    Ok(OpportunityView {
        opportunity,
        analysis,
        incumbent_data,
    })
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn ingest_error(err: IngestError) -> Response {
    let status = match &err {
        IngestError::UnknownOrganization(_) => StatusCode::NOT_FOUND,
        IngestError::MissingCredential(_) | IngestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!(error = %err, "ingestion request failed");
    error_json(status, err.to_string())
}

fn service_error(err: ServiceError) -> Response {
    let status = match &err {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Adapter(_) | ServiceError::Fetch(_) | ServiceError::InvalidResponse(_) => {
            StatusCode::BAD_GATEWAY
        }
        ServiceError::NotConfigured { .. } | ServiceError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error!(error = %err, "request failed");
    error_json(status, err.to_string())
}
