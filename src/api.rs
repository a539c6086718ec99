use serde::{Deserialize, Serialize};

use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::error::{PipelineError, StageError, StoreError};
use crate::ingest::IngestReport;
use crate::metrics::Metrics;
use crate::model::{SourceKind, Story};
use crate::operator::{Operator, RunSummary, StoryDetail};
use crate::pipeline::{Stage, VideoJob};
use crate::store::StoryFilter;

#[derive(Clone)]
pub struct AppState {
    pub operator: Operator,
}

pub fn create_router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ingest", post(ingest))
        .route("/stories", get(list_stories))
        .route("/stories/{prefix}", get(show_story))
        .route("/stories/{prefix}/advance", post(advance_story))
        .route("/pipeline/run", post(run_pipeline))
        .layer(CorsLayer::very_permissive())
        .with_state(state);
    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}

/// JSON error body with a status picked from the error kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: &self.message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::NotFound { .. } | StoreError::MissingStory { .. } => StatusCode::NOT_FOUND,
            StoreError::Ambiguous { .. } => StatusCode::CONFLICT,
            _ => {
                tracing::error!(target: "api", error = %e, "store error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Store(s) => s.into(),
            PipelineError::InvalidTarget(_) => ApiError::bad_request(e.to_string()),
            PipelineError::Stage(ref s @ StageError::Transient { .. }) => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: s.to_string(),
            },
            PipelineError::Stage(ref s @ StageError::Fatal { .. }) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                message: s.to_string(),
            },
        }
    }
}

async fn ingest(State(state): State<AppState>) -> Result<Json<IngestReport>, ApiError> {
    Ok(Json(state.operator.ingest().await?))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    stage: Option<String>,
    source: Option<String>,
    limit: Option<usize>,
}

async fn list_stories(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Story>>, ApiError> {
    let stage = q
        .stage
        .as_deref()
        .map(str::parse::<Stage>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let source = q
        .source
        .as_deref()
        .map(str::parse::<SourceKind>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let filter = StoryFilter {
        stage,
        source,
        limit: q.limit,
    };
    Ok(Json(state.operator.list(&filter)?))
}

async fn show_story(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<StoryDetail>, ApiError> {
    Ok(Json(state.operator.show(&prefix)?))
}

#[derive(Debug, Deserialize)]
struct AdvanceReq {
    target: Stage,
}

async fn advance_story(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    Json(body): Json<AdvanceReq>,
) -> Result<Json<VideoJob>, ApiError> {
    tracing::info!(target: "api", prefix = %prefix, target_stage = %body.target, "advance requested");
    Ok(Json(state.operator.advance(&prefix, body.target).await?))
}

fn default_count() -> usize {
    1
}

fn default_target() -> Stage {
    Stage::Rendered
}

#[derive(Debug, Deserialize)]
struct RunReq {
    #[serde(default = "default_count")]
    count: usize,
    #[serde(default = "default_target")]
    target: Stage,
}

async fn run_pipeline(
    State(state): State<AppState>,
    Json(body): Json<RunReq>,
) -> Result<Json<RunSummary>, ApiError> {
    Ok(Json(state.operator.run_top(body.count, body.target).await?))
}
