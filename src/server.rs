//! Reporting HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/categories` | Registered categories with source and columns |
//! | `GET`  | `/data/{category}` | Normalized rows; `limit`, `med_name`, `start_year`, `end_year` |
//! | `GET`  | `/analytics/process-flow` | Status-flow durations of partner transports |
//! | `GET`  | `/analytics/mission-types` | Mission type × weekday group counts |
//! | `POST` | `/cache/clear` | Drop all cached results |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unknown_category", "message": "unknown category: Foo" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unknown_category` (404),
//! `ambiguous_join` (409), `source_unavailable` (503).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use ems_metrics_core::analytics::{mission_type_crosstab, process_flow_report, Crosstab, ProcessFlowReport};
use ems_metrics_core::error::CoordinatorError;
use ems_metrics_core::models::Table;
use ems_metrics_core::registry::CategoryInfo;
use ems_metrics_core::temporal::StatusFlow;

use crate::config::Config;
use crate::loader::{LoadParams, Loader};

#[derive(Clone)]
struct AppState {
    loader: Arc<Loader>,
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let loader = Arc::new(Loader::from_config(config).await?);
    run_server_with_loader(&config.server.bind, loader).await
}

/// Serve an already-built [`Loader`].
pub async fn run_server_with_loader(bind_addr: &str, loader: Arc<Loader>) -> anyhow::Result<()> {
    let app = router(loader);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "reporting API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(loader: Arc<Loader>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/categories", get(handle_categories))
        .route("/data/{category}", get(handle_data))
        .route("/analytics/process-flow", get(handle_process_flow))
        .route("/analytics/mission-types", get(handle_mission_types))
        .route("/cache/clear", post(handle_cache_clear))
        .layer(cors)
        .with_state(AppState { loader })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        let status = match err.code() {
            "unknown_category" => StatusCode::NOT_FOUND,
            "ambiguous_join" => StatusCode::CONFLICT,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /categories ============

#[derive(Serialize)]
struct CategoriesResponse {
    categories: Vec<CategoryInfo>,
}

async fn handle_categories(State(state): State<AppState>) -> Json<CategoriesResponse> {
    Json(CategoriesResponse {
        categories: state.loader.registry().describe(),
    })
}

// ============ GET /data/{category} ============

#[derive(Debug, Deserialize)]
struct DataQuery {
    limit: Option<usize>,
    med_name: Option<String>,
    start_year: Option<i32>,
    end_year: Option<i32>,
}

impl From<DataQuery> for LoadParams {
    fn from(q: DataQuery) -> Self {
        LoadParams {
            limit: q.limit,
            med_name: q.med_name,
            start_year: q.start_year,
            end_year: q.end_year,
        }
    }
}

#[derive(Serialize)]
struct DataResponse {
    count: usize,
    #[serde(flatten)]
    table: Table,
}

async fn handle_data(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<DataQuery>,
) -> Result<Json<DataResponse>, AppError> {
    let request = state
        .loader
        .request(&query.into())
        .map_err(|e| bad_request(e.to_string()))?;
    let table = state.loader.load(&category, &request).await?;
    Ok(Json(DataResponse {
        count: table.len(),
        table: Table::clone(&table),
    }))
}

// ============ GET /analytics/* ============

async fn handle_process_flow(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> Result<Json<ProcessFlowReport>, AppError> {
    let request = state
        .loader
        .request(&LoadParams {
            limit: query.limit,
            ..LoadParams::default()
        })
        .map_err(|e| bad_request(e.to_string()))?;
    let history = state.loader.load("TransportStatusHistory", &request).await?;
    Ok(Json(process_flow_report(&history, &StatusFlow::default())))
}

async fn handle_mission_types(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> Result<Json<Crosstab>, AppError> {
    let request = state
        .loader
        .request(&query.into())
        .map_err(|e| bad_request(e.to_string()))?;
    let details = state.loader.load("Details", &request).await?;
    let holidays = state.loader.holidays().await;
    Ok(Json(mission_type_crosstab(&details, &holidays)))
}

// ============ POST /cache/clear ============

async fn handle_cache_clear(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.loader.clear_cache();
    Json(serde_json::json!({ "cleared": cleared }))
}
