use crate::auth::{AuthError, Claims};
use crate::error::AppError;
use crate::filter::chain::ChainEntryInfo;
use crate::state::{AppState, MetricsSnapshot};
use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct ApiState {
    pub app_state: Arc<AppState>,
    pub prometheus: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
pub struct ReloadRes {
    pub filters: usize,
    pub chain: Vec<ChainEntryInfo>,
}

pub fn router(app_state: Arc<AppState>, prometheus: Option<PrometheusHandle>) -> Router {
    let state = ApiState {
        app_state,
        prometheus,
    };

    let api = Router::new()
        .route("/filters", get(list_chain))
        .route("/filters/builtin", get(list_builtin))
        .route("/stats", get(get_stats))
        .route("/reload", post(reload_chain));

    Router::new()
        .nest("/api", api)
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Active chain, in execution order.
async fn list_chain(_: Claims, State(state): State<ApiState>) -> Json<Vec<ChainEntryInfo>> {
    Json(state.app_state.snapshot().chain.describe())
}

async fn list_builtin(State(state): State<ApiState>) -> Json<Vec<&'static str>> {
    Json(state.app_state.factory().registry().identifiers())
}

async fn get_stats(_: Claims, State(state): State<ApiState>) -> Json<MetricsSnapshot> {
    Json(state.app_state.metrics.snapshot())
}

/// Re-reads the configuration file and swaps in a freshly built chain.
/// A failed build leaves the running chain in place.
async fn reload_chain(claims: Claims, State(state): State<ApiState>) -> Response {
    if !claims.can_reload() {
        return AuthError::Forbidden.into_response();
    }

    let app_state = state.app_state.clone();
    let result = tokio::task::spawn_blocking(move || app_state.reload())
        .await
        .map_err(|e| AppError::Internal(format!("reload task failed: {}", e)))
        .and_then(|r| r);

    match result {
        Ok(snapshot) => {
            tracing::info!("♻️ Filter chain reloaded by {}", claims.sub);
            Json(ReloadRes {
                filters: snapshot.chain.len(),
                chain: snapshot.chain.describe(),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!("❌ Reload rejected, keeping current chain: {}", e);
            e.into_response()
        }
    }
}

async fn render_metrics(State(state): State<ApiState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
