//! HTTP surface: health, version and the peer RPC endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use stagehand_staging::StagingController;
use tower_http::trace::TraceLayer;

/// Header peers use to present the shared auth token.
pub const AUTH_HEADER: &str = "x-staging-auth";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The controller this daemon runs
    pub controller: Arc<StagingController>,

    /// Opaque token required on the RPC surface; empty disables the check
    pub auth_token: String,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(controller: Arc<StagingController>, auth_token: String) -> Self {
        Self {
            controller,
            auth_token,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();
        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        }
    }
}

/// Create the daemon router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/version", get(version))
        .nest("/api/v1", Router::new().route("/busy", get(busy)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
}

async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: state.version.clone(),
    })
}

#[derive(Debug, Serialize)]
pub struct BusyResponse {
    /// Whether a queue item is currently in flight
    pub busy: bool,

    /// Name of the in-flight item, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_queue: Option<String>,
}

/// Peer controllers ask for busy state before dispatching work.
async fn busy(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BusyResponse>, StatusCode> {
    if !state.auth_token.is_empty() {
        let presented = headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if presented != state.auth_token {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    Ok(Json(BusyResponse {
        busy: state.controller.is_busy(),
        current_queue: state.controller.current_item().map(|q| q.metadata.name),
    }))
}

#[cfg(test)]
mod tests {
    use stagehand_staging::{ControllerOptions, RunnerCredentials};
    use stagehand_store::{InMemoryConfigSource, InMemoryObjectStore, InMemoryQueueSource};

    use super::*;

    fn test_state(auth_token: &str) -> AppState {
        let store = Arc::new(InMemoryObjectStore::new());
        let queue = Arc::new(InMemoryQueueSource::new(store.clone()));
        let controller = StagingController::new(
            "teamtest",
            "s2h-teamtest",
            queue,
            Arc::new(InMemoryConfigSource::new()),
            store,
            RunnerCredentials::default(),
            ControllerOptions::default(),
        );
        AppState::new(controller, auth_token.to_string())
    }

    #[tokio::test]
    async fn busy_rejects_missing_token() {
        let state = test_state("12345");
        let result = busy(State(state), HeaderMap::new()).await;
        assert_eq!(result.unwrap_err(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn busy_reports_idle_controller() {
        let state = test_state("12345");
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_HEADER, "12345".parse().unwrap());

        let response = busy(State(state), headers).await.unwrap();
        assert!(!response.0.busy);
        assert!(response.0.current_queue.is_none());
    }

    #[tokio::test]
    async fn health_reports_version() {
        let state = test_state("");
        let response = health_check(State(state)).await;
        assert_eq!(response.0.status, "healthy");
        assert!(!response.0.version.is_empty());
    }
}
