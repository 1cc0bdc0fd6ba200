//! The CLI-facing HTTP API.
//!
//! JSON over bearer-token auth. Every error becomes a single
//! `{"error": "…"}` body; cross-team reads 404 exactly like missing rows so
//! ids never leak across team boundaries.

mod resources;
mod up;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use metal_store::{ApiToken, Entity, Store, StoreError};

pub use up::UpResponse;

/// Shared state for the API routes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// Root for upload scratch space.
    pub temp_root: PathBuf,
}

/// Ceiling on a source upload. The archive streams to disk, so this bounds
/// disk use per request, not memory.
const UPLOAD_LIMIT_BYTES: usize = 512 * 1024 * 1024;

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/whoami", get(whoami))
        .route("/api/apps", get(resources::list_apps))
        .route(
            "/api/apps/{app_id}",
            post(resources::create_app)
                .get(resources::get_app)
                .delete(resources::delete_app),
        )
        .route("/api/envs", get(resources::list_envs))
        .route(
            "/api/envs/{env_id}",
            post(resources::create_env)
                .get(resources::get_env)
                .delete(resources::delete_env),
        )
        .route(
            "/api/up",
            post(up::up).layer(axum::extract::DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .with_state(state)
}

/// API error, mapped onto a status code and a single `{"error"}` body.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(String),
    Validation(Vec<String>),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    /// Joined validation failure.
    #[must_use]
    pub fn validation(violations: Vec<String>) -> Self {
        Self::Validation(violations)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(entity) => Self::NotFound(format!("{entity} not found")),
            StoreError::Conflict { entity, key } => {
                Self::Conflict(format!("{entity} already exists: {key}"))
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<metal_core::IdError> for ApiError {
    fn from(e: metal_core::IdError) -> Self {
        Self::Validation(vec![e.to_string()])
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_owned()),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Validation(violations) => (StatusCode::BAD_REQUEST, violations.join(", ")),
            Self::Conflict(message) => (StatusCode::CONFLICT, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// The bearer credential resolved to its token row.
pub struct AuthedToken(pub ApiToken);

impl FromRequestParts<AppState> for AuthedToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());
        let token = match header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) => token,
            None => return Err(ApiError::Unauthorized),
        };

        let record = match state.store.token_by_token(token).await {
            Ok(record) => record,
            Err(e) if e.is_not_found(Entity::ApiToken) => return Err(ApiError::Unauthorized),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = state
            .store
            .touch_token_last_used(&record.id, Utc::now())
            .await
        {
            debug!(error = %e, "failed to record token use");
        }

        Ok(Self(record))
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct WhoamiResponse {
    token_id: String,
    team_id: String,
    team_name: String,
    created_at: String,
}

async fn whoami(
    axum::extract::State(state): axum::extract::State<AppState>,
    AuthedToken(token): AuthedToken,
) -> Result<Json<WhoamiResponse>, ApiError> {
    let team = state.store.team_by_id(&token.team_id).await?;
    Ok(Json(WhoamiResponse {
        token_id: token.id.to_string(),
        team_id: token.team_id.to_string(),
        team_name: team.name,
        created_at: token.created_at.to_rfc3339(),
    }))
}


#[cfg(test)]
mod tests {
    use super::test_support::test_api;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_requires_no_auth() {
        let api = test_api().await;
        let response = api
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn whoami_returns_token_and_team() {
        let api = test_api().await;
        let response = api
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/whoami")
                    .header("authorization", format!("Bearer {}", api.token))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["team_id"], api.team_id.to_string());
        assert_eq!(body["team_name"], "acme");
        assert!(body["created_at"].as_str().expect("ts").contains('T'));
    }

    #[tokio::test]
    async fn bad_bearer_is_unauthorized() {
        let api = test_api().await;
        let response = api
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/whoami")
                    .header("authorization", "Bearer not-a-token")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_bearer_is_unauthorized() {
        let api = test_api().await;
        let response = api
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/whoami")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
