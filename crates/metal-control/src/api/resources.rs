//! App and env endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use metal_core::{AppId, EnvId};
use metal_store::{App, Entity, Env, StoreError};

use super::{ApiError, AppState, AuthedToken};

/// Wire shape shared by apps and envs.
#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
    pub creator_id: String,
    pub team_id: String,
}

impl From<App> for ResourceResponse {
    fn from(app: App) -> Self {
        Self {
            id: app.id.to_string(),
            name: app.name,
            created_at: app.created_at.to_rfc3339(),
            updated_at: app.updated_at.to_rfc3339(),
            creator_id: app.creator_id.to_string(),
            team_id: app.team_id.to_string(),
        }
    }
}

impl From<Env> for ResourceResponse {
    fn from(env: Env) -> Self {
        Self {
            id: env.id.to_string(),
            name: env.name,
            created_at: env.created_at.to_rfc3339(),
            updated_at: env.updated_at.to_rfc3339(),
            creator_id: env.creator_id.to_string(),
            team_id: env.team_id.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub name: String,
}

pub async fn list_apps(
    State(state): State<AppState>,
    AuthedToken(token): AuthedToken,
) -> Result<Json<Vec<ResourceResponse>>, ApiError> {
    let apps = state.store.apps_for_team(&token.team_id).await?;
    Ok(Json(apps.into_iter().map(Into::into).collect()))
}

pub async fn create_app(
    State(state): State<AppState>,
    AuthedToken(token): AuthedToken,
    Path(app_id): Path<String>,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<ResourceResponse>), ApiError> {
    let app_id = AppId::parse(&app_id)?;
    if request.name.trim().is_empty() {
        return Err(ApiError::validation(vec!["name is required".to_owned()]));
    }

    let now = Utc::now();
    let app = App {
        id: app_id,
        team_id: token.team_id.clone(),
        creator_id: token.creator_id.clone(),
        name: request.name,
        created_at: now,
        updated_at: now,
    };
    state.store.create_app(&app).await?;
    info!(app_id = %app.id, team_id = %app.team_id, "app created");
    Ok((StatusCode::CREATED, Json(app.into())))
}

pub async fn get_app(
    State(state): State<AppState>,
    AuthedToken(token): AuthedToken,
    Path(app_id): Path<String>,
) -> Result<Json<ResourceResponse>, ApiError> {
    let app_id = AppId::parse(&app_id)?;
    let app = state.store.app_by_id(&app_id).await?;
    // Another team's app is indistinguishable from a missing one.
    if app.team_id != token.team_id {
        return Err(StoreError::NotFound(Entity::App).into());
    }
    Ok(Json(app.into()))
}

pub async fn delete_app(
    State(state): State<AppState>,
    AuthedToken(token): AuthedToken,
    Path(app_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let app_id = AppId::parse(&app_id)?;
    state.store.delete_app(&token.team_id, &app_id).await?;
    info!(app_id = %app_id, team_id = %token.team_id, "app deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_envs(
    State(state): State<AppState>,
    AuthedToken(token): AuthedToken,
) -> Result<Json<Vec<ResourceResponse>>, ApiError> {
    let envs = state.store.envs_for_team(&token.team_id).await?;
    Ok(Json(envs.into_iter().map(Into::into).collect()))
}

pub async fn create_env(
    State(state): State<AppState>,
    AuthedToken(token): AuthedToken,
    Path(env_id): Path<String>,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<ResourceResponse>), ApiError> {
    let env_id = EnvId::parse(&env_id)?;
    if request.name.trim().is_empty() {
        return Err(ApiError::validation(vec!["name is required".to_owned()]));
    }

    let now = Utc::now();
    let env = Env {
        id: env_id,
        team_id: token.team_id.clone(),
        creator_id: token.creator_id.clone(),
        name: request.name,
        created_at: now,
        updated_at: now,
    };
    state.store.create_env(&env).await?;
    info!(env_id = %env.id, team_id = %env.team_id, "env created");
    Ok((StatusCode::CREATED, Json(env.into())))
}

pub async fn get_env(
    State(state): State<AppState>,
    AuthedToken(token): AuthedToken,
    Path(env_id): Path<String>,
) -> Result<Json<ResourceResponse>, ApiError> {
    let env_id = EnvId::parse(&env_id)?;
    let env = state.store.env_by_id(&env_id).await?;
    if env.team_id != token.team_id {
        return Err(StoreError::NotFound(Entity::Env).into());
    }
    Ok(Json(env.into()))
}

pub async fn delete_env(
    State(state): State<AppState>,
    AuthedToken(token): AuthedToken,
    Path(env_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let env_id = EnvId::parse(&env_id)?;
    state.store.delete_env(&token.team_id, &env_id).await?;
    info!(env_id = %env_id, team_id = %token.team_id, "env deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::test_api;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metal_core::{AppId, EnvId, TypedId};
    use metal_store::{AppStore, TeamStore, UserStore};
    use tower::ServiceExt;

    fn authed(api_token: &str, method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {api_token}"))
            .header("content-type", "application/json")
            .body(body)
            .expect("request")
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf-8")
    }

    #[tokio::test]
    async fn create_and_get_app() {
        let api = test_api().await;
        let app_id = AppId::generate();

        let response = api
            .router
            .clone()
            .oneshot(authed(
                &api.token,
                "POST",
                &format!("/api/apps/{app_id}"),
                Body::from(r#"{"name":"web"}"#),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_string(response).await;
        assert!(body.contains("\"web\""));
        assert!(body.contains(app_id.as_str()));

        let response = api
            .router
            .oneshot(authed(
                &api.token,
                "GET",
                &format!("/api/apps/{app_id}"),
                Body::empty(),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_prefix_is_invalid_app_id() {
        let api = test_api().await;
        let env_id = EnvId::generate();

        let response = api
            .router
            .oneshot(authed(
                &api.token,
                "POST",
                &format!("/api/apps/{env_id}"),
                Body::from(r#"{"name":"web"}"#),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("invalid app_id"), "body was: {body}");
    }

    #[tokio::test]
    async fn cross_team_read_is_not_found() {
        let api = test_api().await;

        // The app belongs to a different team.
        let other_user = api
            .store
            .create_user("other@example.com", "pw-pw-pw-pw")
            .await
            .expect("user");
        let other_team = api
            .store
            .create_team("rivals", &other_user.id)
            .await
            .expect("team");
        let mut app = metal_store::test_fixtures::app();
        app.team_id = other_team.id;
        api.store.create_app(&app).await.expect("app");

        let response = api
            .router
            .oneshot(authed(
                &api.token,
                "GET",
                &format!("/api/apps/{}", app.id),
                Body::empty(),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_app_name_conflicts() {
        let api = test_api().await;

        let first = AppId::generate();
        let response = api
            .router
            .clone()
            .oneshot(authed(
                &api.token,
                "POST",
                &format!("/api/apps/{first}"),
                Body::from(r#"{"name":"web"}"#),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let second = AppId::generate();
        let response = api
            .router
            .oneshot(authed(
                &api.token,
                "POST",
                &format!("/api/apps/{second}"),
                Body::from(r#"{"name":"web"}"#),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn delete_missing_app_is_not_found() {
        let api = test_api().await;
        let response = api
            .router
            .oneshot(authed(
                &api.token,
                "DELETE",
                &format!("/api/apps/{}", AppId::generate()),
                Body::empty(),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn env_endpoints_mirror_apps() {
        let api = test_api().await;
        let env_id = EnvId::generate();

        let response = api
            .router
            .clone()
            .oneshot(authed(
                &api.token,
                "POST",
                &format!("/api/envs/{env_id}"),
                Body::from(r#"{"name":"dev"}"#),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = api
            .router
            .oneshot(authed(&api.token, "GET", "/api/envs", Body::empty()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("\"dev\""));
    }
}
