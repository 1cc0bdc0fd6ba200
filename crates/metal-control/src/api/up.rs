//! Source upload endpoint.
//!
//! Accepts a multipart form with `env_id`, `app_id`, and `archive` (a
//! `.tar.gz` of the app source). The archive is streamed to a temp file as
//! it arrives, never buffered whole in memory, then unpacked next to it.

use std::path::{Path, PathBuf};

use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use metal_core::{AppId, EnvId};
use metal_store::Entity;

use super::{ApiError, AppState, AuthedToken};

/// Response for a successful upload.
#[derive(Debug, Serialize)]
pub struct UpResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
}

pub async fn up(
    State(state): State<AppState>,
    AuthedToken(token): AuthedToken,
    mut multipart: Multipart,
) -> Result<Json<UpResponse>, ApiError> {
    tokio::fs::create_dir_all(&state.temp_root)
        .await
        .map_err(|e| ApiError::Internal(format!("temp root unavailable: {e}")))?;
    let scratch = tempfile::tempdir_in(&state.temp_root)
        .map_err(|e| ApiError::Internal(format!("scratch dir: {e}")))?;

    let mut env_id_raw: Option<String> = None;
    let mut app_id_raw: Option<String> = None;
    let mut archive_path: Option<PathBuf> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(vec![format!("malformed multipart body: {e}")]))?
    {
        let name = field.name().map(ToOwned::to_owned);
        match name.as_deref() {
            Some("env_id") => {
                env_id_raw = Some(field.text().await.map_err(|e| {
                    ApiError::validation(vec![format!("unreadable env_id: {e}")])
                })?);
            }
            Some("app_id") => {
                app_id_raw = Some(field.text().await.map_err(|e| {
                    ApiError::validation(vec![format!("unreadable app_id: {e}")])
                })?);
            }
            Some("archive") => {
                let path = scratch.path().join("archive.tar.gz");
                let mut file = tokio::fs::File::create(&path)
                    .await
                    .map_err(|e| ApiError::Internal(format!("archive file: {e}")))?;
                while let Some(chunk) = field.chunk().await.map_err(|e| {
                    ApiError::validation(vec![format!("unreadable archive: {e}")])
                })? {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| ApiError::Internal(format!("archive write: {e}")))?;
                }
                file.flush()
                    .await
                    .map_err(|e| ApiError::Internal(format!("archive flush: {e}")))?;
                archive_path = Some(path);
            }
            _ => {}
        }
    }

    let mut violations = Vec::new();
    if env_id_raw.as_deref().unwrap_or_default().is_empty() {
        violations.push("env_id is required".to_owned());
    }
    if app_id_raw.as_deref().unwrap_or_default().is_empty() {
        violations.push("app_id is required".to_owned());
    }
    if archive_path.is_none() {
        violations.push("archive is required".to_owned());
    }

    let env_id = env_id_raw
        .as_deref()
        .map(EnvId::parse)
        .and_then(|parsed| match parsed {
            Ok(id) => Some(id),
            Err(e) => {
                violations.push(e.to_string());
                None
            }
        });
    let app_id = app_id_raw
        .as_deref()
        .map(AppId::parse)
        .and_then(|parsed| match parsed {
            Ok(id) => Some(id),
            Err(e) => {
                violations.push(e.to_string());
                None
            }
        });

    if let Some(app_id) = &app_id {
        match state.store.app_by_id(app_id).await {
            Ok(app) if app.team_id != token.team_id => {
                violations.push("app does not belong to team".to_owned());
            }
            Ok(_) => {}
            Err(e) if e.is_not_found(Entity::App) => {
                violations.push("app not found".to_owned());
            }
            Err(e) => return Err(e.into()),
        }
    }
    if let Some(env_id) = &env_id {
        match state.store.env_by_id(env_id).await {
            Ok(env) if env.team_id != token.team_id => {
                violations.push("env does not belong to team".to_owned());
            }
            Ok(_) => {}
            Err(e) if e.is_not_found(Entity::Env) => {
                violations.push("env not found".to_owned());
            }
            Err(e) => return Err(e.into()),
        }
    }

    if !violations.is_empty() {
        return Err(ApiError::validation(violations));
    }

    let (Some(app_id), Some(archive_path)) = (app_id, archive_path) else {
        return Err(ApiError::validation(vec!["incomplete upload".to_owned()]));
    };

    let extract_dir = scratch.path().join("source");
    unpack(&archive_path, &extract_dir)
        .await
        .map_err(|e| ApiError::validation(vec![format!("archive is not a valid .tar.gz: {e}")]))?;

    let build = state
        .store
        .init_build(&token.team_id, &token.creator_id, &app_id)
        .await?;

    info!(
        build_id = %build.id,
        app_id = %app_id,
        team_id = %token.team_id,
        "source uploaded and unpacked"
    );

    Ok(Json(UpResponse {
        message: "build queued".to_owned(),
        build_id: Some(build.id.to_string()),
    }))
}

/// Untar a `.tar.gz` on a blocking thread.
async fn unpack(archive: &Path, dest: &Path) -> Result<(), String> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dest).map_err(|e| e.to_string())?;
        let file = std::fs::File::open(&archive).map_err(|e| e.to_string())?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut tar = tar::Archive::new(decoder);
        tar.unpack(&dest).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| e.to_string())?
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::test_api;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metal_store::AppStore;
    use tower::ServiceExt;

    const BOUNDARY: &str = "metal-test-boundary";

    fn text_part(name: &str, value: &str) -> Vec<u8> {
        format!(
            "--{BOUNDARY}\r\ncontent-disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        )
        .into_bytes()
    }

    fn file_part(name: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
        let mut part = format!(
            "--{BOUNDARY}\r\ncontent-disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\ncontent-type: application/gzip\r\n\r\n"
        )
        .into_bytes();
        part.extend_from_slice(bytes);
        part.extend_from_slice(b"\r\n");
        part
    }

    fn multipart_body(parts: Vec<Vec<u8>>) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend(part);
        }
        body.extend(format!("--{BOUNDARY}--\r\n").into_bytes());
        body
    }

    fn up_request(token: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/up")
            .header("authorization", format!("Bearer {token}"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    fn sample_archive() -> Vec<u8> {
        let encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let content = b"fn main() {}\n";
        let mut header = tar::Header::new_gnu();
        header.set_path("src/main.rs").expect("path");
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, content.as_slice()).expect("append");
        builder
            .into_inner()
            .expect("tar")
            .finish()
            .expect("gzip")
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf-8")
    }

    #[tokio::test]
    async fn missing_archive_is_rejected() {
        let api = test_api().await;
        let mut app = metal_store::test_fixtures::app();
        app.team_id = api.team_id.clone();
        api.store.create_app(&app).await.expect("app");
        let env = metal_store::test_fixtures::env(&api.team_id);
        api.store.create_env(&env).await.expect("env");

        let body = multipart_body(vec![
            text_part("env_id", env.id.as_ref()),
            text_part("app_id", app.id.as_ref()),
        ]);
        let response = api
            .router
            .oneshot(up_request(&api.token, body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("archive is required"), "body was: {body}");
    }

    #[tokio::test]
    async fn cross_team_app_is_rejected() {
        let api = test_api().await;
        // App owned by nobody we know.
        let app = metal_store::test_fixtures::app();
        api.store.create_app(&app).await.expect("app");
        let env = metal_store::test_fixtures::env(&api.team_id);
        api.store.create_env(&env).await.expect("env");

        let body = multipart_body(vec![
            text_part("env_id", env.id.as_ref()),
            text_part("app_id", app.id.as_ref()),
            file_part("archive", "source.tar.gz", &sample_archive()),
        ]);
        let response = api
            .router
            .oneshot(up_request(&api.token, body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(
            body.contains("app does not belong to team"),
            "body was: {body}"
        );
    }

    #[tokio::test]
    async fn violations_are_joined() {
        let api = test_api().await;
        let body = multipart_body(vec![]);
        let response = api
            .router
            .oneshot(up_request(&api.token, body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("env_id is required"));
        assert!(body.contains("app_id is required"));
        assert!(body.contains("archive is required"));
    }

    #[tokio::test]
    async fn valid_upload_creates_a_build() {
        let api = test_api().await;
        let mut app = metal_store::test_fixtures::app();
        app.team_id = api.team_id.clone();
        api.store.create_app(&app).await.expect("app");
        let env = metal_store::test_fixtures::env(&api.team_id);
        api.store.create_env(&env).await.expect("env");

        let body = multipart_body(vec![
            text_part("env_id", env.id.as_ref()),
            text_part("app_id", app.id.as_ref()),
            file_part("archive", "source.tar.gz", &sample_archive()),
        ]);
        let response = api
            .router
            .oneshot(up_request(&api.token, body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).expect("json");
        assert_eq!(json["message"], "build queued");
        let build_id = json["build_id"].as_str().expect("build id");
        assert!(build_id.starts_with("build_"));
    }

    #[tokio::test]
    async fn corrupt_archive_is_rejected() {
        let api = test_api().await;
        let mut app = metal_store::test_fixtures::app();
        app.team_id = api.team_id.clone();
        api.store.create_app(&app).await.expect("app");
        let env = metal_store::test_fixtures::env(&api.team_id);
        api.store.create_env(&env).await.expect("env");

        let body = multipart_body(vec![
            text_part("env_id", env.id.as_ref()),
            text_part("app_id", app.id.as_ref()),
            file_part("archive", "source.tar.gz", b"definitely not gzip"),
        ]);
        let response = api
            .router
            .oneshot(up_request(&api.token, body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
