//! HTTP client for the control API.

use serde::Deserialize;

use crate::config::CliConfig;

/// Response of `GET /api/whoami`.
#[derive(Debug, Deserialize)]
pub struct WhoamiResponse {
    pub token_id: String,
    pub team_id: String,
    pub team_name: String,
    pub created_at: String,
}

/// Response of `POST /api/up`.
#[derive(Debug, Deserialize)]
pub struct UpResponse {
    pub message: String,
    #[serde(default)]
    pub build_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Errors from the API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error ({status}): {message}")]
    Api {
        status: reqwest::StatusCode,
        message: String,
    },
}

/// Bearer-authenticated client for one API server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// Build a client from the resolved CLI configuration.
    pub fn new(config: &CliConfig) -> Result<Self, ApiClientError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            token: config.api_token.clone(),
        })
    }

    pub async fn whoami(&self) -> Result<WhoamiResponse, ApiClientError> {
        let response = self
            .client
            .get(format!("{}/api/whoami", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Upload a source archive for (app, env).
    pub async fn up(
        &self,
        app_id: &str,
        env_id: &str,
        archive: Vec<u8>,
    ) -> Result<UpResponse, ApiClientError> {
        let form = reqwest::multipart::Form::new()
            .text("app_id", app_id.to_owned())
            .text("env_id", env_id.to_owned())
            .part(
                "archive",
                reqwest::multipart::Part::bytes(archive)
                    .file_name("source.tar.gz")
                    .mime_str("application/gzip")?,
            );

        let response = self
            .client
            .post(format!("{}/api/up", self.base_url))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| status.to_string());
            Err(ApiClientError::Api { status, message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(url: &str) -> CliConfig {
        CliConfig {
            api_base_url: url.to_owned(),
            api_token: "tok123".to_owned(),
        }
    }

    #[tokio::test]
    async fn whoami_decodes_and_sends_bearer() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET)
                    .path("/api/whoami")
                    .header("authorization", "Bearer tok123");
                then.status(200).json_body(serde_json::json!({
                    "token_id": "apitoken_1",
                    "team_id": "team_1",
                    "team_name": "acme",
                    "created_at": "2025-01-01T00:00:00Z",
                }));
            })
            .await;

        let client = ApiClient::new(&config_for(&server.base_url())).expect("client");
        let whoami = client.whoami().await.expect("whoami");
        mock.assert_async().await;
        assert_eq!(whoami.team_name, "acme");
        assert_eq!(whoami.team_id, "team_1");
    }

    #[tokio::test]
    async fn api_errors_carry_the_message() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/api/whoami");
                then.status(401)
                    .json_body(serde_json::json!({"error": "unauthorized"}));
            })
            .await;

        let client = ApiClient::new(&config_for(&server.base_url())).expect("client");
        let error = client.whoami().await.expect_err("should fail");
        match error {
            ApiClientError::Api { status, message } => {
                assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
                assert_eq!(message, "unauthorized");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn up_posts_multipart() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/api/up")
                    .header("authorization", "Bearer tok123");
                then.status(200).json_body(serde_json::json!({
                    "message": "build queued",
                    "build_id": "build_1",
                }));
            })
            .await;

        let client = ApiClient::new(&config_for(&server.base_url())).expect("client");
        let response = client
            .up("app_1", "env_1", vec![0x1f, 0x8b])
            .await
            .expect("up");
        mock.assert_async().await;
        assert_eq!(response.build_id.as_deref(), Some("build_1"));
    }
}
