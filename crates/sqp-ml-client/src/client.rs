//! Segmentation service HTTP client.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{MlError, MlResult};
use crate::retry::{with_retry, RetryConfig};
use crate::types::{
    AddPromptRequest, AddPromptResponse, ClearPromptsRequest, CreateSessionRequest,
    CreateSessionResponse, HealthResponse, PropagateBody, PropagateResponse,
};

/// Configuration for the segmentation client.
#[derive(Debug, Clone)]
pub struct SegmenterClientConfig {
    /// Base URL of the segmentation service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Backoff for unavailable service and refused connections
    pub retry: RetryConfig,
    /// Service expects prompts divided by frame width/height
    pub normalized_points: bool,
}

impl Default for SegmenterClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(600), // full-chunk propagation
            retry: RetryConfig::default(),
            normalized_points: false,
        }
    }
}

impl SegmenterClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("SEGMENTER_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            timeout: std::env::var("SEGMENTER_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            retry: RetryConfig::from_env(),
            normalized_points: std::env::var("SEGMENTER_NORMALIZED_POINTS")
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.normalized_points),
        }
    }
}

/// Client for a remote promptable video segmentation service.
pub struct SegmenterClient {
    http: Client,
    config: SegmenterClientConfig,
}

impl SegmenterClient {
    pub fn new(config: SegmenterClientConfig) -> MlResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MlError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> MlResult<Self> {
        Self::new(SegmenterClientConfig::from_env())
    }

    pub fn config(&self) -> &SegmenterClientConfig {
        &self.config
    }

    /// Check if the segmentation service is healthy.
    pub async fn health_check(&self) -> MlResult<bool> {
        let url = self.url("/health");

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Segmentation service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Segmentation service health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// Allocate a session over a staged frame directory.
    pub async fn create_session(&self, request: &CreateSessionRequest) -> MlResult<CreateSessionResponse> {
        debug!(
            frames_dir = %request.frames_dir,
            frames = request.frame_names.len(),
            "Creating segmentation session"
        );
        self.send_json(Method::POST, "/sessions", Some(request)).await
    }

    pub async fn add_prompt(&self, session_id: &str, request: &AddPromptRequest) -> MlResult<AddPromptResponse> {
        let path = format!("/sessions/{}/prompts", session_id);
        self.send_json(Method::POST, &path, Some(request)).await
    }

    pub async fn clear_prompts(&self, session_id: &str, request: &ClearPromptsRequest) -> MlResult<()> {
        let path = format!("/sessions/{}/prompts/clear", session_id);
        self.send(Method::POST, &path, Some(request)).await?;
        Ok(())
    }

    pub async fn propagate(&self, session_id: &str, body: &PropagateBody) -> MlResult<PropagateResponse> {
        let path = format!("/sessions/{}/propagate", session_id);
        self.send_json(Method::POST, &path, Some(body)).await
    }

    /// Clear prompts and tracking state, keeping the session allocated.
    pub async fn reset(&self, session_id: &str) -> MlResult<()> {
        let path = format!("/sessions/{}/reset", session_id);
        self.send::<()>(Method::POST, &path, None).await?;
        Ok(())
    }

    pub async fn close_session(&self, session_id: &str) -> MlResult<()> {
        let path = format!("/sessions/{}", session_id);
        self.send::<()>(Method::DELETE, &path, None).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn send_json<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> MlResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self.send(method, path, body).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| MlError::InvalidResponse(format!("{}: {}", path, e)))
    }

    async fn send<B>(&self, method: Method, path: &str, body: Option<&B>) -> MlResult<Response>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = self.url(path);
        let operation = format!("{} {}", method, path);

        with_retry(&self.config.retry, &operation, || async {
            let mut request = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await.map_err(|e| self.transport_error(e))?;
            check_status(response, path).await
        })
        .await
    }

    fn transport_error(&self, e: reqwest::Error) -> MlError {
        if e.is_timeout() {
            MlError::Timeout(self.config.timeout.as_secs())
        } else {
            MlError::Network(e)
        }
    }
}

async fn check_status(response: Response, path: &str) -> MlResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    // Seconds form only; HTTP-date values fall back to backoff
    let retry_after_ms = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000));
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::SERVICE_UNAVAILABLE => MlError::ServiceUnavailable {
            message,
            retry_after_ms,
        },
        StatusCode::NOT_FOUND => MlError::SessionNotFound(path.to_string()),
        _ => MlError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqp_models::ObjectId;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SegmenterClient {
        SegmenterClient::new(SegmenterClientConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
            normalized_points: false,
        })
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = SegmenterClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8001");
        assert_eq!(config.retry, RetryConfig::default());
        assert!(!config.normalized_points);
    }

    #[tokio::test]
    async fn test_create_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .and(body_partial_json(json!({"frame_names": ["000000.jpg", "000005.jpg"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "session_id": "s-1",
                "height": 720,
                "width": 1280
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .create_session(&CreateSessionRequest {
                frames_dir: "/work/chunk_0/frames".into(),
                frame_names: vec!["000000.jpg".into(), "000005.jpg".into()],
                offload_video_to_cpu: true,
                offload_state_to_cpu: false,
            })
            .await
            .unwrap();
        assert_eq!(response.session_id, "s-1");
        assert_eq!((response.height, response.width), (720, 1280));
    }

    #[tokio::test]
    async fn test_unavailable_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/s-1/prompts"))
            .respond_with(
                ResponseTemplate::new(503)
                    .insert_header("Retry-After", "0")
                    .set_body_string("warming up"),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sessions/s-1/prompts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "frame_idx": 0,
                "obj_id": "1",
                "mask": {"size": [2, 2], "counts": "1 2 1"}
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .add_prompt(
                "s-1",
                &AddPromptRequest {
                    frame_idx: 0,
                    obj_id: ObjectId::from("1"),
                    points: vec![[1.0, 0.0]],
                    labels: vec![1],
                    box_prompt: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(response.mask.counts, "1 2 1");
    }

    #[tokio::test]
    async fn test_missing_session_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/gone/reset"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).reset("gone").await.unwrap_err();
        assert!(matches!(err, MlError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/s-1/propagate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .propagate(
                "s-1",
                &PropagateBody {
                    start_frame_idx: 0,
                    reverse: false,
                    max_frame_num_to_track: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MlError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        assert!(client_for(&server).health_check().await.unwrap());
    }
}
