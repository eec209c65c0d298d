// HTTP Server
// Router, request handlers and middleware

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::Serialize;
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
};

use crate::commands;
use crate::models::Settings;
use crate::services::{FFmpegHandler, LaunchError, StreamControlError};

const FALLBACK_RATE_LIMIT_PER_MINUTE: u32 = 100;

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub ffmpeg_handler: Arc<FFmpegHandler>,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl AppState {
    pub fn new(ffmpeg_handler: Arc<FFmpegHandler>, rate_limit_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(rate_limit_per_minute)
            .or(NonZeroU32::new(FALLBACK_RATE_LIMIT_PER_MINUTE))
            .unwrap_or(NonZeroU32::MIN);
        Self {
            ffmpeg_handler,
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Arc::new(FFmpegHandler::from_settings(settings)),
            settings.rate_limit_per_minute,
        )
    }
}

// ============================================================================
// Error Responses
// ============================================================================

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    timestamp: String,
}

fn error_response(status: StatusCode, error: &str, message: String) -> Response {
    let body = ErrorBody {
        error: error.to_string(),
        message,
        timestamp: commands::timestamp(),
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for LaunchError {
    fn into_response(self) -> Response {
        let status = match self {
            LaunchError::MissingStreamKey => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, "Failed to start stream", self.to_string())
    }
}

impl IntoResponse for StreamControlError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            StreamControlError::NotFound(_) => (StatusCode::NOT_FOUND, "Stream not found"),
            StreamControlError::AlreadyFinished(_) => (StatusCode::CONFLICT, "Stream already finished"),
        };
        error_response(status, error, self.to_string())
    }
}

// ============================================================================
// CORS Configuration
// ============================================================================

/// Comma-separated origin allow-list; `scheme://host:*` matches any port
fn build_cors_layer(cors_origins: &str) -> CorsLayer {
    let allowed_origins: Vec<String> = cors_origins
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin_str = match origin.to_str() {
                Ok(s) => s,
                Err(_) => return false,
            };

            allowed_origins.iter().any(|allowed| {
                if allowed.ends_with(":*") {
                    let prefix = allowed.trim_end_matches(":*");
                    origin_str.starts_with(prefix) && origin_str[prefix.len()..].starts_with(':')
                } else {
                    origin_str == allowed
                }
            })
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

// ============================================================================
// Middleware
// ============================================================================

async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match state.rate_limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_) => error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded",
            "Too many requests. Please try again later.".to_string(),
        ),
    }
}

// ============================================================================
// Request Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(commands::health_status())
}

async fn start_stream(State(state): State<AppState>) -> Response {
    match commands::start_stream(&state.ffmpeg_handler) {
        Ok(started) => Json(started).into_response(),
        Err(e) => {
            log::error!("Error starting stream: {e}");
            e.into_response()
        }
    }
}

async fn list_streams(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "streams": commands::list_streams(&state.ffmpeg_handler) }))
}

async fn get_stream(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match commands::get_stream(&state.ffmpeg_handler, &id) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn stop_stream(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match commands::stop_stream(&state.ffmpeg_handler, &id) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState, cors_origins: &str) -> Router {
    Router::new()
        .route("/health", get(health).post(health))
        .route("/api/health", get(health).post(health))
        .route("/api/stream", get(start_stream).post(start_stream))
        .route("/api/streams", get(list_streams))
        .route("/api/stream/:id", get(get_stream))
        .route("/api/stream/:id/stop", post(stop_stream))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
        .layer(build_cors_layer(cors_origins))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    const KEY: &str = "abcd-efgh-ijkl";

    fn settings(ffmpeg_path: &str, stream_key: &str) -> Settings {
        Settings {
            ffmpeg_path: ffmpeg_path.to_string(),
            stream_key: stream_key.to_string(),
            ..Default::default()
        }
    }

    /// Serve the router on an ephemeral port and return its base URL
    async fn serve(settings: &Settings) -> String {
        let app = build_router(AppState::from_settings(settings), &settings.cors_origins);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}")
    }

    #[tokio::test]
    async fn test_health_get_and_post() {
        let base = serve(&Settings::default()).await;
        let client = reqwest::Client::new();

        for response in [
            client.get(format!("{base}/api/health")).send().await.unwrap(),
            client.post(format!("{base}/api/health")).send().await.unwrap(),
            client.get(format!("{base}/health")).send().await.unwrap(),
        ] {
            assert_eq!(response.status().as_u16(), 200);
            assert_eq!(response.headers()["cache-control"], "no-store");
            let body: Value = response.json().await.unwrap();
            assert_eq!(body["status"], "OK");
            assert_eq!(body["service"], "YouTube Stream Controller");
            let timestamp = body["timestamp"].as_str().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
        }
    }

    #[tokio::test]
    async fn test_stream_launch_responds_immediately() {
        let base = serve(&settings("true", KEY)).await;

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            reqwest::Client::new().post(format!("{base}/api/stream")).send(),
        )
        .await
        .expect("handler must not wait for the stream")
        .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "YouTube stream started");
        assert_eq!(body["streamUrl"], "rtmp://a.rtmp.youtube.com/live2/abcd-efgh-ijkl");
        assert_eq!(body["duration"], "4 minutes");
        assert!(body["note"].as_str().unwrap().contains("4 minutes"));
        assert!(chrono::DateTime::parse_from_rfc3339(body["timestamp"].as_str().unwrap()).is_ok());

        let id = body["id"].as_str().unwrap();
        let status: Value = reqwest::get(format!("{base}/api/stream/{id}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["id"], id);
        assert_eq!(status["streamUrl"], "rtmp://a.rtmp.youtube.com/live2/***");
    }

    #[tokio::test]
    async fn test_two_launches_both_succeed() {
        let base = serve(&settings("true", KEY)).await;
        let client = reqwest::Client::new();

        let (first, second) = tokio::join!(
            client.get(format!("{base}/api/stream")).send(),
            client.get(format!("{base}/api/stream")).send(),
        );
        let first: Value = first.unwrap().json().await.unwrap();
        let second: Value = second.unwrap().json().await.unwrap();
        assert_ne!(first["id"], second["id"]);

        let list: Value = reqwest::get(format!("{base}/api/streams")).await.unwrap().json().await.unwrap();
        assert_eq!(list["streams"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_encoder_returns_500() {
        let base = serve(&settings("/nonexistent/ffmpeg", KEY)).await;

        let response = reqwest::get(format!("{base}/api/stream")).await.unwrap();
        assert_eq!(response.status().as_u16(), 500);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Failed to start stream");
        assert!(!body["message"].as_str().unwrap().is_empty());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_missing_stream_key_is_rejected() {
        let base = serve(&settings("true", "")).await;

        let response = reqwest::get(format!("{base}/api/stream")).await.unwrap();
        assert_eq!(response.status().as_u16(), 503);
        let body: Value = response.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains("YOUTUBE_STREAM_KEY"));

        let list: Value = reqwest::get(format!("{base}/api/streams")).await.unwrap().json().await.unwrap();
        assert!(list["streams"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_stream_returns_404() {
        let base = serve(&Settings::default()).await;
        let client = reqwest::Client::new();

        let response = client.get(format!("{base}/api/stream/unknown")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 404);

        let response = client.post(format!("{base}/api/stream/unknown/stop")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }

    /// Poll a stream until it reaches `state`
    async fn wait_for_state(base: &str, id: &str, state: &str) -> Value {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let status: Value = reqwest::get(format!("{base}/api/stream/{id}"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if status["state"] == state || std::time::Instant::now() > deadline {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_stop_running_stream() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let encoder = dir.path().join("ffmpeg");
        std::fs::write(&encoder, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&encoder, std::fs::Permissions::from_mode(0o755)).unwrap();
        let base = serve(&settings(&encoder.to_string_lossy(), KEY)).await;
        let client = reqwest::Client::new();

        // A freshly written script can be briefly busy while another test forks
        let mut launched = None;
        for _ in 0..10 {
            let response = client.post(format!("{base}/api/stream")).send().await.unwrap();
            if response.status().is_success() {
                launched = Some(response.json::<Value>().await.unwrap());
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let launched = launched.unwrap();
        let id = launched["id"].as_str().unwrap();

        let response = client.post(format!("{base}/api/stream/{id}/stop")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["id"], id);

        let status = wait_for_state(&base, id, "stopped").await;
        assert_eq!(status["state"], "stopped");
        assert!(status["endedAt"].is_string());
    }

    #[tokio::test]
    async fn test_stop_finished_stream_returns_409() {
        let base = serve(&settings("true", KEY)).await;
        let client = reqwest::Client::new();

        let launched: Value = client.post(format!("{base}/api/stream")).send().await.unwrap().json().await.unwrap();
        let id = launched["id"].as_str().unwrap();
        assert_eq!(wait_for_state(&base, id, "exited").await["state"], "exited");

        let response = client.post(format!("{base}/api/stream/{id}/stop")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 409);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Stream already finished");
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let mut settings = Settings::default();
        settings.rate_limit_per_minute = 1;
        let base = serve(&settings).await;

        assert_eq!(reqwest::get(format!("{base}/health")).await.unwrap().status().as_u16(), 200);
        let limited = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(limited.status().as_u16(), 429);
    }

    #[tokio::test]
    async fn test_cors_allows_localhost_any_port() {
        let base = serve(&Settings::default()).await;
        let client = reqwest::Client::new();

        let allowed = client
            .get(format!("{base}/health"))
            .header("Origin", "http://localhost:5173")
            .send()
            .await
            .unwrap();
        assert_eq!(allowed.headers()["access-control-allow-origin"], "http://localhost:5173");

        let denied = client
            .get(format!("{base}/health"))
            .header("Origin", "https://evil.example")
            .send()
            .await
            .unwrap();
        assert!(denied.headers().get("access-control-allow-origin").is_none());
    }
}
