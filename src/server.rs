use crate::{
    detector::FaceBox,
    engine::{DEFAULT_QUEUE_CAPACITY, DetectionEngine},
    error::ServiceError,
    fetch::{FetchConfig, ImageFetcher},
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc, time::Duration};

/// Route of the detection function.
pub const DETECTION_ROUTE: &str = "/api/FaceDetectionFunction";

/// Header carrying the function key.
pub const FUNCTION_KEY_HEADER: &str = "x-functions-key";

/// Server settings shared by the binaries and tests.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub fetch: FetchConfig,
    pub inference_timeout: Duration,
    /// Detections allowed to wait for the engine.
    pub queue_capacity: usize,
    /// Static secret required on the detection route when set.
    pub function_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7071,
            fetch: FetchConfig::default(),
            inference_timeout: Duration::from_secs(30),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            function_key: None,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Body of a detection request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectionRequest {
    pub image_url: String,
}

/// Body of a successful detection response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectionResult {
    pub filename: String,
    pub faces: Vec<FaceBox>,
}

/// Shared state handed to every request.
pub struct AppState {
    pub engine: DetectionEngine,
    pub fetcher: ImageFetcher,
    pub function_key: Option<String>,
}

/// Builds the router with the detection, status and banner routes.
pub fn router(state: Arc<AppState>) -> Router {
    let detection = Router::new()
        .route(DETECTION_ROUTE, post(post_detection))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_function_key,
        ));

    Router::new()
        .route("/", get(|| async { "Welcome to kornia-facedet!" }))
        .route("/status", get(get_status))
        .merge(detection)
        .layer(middleware::from_fn(catch_panic))
        .with_state(state)
}

async fn post_detection(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<DetectionResult>, ServiceError> {
    log::info!("Face detection function processed a request");

    let image_url = parse_request(&body)?;
    let faces = run_pipeline(&state, &image_url).await?;

    log::info!("Detected {} face(s) in {image_url}", faces.len());
    Ok(Json(DetectionResult {
        filename: image_url,
        faces,
    }))
}

fn parse_request(body: &[u8]) -> Result<String, ServiceError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ServiceError::MissingImageUrl)?;
    value
        .get("image_url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or(ServiceError::MissingImageUrl)
}

async fn run_pipeline(state: &AppState, image_url: &str) -> Result<Vec<FaceBox>, ServiceError> {
    log::debug!("Fetching {image_url}");
    let image = state
        .fetcher
        .fetch(image_url)
        .await
        .map_err(|e| ServiceError::from_fetch(image_url, e))?;

    // `image` owns the temp file and is dropped at the end of this scope
    let faces = state.engine.detect(image.path().to_path_buf()).await?;
    Ok(faces)
}

async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": state.engine.state().as_str(),
        "processed": state.engine.processed(),
    }))
}

async fn require_function_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.function_key.as_deref() else {
        return next.run(request).await;
    };

    let from_header = request
        .headers()
        .get(FUNCTION_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let from_query = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(mut params)| params.remove("code"));

    let accepted = [from_header, from_query]
        .iter()
        .flatten()
        .any(|key| keys_match(key, expected));
    if accepted {
        next.run(request).await
    } else {
        log::warn!("Rejected request to {} without a valid function key", request.uri().path());
        StatusCode::UNAUTHORIZED.into_response()
    }
}

// digests have a fixed length, so the comparison time does not depend on the key
fn keys_match(given: &str, expected: &str) -> bool {
    Sha256::digest(given.as_bytes()) == Sha256::digest(expected.as_bytes())
}

async fn catch_panic(request: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            ServiceError::Processing(message).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_requires_a_non_empty_url() {
        assert_eq!(
            parse_request(br#"{"image_url": "http://a/b.jpg"}"#).unwrap(),
            "http://a/b.jpg"
        );
        let bodies: [&[u8]; 7] = [
            b"",
            b"not json",
            b"{}",
            br#"{"image_url": ""}"#,
            br#"{"image_url": null}"#,
            br#"{"image_url": 42}"#,
            br#"["http://a/b.jpg"]"#,
        ];
        for body in bodies {
            assert!(matches!(
                parse_request(body),
                Err(ServiceError::MissingImageUrl)
            ));
        }
    }

    #[test]
    fn keys_compare_by_content() {
        assert!(keys_match("ab+c/d==", "ab+c/d=="));
        assert!(!keys_match("ab+c/d=", "ab+c/d=="));
        assert!(!keys_match("", "ab+c/d=="));
    }

    #[test]
    fn default_config_binds_all_interfaces() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), "0.0.0.0:7071");
        assert!(config.function_key.is_none());
    }
}
