use crate::config::InferenceServiceConfig;
use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    StatusCode,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference call exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("Inference service answered {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Malformed inference response: {0}")]
    Malformed(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One labeled box as returned by the inference service. `bbox` is kept as a
/// list so boxes of the wrong arity survive decoding and can be skipped later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub bbox: Vec<f32>,
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default)]
    pub score: f32,
}

fn default_label() -> String {
    "unknown".to_string()
}

impl Detection {
    pub fn new(bbox: [f32; 4], label: &str, score: f32) -> Self {
        Self {
            bbox: bbox.to_vec(),
            label: label.to_string(),
            score,
        }
    }

    /// `(x1, y1, x2, y2)` truncated to pixels, or `None` for a malformed box.
    pub fn corners(&self) -> Option<(i32, i32, i32, i32)> {
        match self.bbox.as_slice() {
            [x1, y1, x2, y2] => Some((*x1 as i32, *y1 as i32, *x2 as i32, *y2 as i32)),
            _ => None,
        }
    }

    pub fn caption(&self) -> String {
        format!("{}: {:.2}", self.label, self.score)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PredictionResponse {
    #[serde(default)]
    pub predictions: Vec<Detection>,
}

/// Anything that turns a JPEG frame into detections within a time budget.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    async fn detect(&self, jpeg: Vec<u8>, budget: Duration)
        -> Result<Vec<Detection>, InferenceError>;
}

pub struct HttpInferenceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInferenceClient {
    pub fn new(config: &InferenceServiceConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.get_address(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn health(&self) -> Result<serde_json::Value, InferenceError> {
        let response = self.client.get(self.url("health")).send().await?;
        Self::json_body(response).await
    }

    /// `GET /setup` without a body, `POST /setup` with one.
    pub async fn setup(
        &self,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, InferenceError> {
        let request = match body {
            Some(body) => self.client.post(self.url("setup")).json(&body),
            None => self.client.get(self.url("setup")),
        };
        Self::json_body(request.send().await?).await
    }

    /// Opaque JSON pass-through for `predict`, `webhook` and `image_exists`.
    #[instrument(skip(self, body))]
    pub async fn forward(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, InferenceError> {
        let response = self.client.post(self.url(path)).json(&body).send().await?;
        Self::json_body(response).await
    }

    async fn json_body(response: reqwest::Response) -> Result<serde_json::Value, InferenceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status { status, body });
        }
        response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(e.to_string()))
    }

    async fn predict_image(&self, jpeg: Vec<u8>) -> Result<Vec<Detection>, InferenceError> {
        let part = Part::bytes(jpeg)
            .file_name("image.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("image", part);

        let response = self
            .client
            .post(self.url("predict"))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status { status, body });
        }

        let body = response.bytes().await?;
        parse_predictions(&body)
    }
}

pub fn parse_predictions(body: &[u8]) -> Result<Vec<Detection>, InferenceError> {
    serde_json::from_slice::<PredictionResponse>(body)
        .map(|response| response.predictions)
        .map_err(|e| InferenceError::Malformed(e.to_string()))
}

#[async_trait]
impl Detector for HttpInferenceClient {
    #[instrument(skip(self, jpeg), fields(bytes = jpeg.len()))]
    async fn detect(
        &self,
        jpeg: Vec<u8>,
        budget: Duration,
    ) -> Result<Vec<Detection>, InferenceError> {
        match tokio::time::timeout(budget, self.predict_image(jpeg)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(budget)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Multipart,
        routing::{get, post},
        Json, Router,
    };
    use tokio::net::TcpListener;

    async fn spawn_service(router: Router) -> HttpInferenceClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        HttpInferenceClient::new(&InferenceServiceConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            predict_timeout_ms: 1000,
            request_timeout_ms: 5000,
            jpeg_quality: 80,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_single_person() {
        let body = br#"{"predictions":[{"bbox":[10,10,50,50],"label":"person","score":0.91}]}"#;
        let detections = parse_predictions(body).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].corners(), Some((10, 10, 50, 50)));
        assert_eq!(detections[0].caption(), "person: 0.91");
    }

    #[test]
    fn test_parse_fills_defaults_and_keeps_malformed_boxes() {
        let body = br#"{"predictions":[{"bbox":[1,2,3]},{"bbox":[0,0,5,5],"label":"car"}]}"#;
        let detections = parse_predictions(body).unwrap();

        assert_eq!(detections[0].label, "unknown");
        assert_eq!(detections[0].corners(), None);
        assert_eq!(detections[1].caption(), "car: 0.00");
    }

    #[test]
    fn test_missing_predictions_key_is_empty() {
        assert!(parse_predictions(b"{}").unwrap().is_empty());
        assert!(matches!(
            parse_predictions(b"not json"),
            Err(InferenceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_detect_sends_multipart_image() {
        let router = Router::new().route(
            "/predict",
            post(|mut multipart: Multipart| async move {
                let field = multipart.next_field().await.unwrap().unwrap();
                assert_eq!(field.name(), Some("image"));
                assert_eq!(field.file_name(), Some("image.jpg"));
                let data = field.bytes().await.unwrap();
                Json(serde_json::json!({
                    "predictions": [{"bbox": [0, 0, data.len(), 4], "label": "person", "score": 0.5}]
                }))
            }),
        );
        let client = spawn_service(router).await;

        let detections = client
            .detect(vec![1, 2, 3], Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(detections, vec![Detection::new([0.0, 0.0, 3.0, 4.0], "person", 0.5)]);
    }

    #[tokio::test]
    async fn test_detect_times_out_within_budget() {
        let router = Router::new().route(
            "/predict",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(serde_json::json!({"predictions": []}))
            }),
        );
        let client = spawn_service(router).await;

        let started = std::time::Instant::now();
        let result = client.detect(vec![0], Duration::from_millis(100)).await;

        assert!(matches!(result, Err(InferenceError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_non_success_status_is_service_error() {
        let router = Router::new()
            .route(
                "/predict",
                post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "loading") }),
            )
            .route("/health", get(|| async { Json(serde_json::json!({"status": "ok"})) }));
        let client = spawn_service(router).await;

        let result = client.detect(vec![0], Duration::from_secs(1)).await;
        match result {
            Err(InferenceError::Status { status, body }) => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "loading");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let health = client.health().await.unwrap();
        assert_eq!(health["status"], "ok");
    }

    #[tokio::test]
    async fn test_setup_uses_get_or_post() {
        let router = Router::new().route(
            "/setup",
            get(|| async { Json(serde_json::json!({"mode": "read"})) })
                .post(|Json(body): Json<serde_json::Value>| async move {
                    Json(serde_json::json!({"mode": "write", "echo": body}))
                }),
        );
        let client = spawn_service(router).await;

        assert_eq!(client.setup(None).await.unwrap()["mode"], "read");

        let written = client
            .setup(Some(serde_json::json!({"threshold": 0.4})))
            .await
            .unwrap();
        assert_eq!(written["mode"], "write");
        assert_eq!(written["echo"]["threshold"], 0.4);
    }
}
