mod cameras;
mod health;
mod metrics;
mod proxy;
mod recordings;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/video_feed/{camera_id}", get(video_feed::video_feed))
        .route("/recordings", get(recordings::recordings_index))
        .route("/recordings/{camera_id}", get(recordings::recording_status))
        .route(
            "/recordings/{camera_id}/start",
            post(recordings::start_recording),
        )
        .route(
            "/recordings/{camera_id}/stop",
            post(recordings::stop_recording),
        )
        .route("/cameras", get(cameras::list_cameras))
        .route("/health", get(proxy::health))
        .route("/setup", get(proxy::setup).post(proxy::configure))
        .route("/predict", post(proxy::predict))
        .route("/webhook", post(proxy::webhook))
        .route("/image_exists", post(proxy::image_exists))
        .route("/healthz", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}

#[cfg(test)]
mod tests {
    use crate::{
        config::{
            CameraEntry, CaptureConfig, Config, InferenceServiceConfig, LogLevel, RecordingConfig,
            ServerConfig,
        },
        server::{HttpServer, SharedState},
        telemetry::Metrics,
    };
    use axum::{routing::get, Json, Router};
    use reqwest::StatusCode;
    use std::{path::Path, sync::Arc};
    use tokio_util::sync::CancellationToken;

    fn config(recordings: &Path, inference_port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            log_level: LogLevel::Debug,
            inference_service: InferenceServiceConfig {
                host: "127.0.0.1".into(),
                port: inference_port,
                predict_timeout_ms: 200,
                request_timeout_ms: 2000,
                jpeg_quality: 80,
            },
            capture: CaptureConfig::default(),
            recording: RecordingConfig {
                directory: recordings.to_path_buf(),
                ..RecordingConfig::default()
            },
            cameras: vec![CameraEntry {
                id: 1,
                name: "lobby".into(),
                url: "/nonexistent/camwatch/lobby.mp4".into(),
            }],
        }
    }

    /// A port nothing listens on.
    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn spawn_app(config: Config) -> (String, CancellationToken) {
        let shutdown = CancellationToken::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let state = SharedState::new(&config, metrics, shutdown.clone()).unwrap();
        let server = HttpServer::bind(state, "127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        server.run(shutdown.clone());
        (format!("http://{}", addr), shutdown)
    }

    #[tokio::test]
    async fn test_unknown_camera_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (base, shutdown) = spawn_app(config(dir.path(), closed_port().await)).await;
        let client = reqwest::Client::new();

        let feed = client.get(format!("{base}/video_feed/42")).send().await.unwrap();
        assert_eq!(feed.status(), StatusCode::NOT_FOUND);

        let start = client
            .post(format!("{base}/recordings/42/start"))
            .send()
            .await
            .unwrap();
        assert_eq!(start.status(), StatusCode::NOT_FOUND);

        let status = client.get(format!("{base}/recordings/42")).send().await.unwrap();
        assert_eq!(status.status(), StatusCode::NOT_FOUND);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unreachable_camera_is_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let (base, shutdown) = spawn_app(config(dir.path(), closed_port().await)).await;
        let client = reqwest::Client::new();

        let feed = client.get(format!("{base}/video_feed/1")).send().await.unwrap();
        assert_eq!(feed.status(), StatusCode::BAD_GATEWAY);

        let start = client
            .post(format!("{base}/recordings/1/start"))
            .send()
            .await
            .unwrap();
        assert_eq!(start.status(), StatusCode::BAD_GATEWAY);

        let status: serde_json::Value = client
            .get(format!("{base}/recordings/1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["recording"], false);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_stop_without_recording_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (base, shutdown) = spawn_app(config(dir.path(), closed_port().await)).await;
        let client = reqwest::Client::new();

        for _ in 0..2 {
            let stop = client
                .post(format!("{base}/recordings/1/stop"))
                .send()
                .await
                .unwrap();
            assert_eq!(stop.status(), StatusCode::CONFLICT);
        }

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_cameras_and_local_health() {
        let dir = tempfile::tempdir().unwrap();
        let (base, shutdown) = spawn_app(config(dir.path(), closed_port().await)).await;
        let client = reqwest::Client::new();

        let cameras: serde_json::Value = client
            .get(format!("{base}/cameras"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cameras[0]["id"], 1);
        assert_eq!(cameras[0]["name"], "lobby");

        let health: serde_json::Value = client
            .get(format!("{base}/healthz"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "Available");
        assert_eq!(health["cameras"], 1);

        let metrics = client.get(format!("{base}/metrics")).send().await.unwrap();
        assert_eq!(metrics.status(), StatusCode::OK);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_proxy_failures_are_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let (base, shutdown) = spawn_app(config(dir.path(), closed_port().await)).await;
        let client = reqwest::Client::new();

        let health = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(health.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = health.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("HTTP request failed"));

        let webhook = client
            .post(format!("{base}/webhook"))
            .json(&serde_json::json!({ "url": "http://example" }))
            .send()
            .await
            .unwrap();
        assert_eq!(webhook.status(), StatusCode::BAD_GATEWAY);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_proxy_passes_json_through() {
        let upstream = Router::new()
            .route("/health", get(|| async { Json(serde_json::json!({ "status": "ok" })) }))
            .route(
                "/setup",
                get(|| async { Json(serde_json::json!({ "configured": false })) }).post(
                    |Json(body): Json<serde_json::Value>| async move {
                        Json(serde_json::json!({ "configured": true, "echo": body }))
                    },
                ),
            )
            .route(
                "/image_exists",
                axum::routing::post(|Json(body): Json<serde_json::Value>| async move {
                    Json(serde_json::json!({ "exists": body["name"] == "a.jpg" }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, upstream).await.unwrap() });

        let dir = tempfile::tempdir().unwrap();
        let (base, shutdown) = spawn_app(config(dir.path(), port)).await;
        let client = reqwest::Client::new();

        let health: serde_json::Value = client
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let setup: serde_json::Value = client
            .post(format!("{base}/setup"))
            .json(&serde_json::json!({ "model": "people-v2" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(setup["configured"], true);
        assert_eq!(setup["echo"]["model"], "people-v2");

        let exists: serde_json::Value = client
            .post(format!("{base}/image_exists"))
            .json(&serde_json::json!({ "name": "a.jpg" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(exists["exists"], true);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_recording_files_are_listed_and_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lobby_20240101_000000.mp4"), b"0123456789").unwrap();
        let (base, shutdown) = spawn_app(config(dir.path(), closed_port().await)).await;
        let client = reqwest::Client::new();

        let listing: serde_json::Value = client
            .get(format!("{base}/recordings"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listing["files"][0]["name"], "lobby_20240101_000000.mp4");
        assert_eq!(listing["files"][0]["size_bytes"], 10);
        assert!(listing["active"].as_array().unwrap().is_empty());

        let partial = client
            .get(format!("{base}/recordings/files/lobby_20240101_000000.mp4"))
            .header(reqwest::header::RANGE, "bytes=2-5")
            .send()
            .await
            .unwrap();
        assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(&partial.bytes().await.unwrap()[..], b"2345");

        shutdown.cancel();
    }
}
