use crate::{
    camera::{CameraRegistry, InMemoryCameraRegistry},
    config::Config,
    inference::HttpInferenceClient,
    live::StreamSettings,
    recording::{RecordingManager, RecordingSettings, VideoFileSinkFactory},
    routes::api_routes,
    source::OpenCvOpener,
    telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

pub type Recorder = RecordingManager<OpenCvOpener, VideoFileSinkFactory>;

#[derive(Clone)]
pub struct SharedState {
    pub cameras: Arc<dyn CameraRegistry>,
    pub opener: Arc<OpenCvOpener>,
    pub detector: Arc<HttpInferenceClient>,
    pub recordings: Arc<Recorder>,
    pub stream_settings: StreamSettings,
    pub metrics: Arc<Metrics>,
    /// Parent of every live session's token.
    pub shutdown: CancellationToken,
}

impl SharedState {
    pub fn new(
        config: &Config,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let cameras = Arc::new(InMemoryCameraRegistry::new(config.cameras.clone()));
        let opener = Arc::new(OpenCvOpener::new(&config.capture));
        let detector = Arc::new(HttpInferenceClient::new(&config.inference_service)?);

        let sinks = Arc::new(VideoFileSinkFactory::new(&config.recording.fourcc)?);
        let recordings = RecordingManager::new(
            opener.clone(),
            sinks,
            RecordingSettings::from_config(&config.recording, &config.capture),
        )
        .with_metrics(metrics.clone());

        tracing::info!(
            cameras = config.cameras.len(),
            inference = %detector.base_url(),
            "Application state ready"
        );

        Ok(Self {
            cameras,
            opener,
            detector,
            recordings: Arc::new(recordings),
            stream_settings: StreamSettings::from_config(
                &config.capture,
                &config.inference_service,
            ),
            metrics,
            shutdown,
        })
    }
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &Config) -> anyhow::Result<Self> {
        Self::bind(state, &config.server.get_address()).await
    }

    pub async fn bind(state: SharedState, addr: &str) -> anyhow::Result<Self> {
        let metrics_layer = HttpMetricsLayerBuilder::new().build();
        let recording_files = ServeDir::new(state.recordings.directory());

        let router = Router::new()
            .merge(api_routes())
            .nest_service("/recordings/files", recording_files)
            .with_state(state)
            .layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(self, shutdown: CancellationToken) -> JoinHandle<anyhow::Result<()>> {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("Starting app on {}", addr),
            Err(e) => tracing::warn!("Starting app on unknown address: {}", e),
        }

        let listener = self.listener;
        let router = self.router;
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await?;
            Ok(())
        })
    }
}
