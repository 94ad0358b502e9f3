use crate::{
    annotate,
    camera::CameraRef,
    config::{CaptureConfig, InferenceServiceConfig},
    encoder,
    inference::{Detection, Detector, InferenceError},
    sampler::FrameSampler,
    source::{CameraError, CaptureOpener, FrameSource, ReconnectPolicy},
    telemetry::Metrics,
};
use bytes::Bytes;
use futures::{stream, Stream};
use opencv::core::Mat;
use std::{
    convert::Infallible,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum LiveStreamError {
    #[error("Failed to connect to camera {camera_id}: {source}")]
    Connect {
        camera_id: i64,
        #[source]
        source: CameraError,
    },
    #[error("Capture task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Session cancelled before the camera connected")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub sample_every: u64,
    pub inference_budget: Duration,
    pub jpeg_quality: i32,
    pub read_retry_delay: Duration,
    pub reconnect: ReconnectPolicy,
}

impl StreamSettings {
    pub fn from_config(capture: &CaptureConfig, inference: &InferenceServiceConfig) -> Self {
        Self {
            sample_every: capture.sample_every,
            inference_budget: inference.predict_budget(),
            jpeg_quality: inference.jpeg_quality,
            read_retry_delay: capture.read_retry_delay(),
            reconnect: ReconnectPolicy::from(capture),
        }
    }
}

/// Per-session bookkeeping. Only the owning session touches it.
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    pub consecutive_read_errors: u32,
    pub frames_seen: u64,
    pub last_detections: Vec<Detection>,
    pub running: bool,
}

/// One viewer's pipeline: read, sample, infer, annotate, encode.
pub struct LiveStreamSession<O: CaptureOpener, D: Detector> {
    camera: CameraRef,
    source: Option<FrameSource<O>>,
    detector: Arc<D>,
    sampler: FrameSampler,
    settings: StreamSettings,
    state: SessionState,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
    reported_reconnects: u32,
}

impl<O: CaptureOpener, D: Detector> LiveStreamSession<O, D> {
    pub async fn connect(
        opener: Arc<O>,
        camera: CameraRef,
        detector: Arc<D>,
        settings: StreamSettings,
        cancel: CancellationToken,
    ) -> Result<Self, LiveStreamError> {
        let url = camera.url.clone();
        let policy = settings.reconnect.clone();
        let open = tokio::task::spawn_blocking(move || FrameSource::open(opener, &url, policy));

        let source = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LiveStreamError::Cancelled),
            opened = open => opened?.map_err(|source| LiveStreamError::Connect {
                camera_id: camera.id,
                source,
            })?,
        };

        tracing::info!(camera_id = camera.id, "Live stream session started");

        Ok(Self {
            sampler: FrameSampler::new(settings.sample_every),
            camera,
            source: Some(source),
            detector,
            settings,
            state: SessionState {
                running: true,
                ..SessionState::default()
            },
            cancel,
            metrics: None,
            reported_reconnects: 0,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        metrics.viewer_opened(self.camera.id);
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Produces the next multipart chunk, or `None` once the session is over.
    /// Read and inference failures are absorbed here and never end the stream.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            if self.cancel.is_cancelled() || !self.state.running {
                self.terminate();
                return None;
            }

            let frame = match self.read_frame().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) if err.is_retryable() => {
                    self.pause().await;
                    continue;
                }
                Some(Err(err)) => {
                    tracing::error!(camera_id = self.camera.id, "Closing live stream: {}", err);
                    self.terminate();
                    return None;
                }
                None => {
                    self.terminate();
                    return None;
                }
            };

            self.state.frames_seen += 1;
            if self.sampler.should_process(self.state.frames_seen) {
                match encoder::encode(&frame, self.settings.jpeg_quality) {
                    Ok(jpeg) => self.refresh_detections(jpeg).await,
                    Err(e) => {
                        tracing::warn!(camera_id = self.camera.id, "Skipping inference: {}", e)
                    }
                }
                if self.cancel.is_cancelled() {
                    continue;
                }
            }

            let mut frame = frame;
            annotate::render(&mut frame, &self.state.last_detections);

            match encoder::encode(&frame, self.settings.jpeg_quality) {
                Ok(jpeg) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_frame(self.camera.id);
                    }
                    return Some(encoder::wrap(&jpeg));
                }
                Err(e) => {
                    tracing::error!(camera_id = self.camera.id, "Error in frame processing: {}", e);
                }
            }
        }
    }

    /// Reads on a blocking thread. `None` means the session was cancelled or
    /// the source is gone.
    async fn read_frame(&mut self) -> Option<Result<Mat, CameraError>> {
        let mut source = self.source.take()?;
        let read = tokio::task::spawn_blocking(move || {
            let result = source.read_frame();
            (source, result)
        });

        let cancel = self.cancel.clone();
        let joined = tokio::select! {
            biased;
            // The blocking read finishes on its own and drops the source.
            _ = cancel.cancelled() => return None,
            joined = read => joined,
        };

        match joined {
            Ok((source, result)) => {
                self.state.consecutive_read_errors = source.consecutive_errors();
                self.report_reconnects(source.reconnects());
                self.source = Some(source);
                Some(result)
            }
            Err(e) => {
                tracing::error!(camera_id = self.camera.id, "Capture task failed: {}", e);
                None
            }
        }
    }

    /// Replaces the detection set on success; on any failure the previous set stays.
    async fn refresh_detections(&mut self, jpeg: Vec<u8>) {
        let started = Instant::now();
        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = self.detector.detect(jpeg, self.settings.inference_budget) => result,
        };

        match result {
            Ok(detections) => {
                tracing::debug!(
                    camera_id = self.camera.id,
                    frame = self.state.frames_seen,
                    "Received {} detections",
                    detections.len()
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_inference_duration(
                        started.elapsed().as_millis() as u64,
                        self.camera.id,
                    );
                }
                self.state.last_detections = detections;
            }
            Err(err) => {
                let kind = match err {
                    InferenceError::Timeout(_) => {
                        tracing::warn!(camera_id = self.camera.id, "AI server prediction timeout");
                        "timeout"
                    }
                    ref other => {
                        tracing::warn!(camera_id = self.camera.id, "Inference failed: {}", other);
                        "service"
                    }
                };
                if let Some(metrics) = &self.metrics {
                    metrics.record_inference_failure(self.camera.id, kind);
                }
            }
        }
    }

    async fn pause(&mut self) {
        let delay = self.settings.read_retry_delay;
        if delay.is_zero() {
            return;
        }
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {},
            _ = tokio::time::sleep(delay) => {},
        }
    }

    fn report_reconnects(&mut self, total: u32) {
        if total > self.reported_reconnects {
            if let Some(metrics) = &self.metrics {
                metrics.record_reconnects((total - self.reported_reconnects) as u64, self.camera.id);
            }
            self.reported_reconnects = total;
        }
    }

    fn terminate(&mut self) {
        if !self.state.running {
            return;
        }
        self.state.running = false;
        self.source.take();
        if let Some(metrics) = &self.metrics {
            metrics.viewer_closed(self.camera.id);
        }
        tracing::info!(
            camera_id = self.camera.id,
            frames = self.state.frames_seen,
            "Live stream session terminated"
        );
    }

    /// The response body: one chunk per emitted frame, ending with the session.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        stream::unfold(self, |mut session| async move {
            let chunk = session.next_chunk().await?;
            Some((Ok(chunk), session))
        })
    }
}

impl<O: CaptureOpener, D: Detector> Drop for LiveStreamSession<O, D> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.terminate();
    }
}
