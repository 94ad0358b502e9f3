use crate::config::CaptureConfig;
use opencv::{core::Mat, prelude::*, videoio};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    ConnectFailed(opencv::Error),
    #[error("Camera stream {0} could not be opened")]
    NotOpened(String),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Camera returned an empty frame")]
    EmptyFrame,
    #[error("Camera is disconnected")]
    Disconnected,
    #[error("Giving up after {0} reconnect attempts")]
    ReconnectLimitReached(u32),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CameraError {
    fn from(err: opencv::Error) -> Self {
        CameraError::OpenCvError(err)
    }
}

impl CameraError {
    /// Whether the caller should simply read again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CameraError::ReconnectLimitReached(_))
    }
}

/// An open handle on a camera stream.
pub trait Capture: Send + 'static {
    fn read_frame(&mut self) -> Result<Mat, CameraError>;
    fn release(&mut self) -> Result<(), CameraError>;
}

pub trait CaptureOpener: Send + Sync + 'static {
    type Capture: Capture;

    fn open(&self, url: &str) -> Result<Self::Capture, CameraError>;
}

/// Forces FFmpeg to pull RTSP over TCP. Must run before the first capture is opened.
pub fn force_tcp_transport() {
    const KEY: &str = "OPENCV_FFMPEG_CAPTURE_OPTIONS";
    if std::env::var_os(KEY).is_none() {
        std::env::set_var(KEY, "rtsp_transport;tcp");
    }
}

#[derive(Debug, Clone)]
pub struct OpenCvOpener {
    buffer_size: u32,
}

impl OpenCvOpener {
    pub fn new(capture_config: &CaptureConfig) -> Self {
        Self {
            buffer_size: capture_config.buffer_size,
        }
    }
}

impl CaptureOpener for OpenCvOpener {
    type Capture = OpenCvCapture;

    fn open(&self, url: &str) -> Result<OpenCvCapture, CameraError> {
        // A bare integer selects a local device, as `VideoCapture::new(0, ..)` does.
        let mut capture = match url.parse::<i32>() {
            Ok(index) => videoio::VideoCapture::new(index, videoio::CAP_ANY),
            Err(_) => videoio::VideoCapture::from_file(url, videoio::CAP_FFMPEG),
        }
        .map_err(CameraError::ConnectFailed)?;

        if !capture.is_opened().map_err(CameraError::ConnectFailed)? {
            return Err(CameraError::NotOpened(url.to_string()));
        }

        if !capture.set(videoio::CAP_PROP_BUFFERSIZE, self.buffer_size as f64)? {
            tracing::debug!("Backend ignored CAP_PROP_BUFFERSIZE for {}", url);
        }

        Ok(OpenCvCapture { capture })
    }
}

pub struct OpenCvCapture {
    capture: videoio::VideoCapture,
}

impl Capture for OpenCvCapture {
    fn read_frame(&mut self) -> Result<Mat, CameraError> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(CameraError::ReadFrameFailed)?;
        if !grabbed || frame.empty() {
            return Err(CameraError::EmptyFrame);
        }
        Ok(frame)
    }

    fn release(&mut self) -> Result<(), CameraError> {
        self.capture.release()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub threshold: u32,
    pub max_reconnects: Option<u32>,
    pub delay: Duration,
}

impl From<&CaptureConfig> for ReconnectPolicy {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            threshold: config.reconnect_threshold.max(1),
            max_reconnects: config.max_reconnects,
            delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::from(&CaptureConfig::default())
    }
}

/// A single session's connection to a camera. Reads block, so callers run them
/// on a blocking thread.
pub struct FrameSource<O: CaptureOpener> {
    opener: Arc<O>,
    url: String,
    capture: Option<O::Capture>,
    policy: ReconnectPolicy,
    consecutive_errors: u32,
    reconnects: u32,
    /// Reconnects since the last good frame; the ceiling applies to this.
    reconnect_streak: u32,
}

impl<O: CaptureOpener> FrameSource<O> {
    pub fn open(opener: Arc<O>, url: &str, policy: ReconnectPolicy) -> Result<Self, CameraError> {
        let capture = opener.open(url)?;
        tracing::info!(url = %url, "Camera stream opened");
        Ok(Self {
            opener,
            url: url.to_string(),
            capture: Some(capture),
            policy,
            consecutive_errors: 0,
            reconnects: 0,
            reconnect_streak: 0,
        })
    }

    /// Reads the next frame. Failures are counted; once the counter reaches the
    /// policy threshold the stream is reopened and the counter reset, whatever
    /// the outcome of the reopen.
    pub fn read_frame(&mut self) -> Result<Mat, CameraError> {
        let result = match self.capture.as_mut() {
            Some(capture) => capture.read_frame(),
            None => Err(CameraError::Disconnected),
        };

        match result {
            Ok(frame) => {
                self.consecutive_errors = 0;
                self.reconnect_streak = 0;
                Ok(frame)
            }
            Err(err) => {
                self.consecutive_errors += 1;
                tracing::warn!(
                    url = %self.url,
                    consecutive_errors = self.consecutive_errors,
                    "Failed to read frame: {}",
                    err
                );
                if self.consecutive_errors >= self.policy.threshold {
                    self.reconnect()?;
                }
                Err(err)
            }
        }
    }

    fn reconnect(&mut self) -> Result<(), CameraError> {
        if let Some(max) = self.policy.max_reconnects {
            if self.reconnect_streak >= max {
                tracing::error!(url = %self.url, "Reconnect limit of {} reached", max);
                return Err(CameraError::ReconnectLimitReached(self.reconnect_streak));
            }
        }

        tracing::info!(url = %self.url, attempt = self.reconnects + 1, "Attempting to reconnect to camera stream");
        self.close();

        if !self.policy.delay.is_zero() {
            let jitter = rand::random::<f32>() * 0.2 + 0.9;
            std::thread::sleep(self.policy.delay.mul_f32(jitter));
        }

        self.reconnects += 1;
        self.reconnect_streak += 1;
        match self.opener.open(&self.url) {
            Ok(capture) => {
                tracing::info!(url = %self.url, "Reconnected to camera stream");
                self.capture = Some(capture);
            }
            Err(e) => {
                tracing::error!(url = %self.url, "Reconnect failed: {}", e);
            }
        }
        self.consecutive_errors = 0;

        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::warn!(url = %self.url, "Failed to release capture: {}", e);
            }
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Every reconnect attempted over the session's lifetime.
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub fn is_connected(&self) -> bool {
        self.capture.is_some()
    }
}

impl<O: CaptureOpener> Drop for FrameSource<O> {
    fn drop(&mut self) {
        self.close();
    }
}
