use crate::{
    camera::CameraRef,
    config::{CaptureConfig, RecordingConfig},
    source::{CameraError, CaptureOpener, FrameSource, ReconnectPolicy},
    telemetry::Metrics,
};
use chrono::{DateTime, Local};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::VideoWriter,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::Notify, task::JoinHandle};

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Camera {0} is already recording")]
    AlreadyRecording(i64),
    #[error("Camera {0} is not recording")]
    NotRecording(i64),
    #[error("Failed to connect to camera {camera_id}: {source}")]
    Connect {
        camera_id: i64,
        #[source]
        source: CameraError,
    },
    #[error("Failed to write recording: {0}")]
    DiskWrite(String),
    #[error("Invalid fourcc code {0:?}, expected four characters")]
    InvalidFourcc(String),
    #[error("Recording task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingStatus {
    pub camera_id: i64,
    pub running: bool,
    pub file_name: String,
    pub started_at: DateTime<Local>,
}

#[derive(Debug)]
struct RecordingEntry {
    session_id: u64,
    running: bool,
    file: PathBuf,
    started_at: DateTime<Local>,
}

impl RecordingEntry {
    fn status(&self, camera_id: i64) -> RecordingStatus {
        RecordingStatus {
            camera_id,
            running: self.running,
            file_name: file_name(&self.file),
            started_at: self.started_at,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Which cameras are recording. Every operation is one critical section, and
/// entries are tagged with a session id so a finishing task can never observe
/// or release a newer session's slot. A stopped entry stays until its task has
/// finalized the file.
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    entries: Mutex<HashMap<i64, RecordingEntry>>,
    next_session: AtomicU64,
    emptied: Notify,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(
        &self,
        camera_id: i64,
        file: PathBuf,
        started_at: DateTime<Local>,
    ) -> Result<u64, RecordingError> {
        let mut entries = self.entries.lock();
        // A stopping session still owns its file until the task releases it.
        if entries.contains_key(&camera_id) {
            return Err(RecordingError::AlreadyRecording(camera_id));
        }

        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        entries.insert(
            camera_id,
            RecordingEntry {
                session_id,
                running: true,
                file,
                started_at,
            },
        );
        Ok(session_id)
    }

    /// The background task's per-frame check: still the running owner?
    fn keep_running(&self, camera_id: i64, session_id: u64) -> bool {
        self.entries
            .lock()
            .get(&camera_id)
            .is_some_and(|entry| entry.session_id == session_id && entry.running)
    }

    fn stop(&self, camera_id: i64) -> Result<(), RecordingError> {
        match self.entries.lock().get_mut(&camera_id) {
            Some(entry) if entry.running => {
                entry.running = false;
                Ok(())
            }
            _ => Err(RecordingError::NotRecording(camera_id)),
        }
    }

    fn release(&self, camera_id: i64, session_id: u64) {
        let mut entries = self.entries.lock();
        if entries
            .get(&camera_id)
            .is_some_and(|entry| entry.session_id == session_id)
        {
            entries.remove(&camera_id);
        }
        if entries.is_empty() {
            self.emptied.notify_waiters();
        }
    }

    pub fn is_active(&self, camera_id: i64) -> bool {
        self.entries
            .lock()
            .get(&camera_id)
            .is_some_and(|entry| entry.running)
    }

    pub fn status(&self, camera_id: i64) -> Option<RecordingStatus> {
        self.entries
            .lock()
            .get(&camera_id)
            .map(|entry| entry.status(camera_id))
    }

    pub fn active(&self) -> Vec<RecordingStatus> {
        let mut active: Vec<RecordingStatus> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.running)
            .map(|(camera_id, entry)| entry.status(*camera_id))
            .collect();
        active.sort_by_key(|status| status.camera_id);
        active
    }

    fn stop_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let mut stopped = 0;
        for entry in entries.values_mut().filter(|entry| entry.running) {
            entry.running = false;
            stopped += 1;
        }
        stopped
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    async fn wait_empty(&self) {
        loop {
            let emptied = self.emptied.notified();
            tokio::pin!(emptied);
            emptied.as_mut().enable();
            if self.is_empty() {
                return;
            }
            emptied.await;
        }
    }
}

/// Destination for recorded frames. Created and used on the recording thread.
pub trait FrameSink {
    fn write(&mut self, frame: &Mat) -> Result<(), RecordingError>;
    fn finish(&mut self) -> Result<(), RecordingError>;
}

pub trait SinkFactory: Send + Sync + 'static {
    type Sink: FrameSink;

    fn create(&self, path: &Path, size: Size, fps: f64) -> Result<Self::Sink, RecordingError>;
}

#[derive(Debug, Clone)]
pub struct VideoFileSinkFactory {
    fourcc: [char; 4],
}

impl VideoFileSinkFactory {
    pub fn new(fourcc: &str) -> Result<Self, RecordingError> {
        let chars: Vec<char> = fourcc.chars().collect();
        let fourcc: [char; 4] = chars
            .try_into()
            .map_err(|_| RecordingError::InvalidFourcc(fourcc.to_string()))?;
        Ok(Self { fourcc })
    }
}

impl SinkFactory for VideoFileSinkFactory {
    type Sink = VideoFileSink;

    fn create(&self, path: &Path, size: Size, fps: f64) -> Result<VideoFileSink, RecordingError> {
        let disk_error = |e: opencv::Error| RecordingError::DiskWrite(e.to_string());
        let [c1, c2, c3, c4] = self.fourcc;
        let fourcc = VideoWriter::fourcc(c1, c2, c3, c4).map_err(disk_error)?;
        let path_str = path
            .to_str()
            .ok_or_else(|| RecordingError::DiskWrite(format!("non UTF-8 path {:?}", path)))?;

        let writer = VideoWriter::new(path_str, fourcc, fps, size, true).map_err(disk_error)?;
        if !writer.is_opened().map_err(disk_error)? {
            return Err(RecordingError::DiskWrite(format!(
                "VideoWriter failed to open {}",
                path.display()
            )));
        }

        tracing::debug!(path = %path.display(), width = size.width, height = size.height, "Opened video writer");
        Ok(VideoFileSink { writer })
    }
}

pub struct VideoFileSink {
    writer: VideoWriter,
}

impl FrameSink for VideoFileSink {
    fn write(&mut self, frame: &Mat) -> Result<(), RecordingError> {
        self.writer
            .write(frame)
            .map_err(|e| RecordingError::DiskWrite(e.to_string()))
    }

    fn finish(&mut self) -> Result<(), RecordingError> {
        self.writer
            .release()
            .map_err(|e| RecordingError::DiskWrite(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub directory: PathBuf,
    pub fps: f64,
    pub extension: String,
    pub reconnect: ReconnectPolicy,
}

impl RecordingSettings {
    pub fn from_config(recording: &RecordingConfig, capture: &CaptureConfig) -> Self {
        Self {
            directory: recording.directory.clone(),
            fps: recording.fps,
            extension: recording.extension.clone(),
            reconnect: ReconnectPolicy::from(capture),
        }
    }

    /// `{camera_name}_{YYYYMMDD_HHMMSS}.{ext}` inside the recordings directory.
    pub fn file_path(&self, camera_name: &str, started_at: DateTime<Local>) -> PathBuf {
        self.directory.join(format!(
            "{}_{}.{}",
            sanitize(camera_name),
            started_at.format("%Y%m%d_%H%M%S"),
            self.extension
        ))
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "camera".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stopped,
    ReadFailed,
    DiskWriteFailed,
}

#[derive(Debug)]
pub struct RecordingOutcome {
    pub frames_written: u64,
    pub reason: StopReason,
}

pub struct RecordingTicket {
    pub file: PathBuf,
    pub task: JoinHandle<RecordingOutcome>,
}

pub struct RecordingManager<O: CaptureOpener, S: SinkFactory> {
    registry: Arc<RecordingRegistry>,
    opener: Arc<O>,
    sinks: Arc<S>,
    settings: RecordingSettings,
    metrics: Option<Arc<Metrics>>,
}

impl<O: CaptureOpener, S: SinkFactory> RecordingManager<O, S> {
    pub fn new(opener: Arc<O>, sinks: Arc<S>, settings: RecordingSettings) -> Self {
        Self {
            registry: Arc::new(RecordingRegistry::new()),
            opener,
            sinks,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &RecordingRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &Path {
        &self.settings.directory
    }

    pub async fn start(&self, camera: &CameraRef) -> Result<RecordingTicket, RecordingError> {
        tokio::fs::create_dir_all(&self.settings.directory).await?;

        let started_at = Local::now();
        let file = self.settings.file_path(&camera.name, started_at);
        let session_id = self.registry.claim(camera.id, file.clone(), started_at)?;

        let opener = self.opener.clone();
        let url = camera.url.clone();
        let policy = self.settings.reconnect.clone();
        let opened = tokio::task::spawn_blocking(move || FrameSource::open(opener, &url, policy)).await;

        let source = match opened {
            Ok(Ok(source)) => source,
            Ok(Err(source)) => {
                self.registry.release(camera.id, session_id);
                return Err(RecordingError::Connect {
                    camera_id: camera.id,
                    source,
                });
            }
            Err(e) => {
                self.registry.release(camera.id, session_id);
                return Err(RecordingError::Join(e));
            }
        };

        let job = RecordingJob {
            camera_id: camera.id,
            session_id,
            file: file.clone(),
            fps: self.settings.fps,
            registry: self.registry.clone(),
            sinks: self.sinks.clone(),
        };
        let task = tokio::task::spawn_blocking(move || job.run(source));

        if let Some(metrics) = &self.metrics {
            metrics.record_recording_started(camera.id);
        }
        tracing::info!(camera_id = camera.id, file = %file.display(), "Recording started");

        Ok(RecordingTicket { file, task })
    }

    pub fn stop(&self, camera_id: i64) -> Result<(), RecordingError> {
        self.registry.stop(camera_id)?;
        tracing::info!(camera_id, "Recording stop requested");
        Ok(())
    }

    pub fn status(&self, camera_id: i64) -> Option<RecordingStatus> {
        self.registry.status(camera_id)
    }

    pub fn active(&self) -> Vec<RecordingStatus> {
        self.registry.active()
    }

    pub fn stop_all(&self) -> usize {
        self.registry.stop_all()
    }

    /// Waits for every background task to release its slot.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.registry.wait_empty())
            .await
            .is_ok()
    }
}

struct RecordingJob<S: SinkFactory> {
    camera_id: i64,
    session_id: u64,
    file: PathBuf,
    fps: f64,
    registry: Arc<RecordingRegistry>,
    sinks: Arc<S>,
}

impl<S: SinkFactory> RecordingJob<S> {
    fn run<O: CaptureOpener>(self, mut source: FrameSource<O>) -> RecordingOutcome {
        let mut sink: Option<S::Sink> = None;
        let mut frames_written = 0;

        let reason = loop {
            if !self.registry.keep_running(self.camera_id, self.session_id) {
                break StopReason::Stopped;
            }

            // A truncated recording beats a corrupted one: any read failure ends it.
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(camera_id = self.camera_id, "Recording read failed: {}", e);
                    break StopReason::ReadFailed;
                }
            };

            if let Err(e) = self.write(&mut sink, &frame) {
                tracing::error!(camera_id = self.camera_id, "Recording write failed: {}", e);
                break StopReason::DiskWriteFailed;
            }
            frames_written += 1;
        };

        source.close();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.finish() {
                tracing::warn!(camera_id = self.camera_id, "Failed to finalize recording: {}", e);
            }
        }
        self.registry.release(self.camera_id, self.session_id);

        tracing::info!(
            camera_id = self.camera_id,
            file = %self.file.display(),
            frames_written,
            reason = ?reason,
            "Recording finished"
        );

        RecordingOutcome {
            frames_written,
            reason,
        }
    }

    /// The sink is opened on the first frame so it matches the native resolution.
    fn write(&self, sink: &mut Option<S::Sink>, frame: &Mat) -> Result<(), RecordingError> {
        if sink.is_none() {
            let size = frame
                .size()
                .map_err(|e| RecordingError::DiskWrite(e.to_string()))?;
            *sink = Some(self.sinks.create(&self.file, size, self.fps)?);
        }
        match sink.as_mut() {
            Some(sink) => sink.write(frame),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingFile {
    pub name: String,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Local>>,
}

/// Recording files in `directory`, newest first. A missing directory is empty.
pub async fn list_recordings(directory: &Path) -> std::io::Result<Vec<RecordingFile>> {
    let mut dir = match tokio::fs::read_dir(directory).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        files.push(RecordingFile {
            name: entry.file_name().to_string_lossy().into_owned(),
            size_bytes: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Local>::from),
        });
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}
