use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub inference_service: InferenceServiceConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub cameras: Vec<CameraEntry>,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceServiceConfig {
    pub host: String,
    pub port: u16,
    /// Budget for a single pipeline prediction call.
    #[serde(default = "default_predict_timeout_ms")]
    pub predict_timeout_ms: u64,
    /// Timeout for proxied control calls (health, setup, webhook...).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
}

fn default_predict_timeout_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_jpeg_quality() -> i32 {
    80
}

impl InferenceServiceConfig {
    pub fn get_address(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn predict_budget(&self) -> Duration {
        Duration::from_millis(self.predict_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CaptureConfig {
    #[serde(default = "default_sample_every")]
    pub sample_every: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
    #[serde(default = "default_reconnect_threshold")]
    pub reconnect_threshold: u32,
    /// `None` keeps reconnecting forever.
    #[serde(default)]
    pub max_reconnects: Option<u32>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_read_retry_delay_ms")]
    pub read_retry_delay_ms: u64,
}

fn default_sample_every() -> u64 {
    3
}

fn default_buffer_size() -> u32 {
    3
}

fn default_reconnect_threshold() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    500
}

fn default_read_retry_delay_ms() -> u64 {
    20
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_every: default_sample_every(),
            buffer_size: default_buffer_size(),
            reconnect_threshold: default_reconnect_threshold(),
            max_reconnects: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            read_retry_delay_ms: default_read_retry_delay_ms(),
        }
    }
}

impl CaptureConfig {
    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct RecordingConfig {
    #[serde(default = "default_recordings_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_recording_fps")]
    pub fps: f64,
    #[serde(default = "default_fourcc")]
    pub fourcc: String,
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_recording_fps() -> f64 {
    20.0
}

fn default_fourcc() -> String {
    "mp4v".into()
}

fn default_extension() -> String {
    "mp4".into()
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            directory: default_recordings_dir(),
            fps: default_recording_fps(),
            fourcc: default_fourcc(),
            extension: default_extension(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraEntry {
    pub id: i64,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("CW")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}
