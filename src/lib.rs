mod routes;

pub mod annotate;
pub mod app;
pub mod camera;
pub mod config;
pub mod encoder;
pub mod inference;
pub mod live;
pub mod recording;
pub mod sampler;
pub mod server;
pub mod source;
pub mod telemetry;

pub use app::start_app;
