use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider, UpDownCounter},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    frames_streamed: Counter<u64>,
    inference_duration: Histogram<u64>,
    inference_failures: Counter<u64>,
    reconnects: Counter<u64>,
    active_viewers: UpDownCounter<i64>,
    recordings_started: Counter<u64>,
    _provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("camwatch");
        global::set_meter_provider(provider.clone());

        let frames_streamed = meter
            .u64_counter("frames_streamed_total")
            .with_description("Frames sent to live viewers")
            .build();

        let boundaries = generate_boundaries((15, 30, 60, 500, 1000));

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of inference calls in milliseconds")
            .build();

        let inference_failures = meter
            .u64_counter("inference_failures_total")
            .with_description("Inference calls that timed out or failed")
            .build();

        let reconnects = meter
            .u64_counter("camera_reconnects_total")
            .with_description("Camera stream reconnect attempts")
            .build();

        let active_viewers = meter
            .i64_up_down_counter("active_viewers")
            .with_description("Live stream sessions currently open")
            .build();

        let recordings_started = meter
            .u64_counter("recordings_started_total")
            .with_description("Recording sessions started")
            .build();

        Ok(Metrics {
            frames_streamed,
            inference_duration,
            inference_failures,
            reconnects,
            active_viewers,
            recordings_started,
            _provider: provider,
            registry,
        })
    }

    fn camera(camera_id: i64) -> [KeyValue; 1] {
        [KeyValue::new("camera", camera_id)]
    }

    pub fn record_frame(&self, camera_id: i64) {
        self.frames_streamed.add(1, &Self::camera(camera_id));
    }

    pub fn record_inference_duration(&self, duration_ms: u64, camera_id: i64) {
        self.inference_duration
            .record(duration_ms, &Self::camera(camera_id));
    }

    pub fn record_inference_failure(&self, camera_id: i64, kind: &'static str) {
        let attributes = [
            KeyValue::new("camera", camera_id),
            KeyValue::new("kind", kind),
        ];
        self.inference_failures.add(1, &attributes);
    }

    pub fn record_reconnects(&self, count: u64, camera_id: i64) {
        self.reconnects.add(count, &Self::camera(camera_id));
    }

    pub fn viewer_opened(&self, camera_id: i64) {
        self.active_viewers.add(1, &Self::camera(camera_id));
    }

    pub fn viewer_closed(&self, camera_id: i64) {
        self.active_viewers.add(-1, &Self::camera(camera_id));
    }

    pub fn record_recording_started(&self, camera_id: i64) {
        self.recordings_started.add(1, &Self::camera(camera_id));
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
