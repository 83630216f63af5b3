//! Capture → encode → transmit → interpret → present, once per cycle.
//!
//! A cycle owns at most one frame and hands it back to the camera as soon as
//! the bytes are encoded, before anything touches the network. Every failure
//! is mapped to a [`CycleOutcome`]; nothing propagates out of the loop.

use std::{
    sync::{Arc, atomic::AtomicBool},
    time::{Duration, Instant},
};

use frame_ingest::Camera;
use tracing::{debug, info, warn};

use crate::{
    connectivity::LinkStatus,
    display::Display,
    encoding::encode_frame,
    response::{decode, preview_line},
    status::{RecognitionResult, RecognitionStatus},
    tasks,
    transport::{AnalyzeRequest, Transport},
};

pub const DEFAULT_DEVICE_ID: &str = "esp32_glasses_001";

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub endpoint: String,
    pub device_id: String,
    pub capture_interval: Duration,
    pub request_timeout: Duration,
    /// Pause before re-checking the link while offline.
    pub offline_backoff: Duration,
    /// Pause after the camera failed to deliver a frame.
    pub capture_backoff: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000/api/analyze".to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            capture_interval: Duration::from_millis(3_000),
            request_timeout: Duration::from_millis(10_000),
            offline_backoff: Duration::from_millis(1_000),
            capture_backoff: Duration::from_millis(1_000),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Offline,
    CaptureFailed,
    EncodeFailed,
    TransportFailed,
    Rejected { status: u16 },
    EmptyResponse,
    Malformed,
    Presented { result: RecognitionResult },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Offline => "offline",
            CycleOutcome::CaptureFailed => "capture_failed",
            CycleOutcome::EncodeFailed => "encode_failed",
            CycleOutcome::TransportFailed => "transport_failed",
            CycleOutcome::Rejected { .. } => "rejected",
            CycleOutcome::EmptyResponse => "empty_response",
            CycleOutcome::Malformed => "malformed",
            CycleOutcome::Presented { .. } => "presented",
        }
    }

    fn pause(&self, settings: &PipelineSettings) -> Duration {
        match self {
            CycleOutcome::Offline => settings.offline_backoff,
            CycleOutcome::CaptureFailed => settings.capture_backoff,
            _ => settings.capture_interval,
        }
    }
}

pub struct CapturePipeline<C> {
    camera: C,
    link: Arc<dyn LinkStatus>,
    transport: Arc<dyn Transport>,
    display: Arc<dyn Display>,
    status: Arc<RecognitionStatus>,
    settings: PipelineSettings,
    cycles: u64,
    frames_out: usize,
}

impl<C: Camera> CapturePipeline<C> {
    pub fn new(
        camera: C,
        link: Arc<dyn LinkStatus>,
        transport: Arc<dyn Transport>,
        display: Arc<dyn Display>,
        status: Arc<RecognitionStatus>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            camera,
            link,
            transport,
            display,
            status,
            settings,
            cycles: 0,
            frames_out: 0,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    /// Run cycles until `shutdown` is set, pausing between them.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(
            "Capture pipeline started (interval {:?}, endpoint {})",
            self.settings.capture_interval, self.settings.endpoint
        );
        loop {
            let outcome = self.run_cycle();
            if !tasks::sleep_unless(shutdown, outcome.pause(&self.settings)) {
                break;
            }
        }
        info!("Capture pipeline stopped after {} cycles", self.cycles);
    }

    /// Execute one cycle and record its outcome.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let _span = tracing::info_span!("pipeline.cycle", cycle = self.cycles).entered();
        let started = Instant::now();

        let outcome = self.cycle();

        metrics::counter!("glasses_pipeline_cycles_total", "outcome" => outcome.label())
            .increment(1);
        if !matches!(outcome, CycleOutcome::Offline) {
            metrics::histogram!("glasses_pipeline_cycle_seconds")
                .record(started.elapsed().as_secs_f64());
        }
        debug!(outcome = outcome.label(), "cycle finished");
        outcome
    }

    fn cycle(&mut self) -> CycleOutcome {
        if !self.link.is_connected() {
            debug!("Link down; skipping capture");
            return CycleOutcome::Offline;
        }

        let frame = match self.camera.acquire_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Camera capture failed: {err}");
                return CycleOutcome::CaptureFailed;
            }
        };
        self.frames_out += 1;
        metrics::gauge!("glasses_frames_outstanding").set(self.frames_out as f64);
        debug!(
            "Captured {}x{} {:?} frame ({} bytes)",
            frame.width,
            frame.height,
            frame.format,
            frame.len()
        );
        self.display.pulse();

        let encoded = encode_frame(&frame.data);
        let timestamp = frame.timestamp_ms;
        self.camera.release_frame(frame);
        self.frames_out -= 1;
        metrics::gauge!("glasses_frames_outstanding").set(self.frames_out as f64);

        let image = match encoded {
            Ok(image) => image,
            Err(err) => {
                warn!("Frame encoding failed: {err}");
                return CycleOutcome::EncodeFailed;
            }
        };

        // The link may have dropped while capturing.
        if !self.link.is_connected() {
            debug!("Link dropped before transmit; discarding frame");
            return CycleOutcome::Offline;
        }

        let request = AnalyzeRequest {
            image: &image,
            timestamp,
            device_id: &self.settings.device_id,
        };
        let response = match request.to_json().and_then(|body| {
            self.transport
                .post(&self.settings.endpoint, &body, self.settings.request_timeout)
        }) {
            Ok(response) => response,
            Err(err) => {
                warn!("Analysis request failed: {err}");
                return CycleOutcome::TransportFailed;
            }
        };

        if !response.is_ok() {
            warn!("Analysis service answered with status {}", response.status);
            return CycleOutcome::Rejected {
                status: response.status,
            };
        }
        if response.body.is_empty() {
            warn!("Analysis service returned an empty body");
            return CycleOutcome::EmptyResponse;
        }

        self.display.show_text(&preview_line(&response.body));
        let analysis = match decode(&response.body) {
            Ok(analysis) => analysis,
            Err(err) => {
                warn!("Could not parse analysis response: {err}");
                return CycleOutcome::Malformed;
            }
        };

        let interpretation = analysis.interpret();
        for line in &interpretation.lines {
            self.display.show_text(line);
        }
        self.status.set(interpretation.result.clone());
        CycleOutcome::Presented {
            result: interpretation.result,
        }
    }
}
