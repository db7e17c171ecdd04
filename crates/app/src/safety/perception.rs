//! Perception worker: frames in, safety observations out.
//!
//! Owns the camera, the detectors, the calibration model and the workspace
//! zone. Everything it learns is published through the perception writer
//! handle; nothing else writes those cells.

use std::{
    io, thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::RecvTimeoutError;
use safety_core::{
    CalibrationDefaults, CalibrationModel, CoordinationBus, EventKind, PerceptionWriter,
    SafetyArbiter, SafetyState, WorkspaceZone, assess_hands, bus::INITIAL_TOOL_PIXEL, select_tool,
};
use sensor_ingest::{CameraDriver, Detection, Detector, Frame, Pixel, spawn_camera_reader};
use tracing::{debug, error, info, warn};

use crate::safety::{config::CalibrationMode, telemetry};

/// Frames discarded while the sensor settles, before `camera_ready` is set.
pub(crate) const WARMUP_FRAMES: u64 = 30;
const FRAME_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) struct Detectors {
    pub(crate) tool: Box<dyn Detector>,
    pub(crate) hands: Box<dyn Detector>,
    /// `None` when the workspace zone is disabled.
    pub(crate) markers: Option<Box<dyn Detector>>,
}

pub(crate) struct PerceptionWorker {
    pub(crate) bus: CoordinationBus,
    pub(crate) writer: PerceptionWriter,
    pub(crate) camera: Box<dyn CameraDriver>,
    pub(crate) detectors: Detectors,
    pub(crate) arbiter: SafetyArbiter,
    pub(crate) calibration_mode: CalibrationMode,
    pub(crate) calibration_defaults: CalibrationDefaults,
    pub(crate) marker_id: i32,
    pub(crate) verbose: bool,
}

pub(crate) fn spawn_perception_worker(
    worker: PerceptionWorker,
) -> io::Result<thread::JoinHandle<Result<()>>> {
    telemetry::spawn_thread("perception", move || worker.run())
}

impl PerceptionWorker {
    fn run(self) -> Result<()> {
        let PerceptionWorker {
            bus,
            writer,
            camera,
            detectors,
            arbiter,
            calibration_mode,
            calibration_defaults,
            marker_id,
            verbose,
        } = self;

        let model = calibrate(camera.as_ref(), calibration_mode, calibration_defaults, &bus);
        writer.publish_calibration(&model.summary());
        writer.publish_zone(0, false);
        let zone = detectors
            .markers
            .is_some()
            .then(|| WorkspaceZone::new(marker_id));

        let camera_name = camera.name().to_string();
        let stop = bus.stop_handle();
        let (frames, reader) = spawn_camera_reader(camera, move || stop.is_requested())
            .context("Failed to start camera reader")?;
        info!("perception started on {camera_name}");

        let mut pipeline = FramePipeline {
            bus: bus.clone(),
            writer,
            detectors,
            arbiter,
            verbose,
            model,
            zone,
            tool: INITIAL_TOOL_PIXEL,
            last_state: SafetyState::Safe,
        };
        let mut warm_frames: u64 = 0;
        let mut stalled = false;

        let outcome = loop {
            if bus.stop().is_requested() {
                break Ok(());
            }
            let item =
                tracing::info_span!("capture.recv").in_scope(|| frames.recv_timeout(FRAME_TIMEOUT));
            match item {
                Ok(Ok(frame)) => {
                    stalled = false;
                    if warm_frames < WARMUP_FRAMES {
                        warm_frames += 1;
                        if warm_frames == WARMUP_FRAMES && bus.camera_ready().set() {
                            info!("camera warmed up after {WARMUP_FRAMES} frames");
                            bus.events().record(EventKind::Info, "Camera ready");
                        }
                        continue;
                    }
                    pipeline.process_frame(&frame);
                }
                Ok(Err(err)) => {
                    metrics::counter!(telemetry::FRAME_ERRORS).increment(1);
                    warn!("frame acquisition failed: {err}");
                    bus.events()
                        .record(EventKind::Warning, format!("Frame skipped: {err}"));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !stalled {
                        stalled = true;
                        warn!("no frame within {FRAME_TIMEOUT:?}");
                        bus.events().record(
                            EventKind::Warning,
                            format!("No camera frame within {} ms", FRAME_TIMEOUT.as_millis()),
                        );
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    error!("camera reader exited unexpectedly");
                    bus.events().record(EventKind::Error, "Camera reader exited");
                    break Err(anyhow!("camera reader exited unexpectedly"));
                }
            }
        };

        drop(frames);
        if reader.join().is_err() {
            error!("camera reader panicked");
        }
        info!("perception stopped");
        outcome
    }
}

fn calibrate(
    camera: &dyn CameraDriver,
    mode: CalibrationMode,
    defaults: CalibrationDefaults,
    bus: &CoordinationBus,
) -> CalibrationModel {
    let mut model = CalibrationModel::new(defaults);
    match mode {
        CalibrationMode::Driver => {
            if !model.calibrate_from_driver(camera.intrinsics()) {
                bus.events().record(
                    EventKind::Warning,
                    "Driver intrinsics unavailable, using field-of-view calibration",
                );
            }
        }
        CalibrationMode::Synthesized => {
            model.set_defaults(defaults.width, defaults.height, defaults.fov_deg);
        }
        CalibrationMode::PixelRatio => {
            warn!("running uncalibrated; distances use the pixel-ratio estimate");
            bus.events()
                .record(EventKind::Warning, "Uncalibrated, pixel-ratio distances");
        }
    }
    if let Some(matrix) = model.camera_matrix() {
        debug!("camera matrix {matrix:?}");
    }
    model
}

/// Per-frame processing state owned by the perception thread.
struct FramePipeline {
    bus: CoordinationBus,
    writer: PerceptionWriter,
    detectors: Detectors,
    arbiter: SafetyArbiter,
    verbose: bool,
    model: CalibrationModel,
    zone: Option<WorkspaceZone>,
    /// Last detected tool pixel, kept across missed detections.
    tool: Pixel,
    last_state: SafetyState,
}

impl FramePipeline {
    fn process_frame(&mut self, frame: &Frame) {
        let started = Instant::now();
        let _span = tracing::info_span!(
            "perception.frame",
            frame = frame.sequence,
            timestamp = frame.timestamp_ms
        )
        .entered();

        let tools = detect_or_log(self.detectors.tool.as_mut(), frame, &self.bus);
        let tool = select_tool(&tools);
        self.writer.publish_tool(tool);
        if let Some(tool) = tool {
            self.tool = tool;
        }

        if let (Some(detector), Some(zone)) = (self.detectors.markers.as_mut(), self.zone.as_mut())
        {
            let markers = detect_or_log(detector.as_mut(), frame, &self.bus);
            let was_defined = zone.is_defined();
            let defined = zone.update(&markers);
            self.writer
                .publish_zone(zone.detected_markers().len(), defined);
            if defined && !was_defined {
                info!("workspace zone defined: {:?}", zone.corners());
                self.bus
                    .events()
                    .record(EventKind::Info, "Workspace zone defined");
            }
        }

        let hands = detect_or_log(self.detectors.hands.as_mut(), frame, &self.bus);
        let obs = assess_hands(
            frame,
            self.tool,
            &hands,
            &self.model,
            self.zone.as_mut(),
            &self.arbiter,
        );
        self.writer.publish_observation(&obs);
        self.writer.mark_frame(frame.timestamp_ms);

        let safety = self.arbiter.state(&obs);
        if safety != self.last_state {
            debug!(
                "safety {} -> {} (distance {:.3} m)",
                self.last_state.as_str(),
                safety.as_str(),
                obs.distance_m
            );
            self.last_state = safety;
        }
        if obs.hand_detected {
            metrics::gauge!(telemetry::HAND_DISTANCE).set(obs.distance_m);
        }
        if self.verbose {
            debug!(
                tool_detected = tool.is_some(),
                hand = obs.hand_detected,
                distance_m = obs.distance_m,
                in_zone = obs.hand_in_zone,
                "frame processed"
            );
        }
        metrics::counter!(telemetry::PERCEPTION_FRAMES).increment(1);
        metrics::histogram!(telemetry::PERCEPTION_FRAME_SECONDS)
            .record(started.elapsed().as_secs_f64());
    }
}

/// Run one detector; a failure is logged and treated as "nothing found".
fn detect_or_log(detector: &mut dyn Detector, frame: &Frame, bus: &CoordinationBus) -> Vec<Detection> {
    match detector.detect(frame) {
        Ok(detections) => detections,
        Err(err) => {
            warn!("{} failed on frame {}: {err}", detector.name(), frame.sequence);
            bus.events()
                .record(EventKind::Warning, format!("{} failed: {err}", detector.name()));
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use safety_core::StopReason;
    use sensor_ingest::sim::{SimCamera, SimHandTracker, SimMarkerDetector, SimToolDetector};

    use super::*;

    fn worker(bus: &CoordinationBus, mode: CalibrationMode) -> PerceptionWorker {
        PerceptionWorker {
            bus: bus.clone(),
            writer: bus.take_perception_writer().unwrap(),
            camera: Box::new(SimCamera::new(500, true)),
            detectors: Detectors {
                tool: Box::new(SimToolDetector::new(0)),
                hands: Box::new(SimHandTracker),
                markers: Some(Box::new(SimMarkerDetector::new(0, 7))),
            },
            arbiter: SafetyArbiter::default(),
            calibration_mode: mode,
            calibration_defaults: CalibrationDefaults::default(),
            marker_id: 0,
            verbose: false,
        }
    }

    #[test]
    fn warms_up_then_publishes_observations() {
        let bus = CoordinationBus::new();
        let handle = spawn_perception_worker(worker(&bus, CalibrationMode::Driver)).unwrap();

        bus.camera_ready()
            .wait_timeout(Duration::from_secs(5))
            .unwrap();
        let mut waited = Duration::ZERO;
        while !bus.region().zone_defined() && waited < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
        bus.stop().request(StopReason::Signal);
        handle.join().unwrap().unwrap();

        let calibration = bus.region().calibration();
        assert!(calibration.is_calibrated);
        assert_eq!(calibration.fx, 900.0);
        assert!(bus.region().zone_defined());
        assert!(bus.region().tool().1);
    }

    #[test]
    fn pixel_ratio_mode_leaves_model_uncalibrated() {
        let bus = CoordinationBus::new();
        let handle = spawn_perception_worker(worker(&bus, CalibrationMode::PixelRatio)).unwrap();
        bus.camera_ready()
            .wait_timeout(Duration::from_secs(5))
            .unwrap();
        bus.stop().request(StopReason::Signal);
        handle.join().unwrap().unwrap();
        assert!(!bus.region().calibration().is_calibrated);
    }
}
