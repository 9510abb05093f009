// src/pipeline/analyzer.rs
//
// Single-frame contract: lanes from the edge map, both detectors on the
// original frame, then both overlays on top of the lane blend.

use super::frame_context::FrameContext;
use super::metrics::PipelineMetrics;
use crate::error::{PipelineError, PipelineResult};
use crate::lane_detection::LaneEstimator;
use crate::object_detection::ObjectDetector;
use crate::overlay::{draw_detections, role_color};
use crate::preprocessing::FramePreprocessor;
use crate::types::{Config, Detection, DetectionRole};
use opencv::{core::Mat, prelude::*};
use std::sync::atomic::AtomicU64;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// A detector bound to its role and display threshold.
pub struct RoleDetector {
    role: DetectionRole,
    detector: Box<dyn ObjectDetector>,
    threshold: f32,
}

impl RoleDetector {
    pub fn new(role: DetectionRole, detector: Box<dyn ObjectDetector>, threshold: f32) -> Self {
        Self {
            role,
            detector,
            threshold,
        }
    }

    fn run(&mut self, index: u64, frame: &Mat) -> PipelineResult<Vec<Detection>> {
        self.detector
            .detect(frame)
            .map_err(|e| PipelineError::model_invocation(self.role, index, &e))
    }
}

pub struct FrameAnalyzer {
    preprocessor: FramePreprocessor,
    lanes: LaneEstimator,
    vehicle: Option<RoleDetector>,
    sign: Option<RoleDetector>,
    parallel_detectors: bool,
}

impl FrameAnalyzer {
    /// A `None` detector means the role is disabled and contributes no boxes.
    pub fn new(
        config: &Config,
        vehicle: Option<Box<dyn ObjectDetector>>,
        sign: Option<Box<dyn ObjectDetector>>,
    ) -> Self {
        let detectors = &config.detectors;
        Self {
            preprocessor: FramePreprocessor::new(config.preprocessing.clone()),
            lanes: LaneEstimator::new(config.lanes.clone()),
            vehicle: vehicle.map(|d| {
                RoleDetector::new(
                    DetectionRole::Vehicle,
                    d,
                    detectors.vehicle.confidence_threshold,
                )
            }),
            sign: sign.map(|d| {
                RoleDetector::new(DetectionRole::Sign, d, detectors.sign.confidence_threshold)
            }),
            parallel_detectors: config.pipeline.parallel_detectors,
        }
    }

    pub fn analyze(
        &mut self,
        index: u64,
        frame: Mat,
        metrics: &PipelineMetrics,
    ) -> PipelineResult<FrameContext> {
        let lane_start = Instant::now();
        let (lane_model, blended) = self
            .preprocessor
            .edge_map(&frame)
            .and_then(|edges| self.lanes.estimate_lanes(&frame, &edges))
            .map_err(|e| PipelineError::frame_processing(index, &e))?;
        metrics.set_timing(&metrics.lane_time_us, lane_start.elapsed());
        if lane_model.left.is_present() {
            metrics.inc(&metrics.frames_with_left_lane);
        }
        if lane_model.right.is_present() {
            metrics.inc(&metrics.frames_with_right_lane);
        }

        let (vehicle_detections, sign_detections) = self.detect(index, frame, metrics)?;

        let mut annotated = blended;
        for (detector, detections) in [
            (&self.vehicle, &vehicle_detections),
            (&self.sign, &sign_detections),
        ] {
            let Some(detector) = detector else { continue };
            let (stamped, drawn) = draw_detections(
                &annotated,
                detections,
                detector.threshold,
                role_color(detector.role),
            )
            .map_err(|e| PipelineError::frame_processing(index, &e))?;
            annotated = stamped;

            let counter = match detector.role {
                DetectionRole::Vehicle => &metrics.vehicle_boxes,
                DetectionRole::Sign => &metrics.sign_boxes,
            };
            metrics.add(counter, drawn as u64);
            metrics.add(&metrics.below_threshold, (detections.len() - drawn) as u64);
        }

        debug!(
            "Frame {}: left={} right={} vehicles={} signs={}",
            index,
            lane_model.left.is_present(),
            lane_model.right.is_present(),
            vehicle_detections.len(),
            sign_detections.len()
        );

        Ok(FrameContext {
            index,
            lane_model,
            vehicle_detections,
            sign_detections,
            annotated,
        })
    }

    fn detect(
        &mut self,
        index: u64,
        frame: Mat,
        metrics: &PipelineMetrics,
    ) -> PipelineResult<(Vec<Detection>, Vec<Detection>)> {
        let parallel = self.parallel_detectors;
        match (&mut self.vehicle, &mut self.sign) {
            (Some(vehicle), Some(sign)) if parallel => {
                let sign_frame = frame
                    .try_clone()
                    .map_err(|e| PipelineError::frame_processing(index, &e.into()))?;

                thread::scope(|scope| -> PipelineResult<_> {
                    let sign_handle = scope.spawn(move || timed(sign, index, &sign_frame));
                    let vehicle_result = timed(vehicle, index, &frame);
                    let sign_result = sign_handle
                        .join()
                        .map_err(|_| PipelineError::StagePanicked("sign detector"))?;

                    let (vehicles, vehicle_time) = vehicle_result?;
                    let (signs, sign_time) = sign_result?;
                    metrics.set_timing(&metrics.vehicle_time_us, vehicle_time);
                    metrics.set_timing(&metrics.sign_time_us, sign_time);
                    Ok((vehicles, signs))
                })
            }
            (vehicle, sign) => {
                let run = |detector: &mut Option<RoleDetector>,
                           counter: &AtomicU64|
                 -> PipelineResult<Vec<Detection>> {
                    let Some(detector) = detector.as_mut() else {
                        return Ok(Vec::new());
                    };
                    let (detections, elapsed) = timed(detector, index, &frame)?;
                    metrics.set_timing(counter, elapsed);
                    Ok(detections)
                };
                let vehicles = run(vehicle, &metrics.vehicle_time_us)?;
                let signs = run(sign, &metrics.sign_time_us)?;
                Ok((vehicles, signs))
            }
        }
    }
}

fn timed(
    detector: &mut RoleDetector,
    index: u64,
    frame: &Mat,
) -> PipelineResult<(Vec<Detection>, Duration)> {
    let start = Instant::now();
    let detections = detector.run(index, frame)?;
    Ok((detections, start.elapsed()))
}
