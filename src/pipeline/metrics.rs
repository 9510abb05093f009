// src/pipeline/metrics.rs
//
// Per-video counters shared by the decode, analyze and encode stages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_decoded: Arc<AtomicU64>,
    pub frames_written: Arc<AtomicU64>,
    pub frames_with_left_lane: Arc<AtomicU64>,
    pub frames_with_right_lane: Arc<AtomicU64>,
    pub vehicle_boxes: Arc<AtomicU64>,
    pub sign_boxes: Arc<AtomicU64>,
    pub below_threshold: Arc<AtomicU64>,
    pub lane_time_us: Arc<AtomicU64>,
    pub vehicle_time_us: Arc<AtomicU64>,
    pub sign_time_us: Arc<AtomicU64>,
    pub encode_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_decoded: Arc::new(AtomicU64::new(0)),
            frames_written: Arc::new(AtomicU64::new(0)),
            frames_with_left_lane: Arc::new(AtomicU64::new(0)),
            frames_with_right_lane: Arc::new(AtomicU64::new(0)),
            vehicle_boxes: Arc::new(AtomicU64::new(0)),
            sign_boxes: Arc::new(AtomicU64::new(0)),
            below_threshold: Arc::new(AtomicU64::new(0)),
            lane_time_us: Arc::new(AtomicU64::new(0)),
            vehicle_time_us: Arc::new(AtomicU64::new(0)),
            sign_time_us: Arc::new(AtomicU64::new(0)),
            encode_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, elapsed: Duration) {
        counter.store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_written.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            fps: self.fps(),
            frames_with_left_lane: self.frames_with_left_lane.load(Ordering::Relaxed),
            frames_with_right_lane: self.frames_with_right_lane.load(Ordering::Relaxed),
            vehicle_boxes: self.vehicle_boxes.load(Ordering::Relaxed),
            sign_boxes: self.sign_boxes.load(Ordering::Relaxed),
            below_threshold: self.below_threshold.load(Ordering::Relaxed),
            last_lane_us: self.lane_time_us.load(Ordering::Relaxed),
            last_vehicle_us: self.vehicle_time_us.load(Ordering::Relaxed),
            last_sign_us: self.sign_time_us.load(Ordering::Relaxed),
            last_encode_us: self.encode_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_decoded: u64,
    pub frames_written: u64,
    pub fps: f64,
    pub frames_with_left_lane: u64,
    pub frames_with_right_lane: u64,
    pub vehicle_boxes: u64,
    pub sign_boxes: u64,
    pub below_threshold: u64,
    pub last_lane_us: u64,
    pub last_vehicle_us: u64,
    pub last_sign_us: u64,
    pub last_encode_us: u64,
    pub elapsed_secs: f64,
}
