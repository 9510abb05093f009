use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub preprocessing: PreprocessingConfig,
    pub lanes: LaneConfig,
    pub detectors: DetectorsConfig,
    pub pipeline: PipelineConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub blur_kernel: i32,
    pub canny_low: f64,
    pub canny_high: f64,
    pub roi: RoiConfig,
}

/// Trapezoid corners as fractions of frame width/height.
/// The bottom edge always sits on the last row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    pub bottom_left_x: f32,
    pub bottom_right_x: f32,
    pub top_left_x: f32,
    pub top_right_x: f32,
    pub top_y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub hough: HoughConfig,
    pub min_abs_slope: f64,
    pub max_abs_slope: f64,
    pub right_min_mean_slope: f64,
    pub extrapolate_top_ratio: f64,
    pub line_thickness: i32,
    /// BGR
    pub color: [u8; 3],
    pub frame_weight: f64,
    pub overlay_weight: f64,
    pub brightness_offset: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughConfig {
    pub rho: f64,
    pub theta_degrees: f64,
    pub threshold: i32,
    pub min_line_length: f64,
    pub max_line_gap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorsConfig {
    #[serde(
        default = "DetectorConfig::vehicle",
        deserialize_with = "crate::config::vehicle_role"
    )]
    pub vehicle: DetectorConfig,
    #[serde(
        default = "DetectorConfig::sign",
        deserialize_with = "crate::config::sign_role"
    )]
    pub sign: DetectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub enabled: bool,
    pub model_path: String,
    pub input_size: usize,
    pub input_name: String,
    /// Display threshold, compared with a strict `>`.
    pub confidence_threshold: f32,
    /// Score floor applied while decoding raw model output.
    pub min_score: f32,
    pub nms_iou: f32,
    pub num_threads: usize,
    /// Allow-list of class ids; `None` keeps every class.
    pub classes: Option<Vec<usize>>,
    pub labels: BTreeMap<usize, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub parallel_detectors: bool,
    pub progress_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub output_dir: String,
    pub output_suffix: String,
    pub fallback_fps: f64,
    pub write_report: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// One of the two detection models whose boxes get stamped on each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionRole {
    Vehicle,
    Sign,
}

impl DetectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionRole::Vehicle => "vehicle",
            DetectionRole::Sign => "sign",
        }
    }
}

impl fmt::Display for DetectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in frame coordinates
    pub confidence: f32,
    pub class_id: usize,
    pub label: String,
}

/// Raw probabilistic-Hough output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

pub const SLOPE_EPSILON: f64 = 1e-6;

impl LineSegment {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn slope(&self) -> f64 {
        (self.y2 - self.y1) / (self.x2 - self.x1 + SLOPE_EPSILON)
    }
}

/// A fitted lane boundary, already extrapolated to the rendering span.
/// `bottom` lies on the last frame row, `top` at the extrapolation ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneLine {
    pub bottom: (f64, f64),
    pub top: (f64, f64),
    pub slope: f64,
    pub intercept: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaneFit {
    Lane(LaneLine),
    NoLane,
}

impl LaneFit {
    pub fn line(&self) -> Option<&LaneLine> {
        match self {
            LaneFit::Lane(line) => Some(line),
            LaneFit::NoLane => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, LaneFit::Lane(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneModel {
    pub left: LaneFit,
    pub right: LaneFit,
}

impl LaneModel {
    pub fn empty() -> Self {
        Self {
            left: LaneFit::NoLane,
            right: LaneFit::NoLane,
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &LaneLine> {
        self.left.line().into_iter().chain(self.right.line())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VideoProperties {
    pub fps: f64,
    pub width: i32,
    pub height: i32,
    pub frame_count: Option<u64>,
}
