// src/object_detection.rs

use crate::types::{Detection, DetectorConfig};
use anyhow::{ensure, Context, Result};
use opencv::{
    core::{self, Mat, Scalar, Size},
    imgproc,
    prelude::*,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use std::path::Path;
use tracing::{debug, info};

const LETTERBOX_FILL: f64 = 114.0;

/// A detection model seen from the pipeline: one frame in, boxes out.
pub trait ObjectDetector: Send {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>>;
}

/// YOLOv8-style ONNX model: output `[1, 4 + classes, anchors]`, centre-format boxes.
pub struct YoloDetector {
    session: Session,
    config: DetectorConfig,
}

impl YoloDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        let path = Path::new(&config.model_path);
        ensure!(
            path.is_file(),
            "model weights not found at {}",
            config.model_path
        );

        info!("Loading YOLO model: {}", config.model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model {}", config.model_path))?;

        info!("✓ YOLO detector initialized ({})", config.model_path);
        Ok(Self { session, config })
    }

    fn infer(&mut self, input: Vec<f32>) -> Result<(Vec<i64>, Vec<f32>)> {
        let size = self.config.input_size;
        let shape = [1usize, 3, size, size];
        let input_value = Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;

        let outputs = self
            .session
            .run(ort::inputs![self.config.input_name.as_str() => input_value])?;
        let (output_shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        Ok((output_shape.to_vec(), data.to_vec()))
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(frame, &mut rgb, imgproc::COLOR_BGR2RGB)?;
        let letterbox = Letterbox::new(rgb.cols(), rgb.rows(), self.config.input_size as i32);
        let input = letterbox.prepare(&rgb)?;

        let (shape, output) = self.infer(input)?;
        ensure!(
            shape.len() == 3 && shape[1] > 4,
            "unexpected model output shape {:?}",
            shape
        );
        let num_classes = shape[1] as usize - 4;
        let num_anchors = shape[2] as usize;

        let detections = decode_predictions(
            &output,
            num_classes,
            num_anchors,
            &letterbox,
            &self.config,
        );
        let detections = nms(detections, self.config.nms_iou);

        debug!(
            "{} detections from {}",
            detections.len(),
            self.config.model_path
        );
        Ok(detections)
    }
}

/// Aspect-preserving resize into a square canvas, centred with grey padding.
/// Pads are whole pixels so `prepare` and `unmap` agree on the offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub src_width: i32,
    pub src_height: i32,
    pub target: i32,
    pub scale: f32,
    pub scaled_width: i32,
    pub scaled_height: i32,
    pub pad_left: i32,
    pub pad_top: i32,
}

impl Letterbox {
    pub fn new(src_width: i32, src_height: i32, target: i32) -> Self {
        let scale = (target as f32 / src_width as f32).min(target as f32 / src_height as f32);
        let scaled_width = ((src_width as f32 * scale).round() as i32).clamp(1, target);
        let scaled_height = ((src_height as f32 * scale).round() as i32).clamp(1, target);

        Self {
            src_width,
            src_height,
            target,
            scale,
            scaled_width,
            scaled_height,
            pad_left: (target - scaled_width) / 2,
            pad_top: (target - scaled_height) / 2,
        }
    }

    /// RGB `Mat` → normalized CHW floats in `[0, 1]`.
    pub fn prepare(&self, rgb: &Mat) -> Result<Vec<f32>> {
        let mut resized = Mat::default();
        imgproc::resize(
            rgb,
            &mut resized,
            Size::new(self.scaled_width, self.scaled_height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut padded = Mat::default();
        core::copy_make_border(
            &resized,
            &mut padded,
            self.pad_top,
            self.target - self.scaled_height - self.pad_top,
            self.pad_left,
            self.target - self.scaled_width - self.pad_left,
            core::BORDER_CONSTANT,
            Scalar::all(LETTERBOX_FILL),
        )?;

        let plane = (self.target * self.target) as usize;
        let mut input = vec![0.0f32; 3 * plane];
        for (i, pixel) in padded.data_bytes()?.chunks_exact(3).enumerate() {
            for (c, value) in pixel.iter().enumerate() {
                input[c * plane + i] = *value as f32 / 255.0;
            }
        }
        Ok(input)
    }

    /// Model-space box back to frame coordinates, clamped to the frame.
    pub fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
        let (pad_x, pad_y) = (self.pad_left as f32, self.pad_top as f32);
        let (w, h) = (self.src_width as f32, self.src_height as f32);
        [
            ((bbox[0] - pad_x) / self.scale).clamp(0.0, w),
            ((bbox[1] - pad_y) / self.scale).clamp(0.0, h),
            ((bbox[2] - pad_x) / self.scale).clamp(0.0, w),
            ((bbox[3] - pad_y) / self.scale).clamp(0.0, h),
        ]
    }
}

/// Best class per anchor, filtered by score floor and class allow-list.
fn decode_predictions(
    output: &[f32],
    num_classes: usize,
    num_anchors: usize,
    letterbox: &Letterbox,
    config: &DetectorConfig,
) -> Vec<Detection> {
    let mut detections = Vec::new();

    for i in 0..num_anchors {
        let cx = output[i];
        let cy = output[num_anchors + i];
        let w = output[num_anchors * 2 + i];
        let h = output[num_anchors * 3 + i];

        let mut best_score = 0.0f32;
        let mut best_class = 0;
        for c in 0..num_classes {
            let score = output[num_anchors * (4 + c) + i];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < config.min_score {
            continue;
        }
        if let Some(classes) = &config.classes {
            if !classes.contains(&best_class) {
                continue;
            }
        }

        let bbox = letterbox.unmap([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);
        detections.push(Detection {
            bbox,
            confidence: best_score,
            class_id: best_class,
            label: class_label(config, best_class),
        });
    }

    detections
}

fn class_label(config: &DetectorConfig, class_id: usize) -> String {
    config
        .labels
        .get(&class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", class_id))
}

/// Greedy per-class non-maximum suppression.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == det.class_id && iou(&kept.bbox, &det.bbox) >= iou_threshold
        });
        if !suppressed {
            keep.push(det);
        }
    }

    keep
}

/// Intersection over union of two `[x1, y1, x2, y2]` boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let overlap = area(&[a[0].max(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].min(b[3])]);
    let union = area(a) + area(b) - overlap;

    if union <= 0.0 {
        0.0
    } else {
        overlap / union
    }
}
