use crate::types::{
    Config, DetectorConfig, DetectorsConfig, HoughConfig, LaneConfig, LoggingConfig,
    PipelineConfig, PreprocessingConfig, RoiConfig, VideoConfig,
};
use anyhow::{ensure, Context, Result};
use serde::{de::Error as _, Deserialize, Deserializer};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let pre = &self.preprocessing;
        ensure!(
            pre.blur_kernel > 0 && pre.blur_kernel % 2 == 1,
            "preprocessing.blur_kernel must be a positive odd number, got {}",
            pre.blur_kernel
        );
        ensure!(
            pre.canny_low <= pre.canny_high,
            "preprocessing.canny_low ({}) exceeds canny_high ({})",
            pre.canny_low,
            pre.canny_high
        );

        let roi = &pre.roi;
        ensure!(
            roi.bottom_left_x < roi.bottom_right_x && roi.top_left_x < roi.top_right_x,
            "preprocessing.roi left corners must lie left of the right corners"
        );
        ensure!(
            (0.0..1.0).contains(&roi.top_y),
            "preprocessing.roi.top_y must be in [0, 1), got {}",
            roi.top_y
        );

        let lanes = &self.lanes;
        ensure!(
            lanes.min_abs_slope < lanes.max_abs_slope,
            "lanes.min_abs_slope must be below lanes.max_abs_slope"
        );
        ensure!(
            (0.0..1.0).contains(&lanes.extrapolate_top_ratio),
            "lanes.extrapolate_top_ratio must be in [0, 1), got {}",
            lanes.extrapolate_top_ratio
        );
        ensure!(lanes.line_thickness > 0, "lanes.line_thickness must be positive");

        for (name, detector) in [
            ("vehicle", &self.detectors.vehicle),
            ("sign", &self.detectors.sign),
        ] {
            ensure!(
                (0.0..=1.0).contains(&detector.confidence_threshold),
                "detectors.{}.confidence_threshold must be in [0, 1], got {}",
                name,
                detector.confidence_threshold
            );
            ensure!(
                (0.0..=1.0).contains(&detector.min_score),
                "detectors.{}.min_score must be in [0, 1], got {}",
                name,
                detector.min_score
            );
            ensure!(
                detector.input_size > 0,
                "detectors.{}.input_size must be positive",
                name
            );
        }

        ensure!(
            self.pipeline.queue_capacity > 0,
            "pipeline.queue_capacity must be at least 1"
        );
        ensure!(
            self.video.fallback_fps > 0.0,
            "video.fallback_fps must be positive"
        );

        Ok(())
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            blur_kernel: 5,
            canny_low: 50.0,
            canny_high: 150.0,
            roi: RoiConfig::default(),
        }
    }
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            bottom_left_x: 0.10,
            bottom_right_x: 0.90,
            top_left_x: 0.35,
            top_right_x: 0.65,
            top_y: 0.55,
        }
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            hough: HoughConfig::default(),
            min_abs_slope: 0.3,
            max_abs_slope: 2.0,
            right_min_mean_slope: 0.4,
            extrapolate_top_ratio: 0.6,
            line_thickness: 5,
            color: [0, 255, 0],
            frame_weight: 0.8,
            overlay_weight: 1.0,
            brightness_offset: 1.0,
        }
    }
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            rho: 1.0,
            theta_degrees: 1.0,
            threshold: 50,
            min_line_length: 40.0,
            max_line_gap: 100.0,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: String::new(),
            input_size: 640,
            input_name: "images".to_string(),
            confidence_threshold: 0.4,
            min_score: 0.25,
            nms_iou: 0.45,
            num_threads: 4,
            classes: None,
            labels: BTreeMap::new(),
        }
    }
}

impl DetectorConfig {
    /// COCO vehicle classes only.
    pub fn vehicle() -> Self {
        let labels: BTreeMap<usize, String> = [
            (2, "car"),
            (3, "motorcycle"),
            (5, "bus"),
            (7, "truck"),
        ]
        .into_iter()
        .map(|(id, name)| (id, name.to_string()))
        .collect();

        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            classes: Some(labels.keys().copied().collect()),
            labels,
            ..Self::default()
        }
    }

    /// Every class the sign model emits.
    pub fn sign() -> Self {
        Self {
            model_path: "models/traffic_signs.onnx".to_string(),
            ..Self::default()
        }
    }
}

impl DetectorsConfig {
    pub fn with_standard_models() -> Self {
        Self {
            vehicle: DetectorConfig::vehicle(),
            sign: DetectorConfig::sign(),
        }
    }
}

/// Keys present in the YAML replace the role's defaults; the rest are kept.
fn overlay_role<'de, D>(deserializer: D, base: DetectorConfig) -> Result<DetectorConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = Value::deserialize(deserializer)?;
    let mut merged = serde_yaml::to_value(base).map_err(D::Error::custom)?;

    match (&mut merged, overrides) {
        (_, Value::Null) => {}
        (Value::Mapping(target), Value::Mapping(patch)) => target.extend(patch),
        (_, other) => {
            return Err(D::Error::custom(format!(
                "detector section must be a mapping, got {:?}",
                other
            )))
        }
    }

    serde_yaml::from_value(merged).map_err(D::Error::custom)
}

pub(crate) fn vehicle_role<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DetectorConfig, D::Error> {
    overlay_role(deserializer, DetectorConfig::vehicle())
}

pub(crate) fn sign_role<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DetectorConfig, D::Error> {
    overlay_role(deserializer, DetectorConfig::sign())
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self::with_standard_models()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            parallel_detectors: false,
            progress_interval: 50,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            output_dir: "output".to_string(),
            output_suffix: "_annotated".to_string(),
            fallback_fps: 30.0,
            write_report: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "dashcam_annotator=info,ort=warn".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.preprocessing.blur_kernel, 5);
        assert_eq!(config.lanes.hough.threshold, 50);
        assert_eq!(config.detectors.vehicle.confidence_threshold, 0.4);
        assert_eq!(config.detectors.sign.confidence_threshold, 0.4);
        assert_eq!(config.video.fallback_fps, 30.0);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
lanes:
  right_min_mean_slope: 0.5
detectors:
  vehicle:
    model_path: models/cars.onnx
    labels:
      2: car
pipeline:
  queue_capacity: 8
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.lanes.right_min_mean_slope, 0.5);
        assert_eq!(config.lanes.min_abs_slope, 0.3);
        assert_eq!(config.detectors.vehicle.model_path, "models/cars.onnx");
        assert_eq!(config.detectors.vehicle.labels.get(&2).unwrap(), "car");
        assert_eq!(config.detectors.vehicle.classes, Some(vec![2, 3, 5, 7]));
        assert_eq!(config.detectors.sign.input_size, 640);
        assert_eq!(config.pipeline.queue_capacity, 8);
        assert_eq!(config.preprocessing.roi.top_y, 0.55);
    }

    #[test]
    fn test_partial_detector_section_keeps_role_defaults() {
        let yaml = r#"
detectors:
  vehicle:
    confidence_threshold: 0.5
  sign:
    num_threads: 2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let vehicle = &config.detectors.vehicle;
        assert_eq!(vehicle.confidence_threshold, 0.5);
        assert_eq!(vehicle.model_path, "models/yolov8n.onnx");
        assert_eq!(vehicle.classes, Some(vec![2, 3, 5, 7]));
        assert_eq!(vehicle.labels.get(&7).unwrap(), "truck");

        let sign = &config.detectors.sign;
        assert_eq!(sign.num_threads, 2);
        assert_eq!(sign.model_path, "models/traffic_signs.onnx");
        assert!(sign.classes.is_none());
        assert_eq!(sign.confidence_threshold, 0.4);
    }

    #[test]
    fn test_detector_section_must_be_mapping() {
        let yaml = "detectors:\n  vehicle: 3\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "preprocessing:\n  canny_low: 40\n  canny_high: 120").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.preprocessing.canny_low, 40.0);
        assert_eq!(config.preprocessing.canny_high, 120.0);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut config = Config::default();
        config.preprocessing.blur_kernel = 4;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detectors.sign.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.preprocessing.canny_low = 200.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_standard_models_filter_vehicle_classes() {
        let detectors = DetectorsConfig::with_standard_models();
        assert_eq!(detectors.vehicle.classes, Some(vec![2, 3, 5, 7]));
        assert!(detectors.sign.classes.is_none());
    }
}
