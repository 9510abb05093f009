// src/lane_detection.rs

use crate::types::{LaneConfig, LaneFit, LaneLine, LaneModel, LineSegment};
use anyhow::Result;
use opencv::{
    core::{self, Mat, Point, Scalar, Vec4i, Vector},
    imgproc,
    prelude::*,
};
use tracing::debug;

/// Below this the fit is treated as degenerate (vertical point cloud or flat line).
const DEGENERATE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaneCandidates {
    pub left: Vec<LineSegment>,
    pub right: Vec<LineSegment>,
}

pub struct LaneEstimator {
    config: LaneConfig,
}

impl LaneEstimator {
    pub fn new(config: LaneConfig) -> Self {
        Self { config }
    }

    /// Segments found by the probabilistic Hough transform on a masked edge map.
    pub fn extract_segments(&self, edges: &Mat) -> Result<Vec<LineSegment>> {
        let hough = &self.config.hough;
        let mut lines = Vector::<Vec4i>::new();
        imgproc::hough_lines_p(
            edges,
            &mut lines,
            hough.rho,
            hough.theta_degrees.to_radians(),
            hough.threshold,
            hough.min_line_length,
            hough.max_line_gap,
        )?;

        Ok(lines
            .iter()
            .map(|l| LineSegment::new(l[0] as f64, l[1] as f64, l[2] as f64, l[3] as f64))
            .collect())
    }

    /// Slope filter, left/right split, and the near-horizontal right-side guard.
    pub fn classify_segments(&self, segments: &[LineSegment]) -> LaneCandidates {
        let mut candidates = LaneCandidates::default();

        for segment in segments {
            let slope = segment.slope();
            let magnitude = slope.abs();
            if magnitude <= self.config.min_abs_slope || magnitude >= self.config.max_abs_slope {
                continue;
            }

            if slope < 0.0 {
                candidates.left.push(*segment);
            } else {
                candidates.right.push(*segment);
            }
        }

        if !candidates.right.is_empty() {
            let mean_slope = candidates.right.iter().map(LineSegment::slope).sum::<f64>()
                / candidates.right.len() as f64;

            if mean_slope < self.config.right_min_mean_slope {
                debug!(
                    "Dropping {} right candidates: mean slope {:.3} < {:.3}",
                    candidates.right.len(),
                    mean_slope,
                    self.config.right_min_mean_slope
                );
                candidates.right.clear();
            }
        }

        candidates
    }

    pub fn fit(&self, candidates: &LaneCandidates, frame_height: i32) -> LaneModel {
        let ratio = self.config.extrapolate_top_ratio;
        LaneModel {
            left: fit_lane_line(&candidates.left, frame_height, ratio),
            right: fit_lane_line(&candidates.right, frame_height, ratio),
        }
    }

    pub fn estimate(&self, segments: &[LineSegment], frame_height: i32) -> LaneModel {
        if segments.is_empty() {
            return LaneModel::empty();
        }

        let candidates = self.classify_segments(segments);
        let model = self.fit(&candidates, frame_height);

        debug!(
            "Lanes: {} segments → {} left / {} right candidates",
            segments.len(),
            candidates.left.len(),
            candidates.right.len()
        );
        for (side, fit) in [("left", &model.left), ("right", &model.right)] {
            if let Some(line) = fit.line() {
                debug!(
                    "  {} lane: y = {:.3}x + {:.1}",
                    side, line.slope, line.intercept
                );
            }
        }

        model
    }

    /// Draw the fitted lines on a blank canvas and blend it over `frame`.
    pub fn render_overlay(&self, frame: &Mat, model: &LaneModel) -> Result<Mat> {
        let mut canvas = Mat::zeros(frame.rows(), frame.cols(), frame.typ())?.to_mat()?;
        let [b, g, r] = self.config.color;
        let color = Scalar::new(b as f64, g as f64, r as f64, 0.0);

        for line in model.lines() {
            imgproc::line(
                &mut canvas,
                to_point(line.bottom),
                to_point(line.top),
                color,
                self.config.line_thickness,
                imgproc::LINE_8,
                0,
            )?;
        }

        let mut blended = Mat::default();
        core::add_weighted(
            frame,
            self.config.frame_weight,
            &canvas,
            self.config.overlay_weight,
            self.config.brightness_offset,
            &mut blended,
            -1,
        )?;

        Ok(blended)
    }

    /// Full lane pass for one frame: Hough → classify → fit → blended overlay.
    pub fn estimate_lanes(&self, frame: &Mat, edges: &Mat) -> Result<(LaneModel, Mat)> {
        let segments = self.extract_segments(edges)?;
        let model = self.estimate(&segments, frame.rows());
        let overlay = self.render_overlay(frame, &model)?;
        Ok((model, overlay))
    }
}

/// Least-squares `y = m·x + b` over every endpoint, extrapolated to
/// `[top_ratio·H, H]`. Empty or degenerate input yields `NoLane`.
pub fn fit_lane_line(segments: &[LineSegment], frame_height: i32, top_ratio: f64) -> LaneFit {
    if segments.is_empty() {
        return LaneFit::NoLane;
    }

    let points = segments
        .iter()
        .flat_map(|s| [(s.x1, s.y1), (s.x2, s.y2)]);

    let (mut n, mut sx, mut sy, mut sxx, mut sxy) = (0.0f64, 0.0, 0.0, 0.0, 0.0);
    for (x, y) in points {
        n += 1.0;
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
    }

    let denominator = n * sxx - sx * sx;
    if denominator.abs() < DEGENERATE_EPSILON {
        return LaneFit::NoLane;
    }

    let slope = (n * sxy - sx * sy) / denominator;
    let intercept = (sy - slope * sx) / n;
    if slope.abs() < DEGENERATE_EPSILON {
        return LaneFit::NoLane;
    }

    let y_bottom = frame_height as f64;
    let y_top = top_ratio * frame_height as f64;
    let x_bottom = (y_bottom - intercept) / slope;
    let x_top = (y_top - intercept) / slope;

    if !x_bottom.is_finite() || !x_top.is_finite() {
        return LaneFit::NoLane;
    }

    LaneFit::Lane(LaneLine {
        bottom: (x_bottom, y_bottom),
        top: (x_top, y_top),
        slope,
        intercept,
    })
}

fn to_point((x, y): (f64, f64)) -> Point {
    Point::new(x.round() as i32, y.round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> LaneEstimator {
        LaneEstimator::new(LaneConfig::default())
    }

    /// Segment of length `dx` starting at (x, y) with the given slope.
    fn segment_with_slope(x: f64, y: f64, dx: f64, slope: f64) -> LineSegment {
        LineSegment::new(x, y, x + dx, y + slope * dx)
    }

    #[test]
    fn test_slope_uses_epsilon() {
        let vertical = LineSegment::new(10.0, 0.0, 10.0, 50.0);
        assert!(vertical.slope().is_finite());
        assert!(vertical.slope() > 1e6);
    }

    #[test]
    fn test_slope_filter_rejects_out_of_range() {
        let segments = vec![
            segment_with_slope(0.0, 0.0, 100.0, 0.3),
            segment_with_slope(0.0, 0.0, 100.0, -0.2),
            segment_with_slope(0.0, 0.0, 100.0, 2.5),
            segment_with_slope(0.0, 0.0, 100.0, -3.0),
            LineSegment::new(10.0, 0.0, 10.0, 50.0),
            LineSegment::new(0.0, 20.0, 80.0, 20.0),
        ];

        let candidates = estimator().classify_segments(&segments);
        assert!(candidates.left.is_empty());
        assert!(candidates.right.is_empty());
    }

    #[test]
    fn test_slope_filter_keeps_open_interval() {
        let segments = vec![
            segment_with_slope(0.0, 0.0, 100.0, 0.2999),
            segment_with_slope(0.0, 0.0, 100.0, 2.0001),
            segment_with_slope(0.0, 0.0, 100.0, 0.3001),
            segment_with_slope(0.0, 0.0, 100.0, 1.9999),
            segment_with_slope(0.0, 0.0, 100.0, -1.9999),
        ];

        let candidates = estimator().classify_segments(&segments);
        assert_eq!(candidates.right.len(), 2);
        assert_eq!(candidates.left.len(), 1);
    }

    #[test]
    fn test_classification_by_sign() {
        let segments = vec![
            segment_with_slope(100.0, 400.0, 50.0, -0.8),
            segment_with_slope(120.0, 380.0, 50.0, -1.2),
            segment_with_slope(500.0, 300.0, 50.0, 0.9),
        ];

        let candidates = estimator().classify_segments(&segments);
        assert_eq!(candidates.left.len(), 2);
        assert_eq!(candidates.right.len(), 1);
    }

    #[test]
    fn test_right_candidates_dropped_below_mean_slope() {
        let segments = vec![
            segment_with_slope(400.0, 300.0, 60.0, 0.35),
            segment_with_slope(420.0, 320.0, 60.0, 0.38),
            segment_with_slope(100.0, 400.0, 60.0, -0.9),
        ];

        let e = estimator();
        let candidates = e.classify_segments(&segments);
        assert!(candidates.right.is_empty());
        assert_eq!(candidates.left.len(), 1);

        let model = e.estimate(&segments, 480);
        assert_eq!(model.right, LaneFit::NoLane);
        assert!(model.left.is_present());
    }

    #[test]
    fn test_right_candidates_kept_at_steep_mean() {
        let segments = vec![
            segment_with_slope(400.0, 300.0, 60.0, 0.35),
            segment_with_slope(420.0, 320.0, 60.0, 0.9),
        ];
        let candidates = estimator().classify_segments(&segments);
        assert_eq!(candidates.right.len(), 2);
    }

    #[test]
    fn test_extrapolation_matches_known_line() {
        // Points on y = 2x + 10
        let segments = vec![
            LineSegment::new(100.0, 210.0, 150.0, 310.0),
            LineSegment::new(160.0, 330.0, 200.0, 410.0),
        ];
        let height = 480;

        let fit = fit_lane_line(&segments, height, 0.6);
        let line = fit.line().expect("line should be fitted");

        let expected_bottom = (480.0 - 10.0) / 2.0;
        let expected_top = (0.6 * 480.0 - 10.0) / 2.0;
        assert!((line.slope - 2.0).abs() < 1e-9);
        assert!((line.intercept - 10.0).abs() < 1e-6);
        assert!((line.bottom.0 - expected_bottom).abs() < 1e-6);
        assert!((line.top.0 - expected_top).abs() < 1e-6);
        assert_eq!(line.bottom.1, 480.0);
        assert!((line.top.1 - 288.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_segment_fit() {
        let fit = fit_lane_line(&[LineSegment::new(200.0, 400.0, 300.0, 300.0)], 480, 0.6);
        let line = fit.line().unwrap();
        assert!((line.slope + 1.0).abs() < 1e-9);
        assert!((line.bottom.0 - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_segments_gives_empty_model() {
        assert_eq!(estimator().estimate(&[], 480), LaneModel::empty());

        let model = estimator().estimate(&[segment_with_slope(100.0, 400.0, 50.0, -1.0)], 480);
        assert!(model.left.is_present());
        assert!(!model.right.is_present());
    }

    #[test]
    fn test_degenerate_fits_yield_no_lane() {
        assert_eq!(fit_lane_line(&[], 480, 0.6), LaneFit::NoLane);

        // All endpoints share one x
        let vertical = LineSegment::new(50.0, 100.0, 50.0, 300.0);
        assert_eq!(fit_lane_line(&[vertical], 480, 0.6), LaneFit::NoLane);

        // A single point repeated
        let point = LineSegment::new(50.0, 100.0, 50.0, 100.0);
        assert_eq!(fit_lane_line(&[point], 480, 0.6), LaneFit::NoLane);

        // Flat line has no x solution
        let flat = LineSegment::new(0.0, 100.0, 200.0, 100.0);
        assert_eq!(fit_lane_line(&[flat], 480, 0.6), LaneFit::NoLane);
    }

    #[test]
    fn test_black_frame_has_no_lanes_and_offset_overlay() {
        let frame =
            Mat::new_rows_cols_with_default(240, 320, core::CV_8UC3, Scalar::all(0.0)).unwrap();
        let edges = Mat::zeros(240, 320, core::CV_8UC1).unwrap().to_mat().unwrap();

        let (model, overlay) = estimator().estimate_lanes(&frame, &edges).unwrap();
        assert_eq!(model, LaneModel::empty());

        let mean = core::mean(&overlay, &core::no_array()).unwrap();
        for channel in 0..3 {
            assert!((mean[channel] - 1.0).abs() < 1e-9);
        }
        assert_eq!(overlay.rows(), 240);
        assert_eq!(overlay.cols(), 320);
    }

    #[test]
    fn test_synthetic_left_lane_is_detected() {
        use crate::preprocessing::FramePreprocessor;
        use crate::types::PreprocessingConfig;

        let (w, h) = (640, 480);
        let mut frame =
            Mat::new_rows_cols_with_default(h, w, core::CV_8UC3, Scalar::all(20.0)).unwrap();
        imgproc::line(
            &mut frame,
            Point::new(130, h - 1),
            Point::new(270, 290),
            Scalar::all(255.0),
            6,
            imgproc::LINE_8,
            0,
        )
        .unwrap();

        let edges = FramePreprocessor::new(PreprocessingConfig::default())
            .edge_map(&frame)
            .unwrap();
        let (model, overlay) = estimator().estimate_lanes(&frame, &edges).unwrap();

        let left = model.left.line().expect("left lane should be found");
        assert!(left.slope < 0.0);
        assert!((left.bottom.0 - 130.0).abs() < 25.0);
        assert_eq!(model.right, LaneFit::NoLane);

        // Lane color lands on the overlay along the fitted line
        let mid_x = ((left.bottom.0 + left.top.0) / 2.0).round() as i32;
        let mid_y = ((left.bottom.1 + left.top.1) / 2.0).round() as i32;
        let px = overlay.at_2d::<core::Vec3b>(mid_y, mid_x).unwrap();
        assert_eq!(px[1], 255);
    }
}
