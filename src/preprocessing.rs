// src/preprocessing.rs

use crate::types::{PreprocessingConfig, RoiConfig};
use anyhow::Result;
use opencv::{
    core::{self, Mat, Point, Scalar, Size, Vector},
    imgproc,
    prelude::*,
};

/// Turns a BGR frame into a binary edge map limited to the road trapezoid.
#[derive(Debug, Clone)]
pub struct FramePreprocessor {
    config: PreprocessingConfig,
}

impl FramePreprocessor {
    pub fn new(config: PreprocessingConfig) -> Self {
        Self { config }
    }

    /// Grayscale → Gaussian blur → Canny. Output is `CV_8UC1`, same size as `frame`.
    pub fn preprocess(&self, frame: &Mat) -> Result<Mat> {
        let gray = to_grayscale(frame)?;

        let kernel = self.config.blur_kernel;
        let mut blurred = Mat::default();
        imgproc::gaussian_blur_def(&gray, &mut blurred, Size::new(kernel, kernel), 0.0)?;

        let mut edges = Mat::default();
        imgproc::canny(
            &blurred,
            &mut edges,
            self.config.canny_low,
            self.config.canny_high,
            3,
            false,
        )?;

        Ok(edges)
    }

    /// Zero every pixel outside the region of interest.
    pub fn restrict_to_region(&self, edges: &Mat) -> Result<Mat> {
        let vertices = roi_vertices(&self.config.roi, edges.cols(), edges.rows());

        let mut mask = Mat::zeros(edges.rows(), edges.cols(), core::CV_8UC1)?.to_mat()?;
        let mut polygons = Vector::<Vector<Point>>::new();
        polygons.push(Vector::from_iter(vertices));
        imgproc::fill_poly(
            &mut mask,
            &polygons,
            Scalar::all(255.0),
            imgproc::LINE_8,
            0,
            Point::new(0, 0),
        )?;

        let mut masked = Mat::default();
        core::bitwise_and(edges, &mask, &mut masked, &core::no_array())?;
        Ok(masked)
    }

    pub fn edge_map(&self, frame: &Mat) -> Result<Mat> {
        let edges = self.preprocess(frame)?;
        self.restrict_to_region(&edges)
    }
}

/// Trapezoid corners in order bottom-left, bottom-right, top-right, top-left.
pub fn roi_vertices(roi: &RoiConfig, width: i32, height: i32) -> [Point; 4] {
    let w = width as f32;
    let h = height as f32;
    let top = (roi.top_y * h) as i32;

    [
        Point::new((roi.bottom_left_x * w) as i32, height),
        Point::new((roi.bottom_right_x * w) as i32, height),
        Point::new((roi.top_right_x * w) as i32, top),
        Point::new((roi.top_left_x * w) as i32, top),
    ]
}

fn to_grayscale(frame: &Mat) -> Result<Mat> {
    let code = match frame.channels() {
        1 => return Ok(frame.try_clone()?),
        4 => imgproc::COLOR_BGRA2GRAY,
        _ => imgproc::COLOR_BGR2GRAY,
    };

    let mut gray = Mat::default();
    imgproc::cvt_color_def(frame, &mut gray, code)?;
    Ok(gray)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preprocessor() -> FramePreprocessor {
        FramePreprocessor::new(PreprocessingConfig::default())
    }

    fn solid(width: i32, height: i32, typ: i32, value: f64) -> Mat {
        Mat::new_rows_cols_with_default(height, width, typ, Scalar::all(value)).unwrap()
    }

    #[test]
    fn test_edge_map_matches_frame_dimensions() {
        for (w, h) in [(320, 240), (641, 359), (1280, 720)] {
            let mut frame = solid(w, h, core::CV_8UC3, 30.0);
            imgproc::rectangle(
                &mut frame,
                core::Rect::new(w / 4, h / 2, w / 3, h / 4),
                Scalar::all(220.0),
                -1,
                imgproc::LINE_8,
                0,
            )
            .unwrap();

            let edges = preprocessor().edge_map(&frame).unwrap();
            assert_eq!(edges.cols(), w);
            assert_eq!(edges.rows(), h);
            assert_eq!(edges.typ(), core::CV_8UC1);
        }
    }

    #[test]
    fn test_roi_vertices_follow_frame_size() {
        let v = roi_vertices(&RoiConfig::default(), 1000, 800);
        assert_eq!(v[0], Point::new(100, 800));
        assert_eq!(v[1], Point::new(900, 800));
        assert_eq!(v[2], Point::new(650, 440));
        assert_eq!(v[3], Point::new(350, 440));
    }

    #[test]
    fn test_nothing_survives_outside_trapezoid() {
        let (w, h) = (400, 300);
        let all_edges = solid(w, h, core::CV_8UC1, 255.0);
        let masked = preprocessor().restrict_to_region(&all_edges).unwrap();

        let contour = Vector::<Point>::from_iter(roi_vertices(&RoiConfig::default(), w, h));
        let (mut outside, mut inside) = (0, 0);
        for row in 0..h {
            for col in 0..w {
                // Signed distance: negative outside, positive inside
                let distance = imgproc::point_polygon_test(
                    &contour,
                    core::Point2f::new(col as f32, row as f32),
                    true,
                )
                .unwrap();
                let value = *masked.at_2d::<u8>(row, col).unwrap();

                // Rasterized polygon edges may claim pixels within one pixel of the line
                if distance < -1.0 {
                    assert_eq!(value, 0, "pixel ({col}, {row}) outside the region survived");
                    outside += 1;
                } else if distance > 1.0 {
                    assert_eq!(value, 255, "pixel ({col}, {row}) inside the region was masked");
                    inside += 1;
                }
            }
        }
        assert!(outside > 0 && inside > 0);
    }

    #[test]
    fn test_blank_frame_has_no_edges() {
        let frame = solid(320, 240, core::CV_8UC3, 0.0);
        let edges = preprocessor().edge_map(&frame).unwrap();
        assert_eq!(core::count_non_zero(&edges).unwrap(), 0);
    }
}
