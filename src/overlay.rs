// src/overlay.rs

use crate::types::{Detection, DetectionRole};
use anyhow::Result;
use opencv::{
    core::{self, Mat, Point, Scalar},
    imgproc,
    prelude::*,
};

/// Box colors per detection role (BGR format for OpenCV).
pub mod colors {
    use opencv::core::Scalar;

    pub const VEHICLE_RED: Scalar = Scalar::new(0.0, 0.0, 255.0, 0.0);
    pub const SIGN_BLUE: Scalar = Scalar::new(255.0, 0.0, 0.0, 0.0);
}

const BOX_THICKNESS: i32 = 2;
const LABEL_OFFSET_Y: i32 = 10;
const LABEL_FONT_SCALE: f64 = 0.5;
const LABEL_THICKNESS: i32 = 2;

pub fn role_color(role: DetectionRole) -> Scalar {
    match role {
        DetectionRole::Vehicle => colors::VEHICLE_RED,
        DetectionRole::Sign => colors::SIGN_BLUE,
    }
}

/// Strictly above the threshold; a detection sitting exactly on it is dropped.
pub fn passes_threshold(detection: &Detection, threshold: f32) -> bool {
    detection.confidence > threshold
}

pub fn format_label(detection: &Detection) -> String {
    format!("{} {:.2}", detection.label, detection.confidence)
}

/// Copy of `frame` with every qualifying detection boxed and labelled,
/// plus the number of boxes drawn.
pub fn draw_detections(
    frame: &Mat,
    detections: &[Detection],
    threshold: f32,
    color: Scalar,
) -> Result<(Mat, usize)> {
    let mut output = frame.try_clone()?;
    let mut drawn = 0;

    for detection in detections.iter().filter(|d| passes_threshold(d, threshold)) {
        let [x1, y1, x2, y2] = detection.bbox.map(|v| v.round() as i32);

        imgproc::rectangle_points(
            &mut output,
            Point::new(x1, y1),
            Point::new(x2, y2),
            color,
            BOX_THICKNESS,
            imgproc::LINE_8,
            0,
        )?;

        imgproc::put_text(
            &mut output,
            &format_label(detection),
            Point::new(x1, y1 - LABEL_OFFSET_Y),
            imgproc::FONT_HERSHEY_SIMPLEX,
            LABEL_FONT_SCALE,
            color,
            LABEL_THICKNESS,
            imgproc::LINE_8,
            false,
        )?;

        drawn += 1;
    }

    Ok((output, drawn))
}

/// Count of pixels exactly matching a BGR color.
#[cfg(test)]
pub fn count_color_pixels(frame: &Mat, color: Scalar) -> Result<usize> {
    let target = core::Vec3b::from([color[0] as u8, color[1] as u8, color[2] as u8]);
    let mut count = 0;
    for row in 0..frame.rows() {
        for col in 0..frame.cols() {
            if *frame.at_2d::<core::Vec3b>(row, col)? == target {
                count += 1;
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(confidence: f32) -> Detection {
        Detection {
            bbox: [40.0, 50.0, 120.0, 110.0],
            confidence,
            class_id: 2,
            label: "car".to_string(),
        }
    }

    fn gray_frame() -> Mat {
        Mat::new_rows_cols_with_default(200, 200, core::CV_8UC3, Scalar::all(60.0)).unwrap()
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(!passes_threshold(&detection(0.4), 0.4));
        assert!(passes_threshold(&detection(0.4000001), 0.4));
        assert!(!passes_threshold(&detection(0.1), 0.4));
    }

    #[test]
    fn test_label_format() {
        assert_eq!(format_label(&detection(0.876)), "car 0.88");
        assert_eq!(format_label(&detection(0.9)), "car 0.90");
    }

    #[test]
    fn test_draws_box_in_role_color() {
        let frame = gray_frame();
        let (annotated, drawn) =
            draw_detections(&frame, &[detection(0.9)], 0.4, colors::VEHICLE_RED).unwrap();

        assert_eq!(drawn, 1);
        let top_edge = annotated.at_2d::<core::Vec3b>(50, 80).unwrap();
        assert_eq!(*top_edge, core::Vec3b::from([0, 0, 255]));
        let left_edge = annotated.at_2d::<core::Vec3b>(80, 40).unwrap();
        assert_eq!(*left_edge, core::Vec3b::from([0, 0, 255]));

        // Right and bottom edges land on x2 and y2
        let red = core::Vec3b::from([0, 0, 255]);
        assert_eq!(*annotated.at_2d::<core::Vec3b>(110, 80).unwrap(), red);
        assert_eq!(*annotated.at_2d::<core::Vec3b>(80, 120).unwrap(), red);
        assert_ne!(*annotated.at_2d::<core::Vec3b>(80, 124).unwrap(), red);
        assert_ne!(*annotated.at_2d::<core::Vec3b>(80, 80).unwrap(), red);

        // Label text sits above the box
        let mut label_pixels = 0;
        for row in 25..48 {
            for col in 40..120 {
                if *annotated.at_2d::<core::Vec3b>(row, col).unwrap()
                    == core::Vec3b::from([0, 0, 255])
                {
                    label_pixels += 1;
                }
            }
        }
        assert!(label_pixels > 0);

        // Input untouched
        assert_eq!(count_color_pixels(&frame, colors::VEHICLE_RED).unwrap(), 0);
    }

    #[test]
    fn test_below_threshold_and_empty_leave_frame_unchanged() {
        let frame = gray_frame();

        for detections in [vec![], vec![detection(0.4), detection(0.2)]] {
            let (annotated, drawn) =
                draw_detections(&frame, &detections, 0.4, colors::SIGN_BLUE).unwrap();
            assert_eq!(drawn, 0);

            let mut diff = Mat::default();
            core::absdiff(&frame, &annotated, &mut diff).unwrap();
            let sum = core::sum_elems(&diff).unwrap();
            assert_eq!(sum[0] + sum[1] + sum[2], 0.0);
        }
    }

    #[test]
    fn test_role_colors() {
        assert_eq!(role_color(DetectionRole::Vehicle), colors::VEHICLE_RED);
        assert_eq!(role_color(DetectionRole::Sign), colors::SIGN_BLUE);
    }
}
