// src/pipeline/frame_context.rs
//
// Everything the analyze stage learned about one frame. Handed to the
// encode stage and dropped once written.

use crate::types::{Detection, LaneModel};
use opencv::core::Mat;

#[derive(Debug)]
pub struct FrameContext {
    pub index: u64,
    pub lane_model: LaneModel,
    pub vehicle_detections: Vec<Detection>,
    pub sign_detections: Vec<Detection>,
    /// Lane blend plus both detection overlays.
    pub annotated: Mat,
}

impl FrameContext {
    pub fn has_lanes(&self) -> bool {
        self.lane_model.lines().next().is_some()
    }
}
