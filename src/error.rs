// src/error.rs

use crate::types::DetectionRole;
use std::path::PathBuf;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures surfaced by `VideoPipeline::process`. None of them are retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot open video {path}: {reason}")]
    InputOpen { path: PathBuf, reason: String },

    #[error("cannot open output video {path}: {reason}")]
    OutputOpen { path: PathBuf, reason: String },

    #[error("frame {frame}: processing failed: {message}")]
    FrameProcessing { frame: u64, message: String },

    #[error("frame {frame}: {role} model failed: {message}")]
    ModelInvocation {
        role: DetectionRole,
        frame: u64,
        message: String,
    },

    #[error("frame {frame}: write failed: {message}")]
    FrameWrite { frame: u64, message: String },

    #[error("{0} stage panicked")]
    StagePanicked(&'static str),

    #[error("failed to release video handles: {0}")]
    Release(String),
}

impl PipelineError {
    pub fn input_open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::InputOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn output_open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::OutputOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// `{:#}` keeps the anyhow context chain in the message.
    pub fn frame_processing(frame: u64, err: &anyhow::Error) -> Self {
        Self::FrameProcessing {
            frame,
            message: format!("{:#}", err),
        }
    }

    pub fn model_invocation(role: DetectionRole, frame: u64, err: &anyhow::Error) -> Self {
        Self::ModelInvocation {
            role,
            frame,
            message: format!("{:#}", err),
        }
    }

    /// Frame-level failures abort the stream; opening failures happen before it.
    pub fn is_frame_failure(&self) -> bool {
        matches!(
            self,
            Self::FrameProcessing { .. } | Self::ModelInvocation { .. } | Self::FrameWrite { .. }
        )
    }
}
