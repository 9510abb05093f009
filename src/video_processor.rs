// src/video_processor.rs

use crate::types::{VideoConfig, VideoProperties};
use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat},
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

/// Decoder side of a video: frames come out in stream order.
pub trait FrameSource: Send {
    fn properties(&self) -> VideoProperties;

    /// `Ok(None)` marks end of stream.
    fn read_frame(&mut self, index: u64) -> Result<Option<Mat>>;

    fn release(&mut self) -> Result<()>;
}

/// Encoder side of a video.
pub trait FrameSink {
    fn write_frame(&mut self, index: u64, frame: &Mat) -> Result<()>;

    fn release(&mut self) -> Result<()>;
}

/// Opens sources and sinks and decides where annotated output lands.
pub trait VideoBackend {
    type Source: FrameSource;
    type Sink: FrameSink;

    fn open_input(&mut self, path: &Path) -> Result<Self::Source>;

    fn output_path(&self, input: &Path) -> PathBuf;

    fn open_output(&mut self, path: &Path, properties: &VideoProperties) -> Result<Self::Sink>;
}

/// OpenCV-backed video I/O: `VideoCapture` in, `mp4v` `VideoWriter` out.
pub struct VideoProcessor {
    config: VideoConfig,
}

impl VideoProcessor {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    pub fn output_dir(&self) -> &Path {
        Path::new(&self.config.output_dir)
    }

    pub fn find_video_files(root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }

        let mut videos: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_video_file(e.path()))
            .map(|e| e.into_path())
            .collect();
        videos.sort();

        info!("Found {} video files in {}", videos.len(), root.display());
        Ok(videos)
    }
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Containers often report 0 or NaN fps; fall back rather than write a broken header.
pub fn resolve_fps(reported: f64, fallback: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else {
        fallback
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("path is not valid UTF-8: {}", path.display()))
}

impl VideoBackend for VideoProcessor {
    type Source = OpenCvSource;
    type Sink = OpenCvSink;

    fn open_input(&mut self, path: &Path) -> Result<OpenCvSource> {
        info!("Opening video: {}", path.display());

        if !path.is_file() {
            bail!("file does not exist");
        }

        let cap = VideoCapture::from_file(path_str(path)?, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            bail!("no decoder could open the file");
        }

        let reported_fps = cap.get(videoio::CAP_PROP_FPS)?;
        let fps = resolve_fps(reported_fps, self.config.fallback_fps);
        if fps != reported_fps {
            warn!(
                "Reported fps {} unusable, falling back to {}",
                reported_fps, fps
            );
        }

        let frame_count = cap.get(videoio::CAP_PROP_FRAME_COUNT)?;
        let properties = VideoProperties {
            fps,
            width: cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32,
            height: cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32,
            frame_count: (frame_count > 0.0).then_some(frame_count as u64),
        };

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            properties.width,
            properties.height,
            properties.fps,
            properties
                .frame_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );

        Ok(OpenCvSource { cap, properties })
    }

    fn output_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        self.output_dir()
            .join(format!("{}{}.mp4", stem, self.config.output_suffix))
    }

    fn open_output(&mut self, path: &Path, properties: &VideoProperties) -> Result<OpenCvSink> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        info!("Output video: {}", path.display());

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            path_str(path)?,
            fourcc,
            properties.fps,
            core::Size::new(properties.width, properties.height),
            true,
        )?;
        if !writer.is_opened()? {
            bail!("no encoder available for mp4v");
        }

        Ok(OpenCvSink { writer })
    }
}

pub struct OpenCvSource {
    cap: VideoCapture,
    properties: VideoProperties,
}

impl FrameSource for OpenCvSource {
    fn properties(&self) -> VideoProperties {
        self.properties
    }

    fn read_frame(&mut self, index: u64) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.cap.read(&mut frame)? || frame.empty() {
            debug!("End of stream after {} frames", index);
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn release(&mut self) -> Result<()> {
        self.cap.release()?;
        Ok(())
    }
}

pub struct OpenCvSink {
    writer: VideoWriter,
}

impl FrameSink for OpenCvSink {
    fn write_frame(&mut self, _index: u64, frame: &Mat) -> Result<()> {
        self.writer.write(frame)?;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}
