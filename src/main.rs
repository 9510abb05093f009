// src/main.rs

mod config;
mod error;
mod lane_detection;
mod object_detection;
mod overlay;
mod pipeline;
mod preprocessing;
mod types;
mod video_processor;

use anyhow::{Context, Result};
use clap::Parser;
use object_detection::{ObjectDetector, YoloDetector};
use pipeline::{FrameAnalyzer, MetricsSummary, VideoPipeline};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use types::{Config, DetectorConfig, VideoProperties};
use video_processor::VideoProcessor;

const DEFAULT_CONFIG: &str = "config.yaml";

#[derive(Parser)]
#[command(name = "dashcam-annotator")]
#[command(about = "Draws lane lines and vehicle/sign boxes onto dash-camera video")]
#[command(version)]
struct Cli {
    /// Video file, or a directory searched recursively for videos
    input: PathBuf,

    /// YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Overrides `video.output_dir`
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct ProcessingReport<'a> {
    input: &'a Path,
    output: &'a Path,
    properties: Option<VideoProperties>,
    metrics: MetricsSummary,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config first so its log level can seed the filter; report how it loaded afterwards
    let (mut config, loaded_from) = load_config(&cli.config)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚗 Dashcam annotator starting");
    match loaded_from {
        Some(path) => info!("✓ Configuration loaded from {}", path.display()),
        None => warn!(
            "{} not found, using built-in defaults",
            cli.config.display()
        ),
    }

    if let Some(dir) = &cli.output_dir {
        config.video.output_dir = dir.to_string_lossy().into_owned();
    }

    let videos = if cli.input.is_dir() {
        VideoProcessor::find_video_files(&cli.input)?
    } else {
        vec![cli.input.clone()]
    };
    if videos.is_empty() {
        error!("No video files found in {}", cli.input.display());
        return Ok(());
    }

    // Model construction fails here, before any video is opened
    let vehicle = build_detector("vehicle", &config.detectors.vehicle)?;
    let sign = build_detector("sign", &config.detectors.sign)?;

    let analyzer = FrameAnalyzer::new(&config, vehicle, sign);
    let backend = VideoProcessor::new(config.video.clone());
    let mut pipeline = VideoPipeline::new(backend, analyzer, config.pipeline.clone());

    let mut succeeded = 0;
    for (idx, video_path) in videos.iter().enumerate() {
        info!(
            "Processing video {}/{}: {}",
            idx + 1,
            videos.len(),
            video_path.display()
        );

        match pipeline.process(video_path) {
            Ok(output_path) => {
                succeeded += 1;
                let summary = pipeline.metrics().summary();
                log_summary(&summary);

                if config.video.write_report {
                    let report = ProcessingReport {
                        input: video_path,
                        output: &output_path,
                        properties: pipeline.properties(),
                        metrics: summary,
                    };
                    if let Err(e) = write_report(&output_path, &report) {
                        warn!("Failed to write report: {:#}", e);
                    }
                }
            }
            Err(e) => {
                error!(
                    "Failed to process {} (pipeline {}): {}",
                    video_path.display(),
                    pipeline.state(),
                    e
                );
                if e.is_frame_failure() {
                    discard_partial_output(&pipeline.output_path(video_path));
                }
            }
        }
    }

    info!("Done: {}/{} videos annotated", succeeded, videos.len());
    Ok(())
}

/// `Ok((config, None))` when the default file is absent; an explicit path must exist.
fn load_config(path: &Path) -> Result<(Config, Option<PathBuf>)> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        return Ok((Config::default(), None));
    }
    let config = Config::load(path)?;
    Ok((config, Some(path.to_path_buf())))
}

fn build_detector(role: &str, config: &DetectorConfig) -> Result<Option<Box<dyn ObjectDetector>>> {
    if !config.enabled {
        warn!("{} detector disabled", role);
        return Ok(None);
    }
    let detector = YoloDetector::new(config.clone())
        .with_context(|| format!("Failed to initialize {} detector", role))?;
    Ok(Some(Box::new(detector)))
}

fn log_summary(summary: &MetricsSummary) {
    info!("  Frames written: {}", summary.frames_written);
    info!(
        "  Lanes found: left {} / right {}",
        summary.frames_with_left_lane, summary.frames_with_right_lane
    );
    info!(
        "  🚙 Vehicle boxes: {}, 🪧 sign boxes: {} ({} below threshold)",
        summary.vehicle_boxes, summary.sign_boxes, summary.below_threshold
    );
    info!(
        "  {:.1} FPS over {:.1}s",
        summary.fps, summary.elapsed_secs
    );
}

fn discard_partial_output(path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => warn!("Discarded incomplete output {}", path.display()),
        Err(e) => warn!("Could not remove incomplete output {}: {}", path.display(), e),
    }
}

/// `<input stem>_report.json`, next to the annotated video.
fn write_report(output_path: &Path, report: &ProcessingReport) -> Result<()> {
    let stem = report
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let report_path = output_path.with_file_name(format!("{}_report.json", stem));

    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&report_path, json)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    info!("📄 Report saved: {}", report_path.display());
    Ok(())
}
