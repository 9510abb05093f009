// src/pipeline/orchestrator.rs
//
// Opening → Streaming → Finalized, with Failed reachable from the first two.
// Streaming runs decode and analyze on scoped threads and encodes on the
// caller, joined by bounded queues so at most a few frames are in flight.

use super::analyzer::FrameAnalyzer;
use super::frame_context::FrameContext;
use super::metrics::PipelineMetrics;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{PipelineConfig, VideoProperties};
use crate::video_processor::{FrameSink, FrameSource, VideoBackend};
use crossbeam_channel::{bounded, Receiver, Sender};
use opencv::core::Mat;
use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Opening,
    Streaming,
    Finalized,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "IDLE",
            PipelineState::Opening => "OPENING",
            PipelineState::Streaming => "STREAMING",
            PipelineState::Finalized => "FINALIZED",
            PipelineState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

pub struct VideoPipeline<B: VideoBackend> {
    backend: B,
    analyzer: FrameAnalyzer,
    config: PipelineConfig,
    state: PipelineState,
    metrics: PipelineMetrics,
    properties: Option<VideoProperties>,
}

impl<B: VideoBackend> VideoPipeline<B> {
    pub fn new(backend: B, analyzer: FrameAnalyzer, config: PipelineConfig) -> Self {
        Self {
            backend,
            analyzer,
            config,
            state: PipelineState::Idle,
            metrics: PipelineMetrics::new(),
            properties: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Counters of the most recent `process` call.
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Properties of the most recently opened input.
    pub fn properties(&self) -> Option<VideoProperties> {
        self.properties
    }

    pub fn output_path(&self, input: &Path) -> PathBuf {
        self.backend.output_path(input)
    }

    /// Annotate `input` and return the path of the written video.
    pub fn process(&mut self, input: &Path) -> PipelineResult<PathBuf> {
        self.metrics = PipelineMetrics::new();
        self.properties = None;
        self.transition(PipelineState::Opening);

        let mut source = match self.backend.open_input(input) {
            Ok(source) => source,
            Err(e) => return Err(self.fail(PipelineError::input_open(input, format!("{:#}", e)))),
        };
        let properties = source.properties();
        self.properties = Some(properties);

        let output_path = self.backend.output_path(input);
        let mut sink = match self.backend.open_output(&output_path, &properties) {
            Ok(sink) => sink,
            Err(e) => {
                if let Err(release_err) = source.release() {
                    warn!("Failed to release input: {:#}", release_err);
                }
                return Err(self.fail(PipelineError::output_open(
                    &output_path,
                    format!("{:#}", e),
                )));
            }
        };

        self.transition(PipelineState::Streaming);
        let streamed = run_stages(
            &mut source,
            &mut sink,
            &mut self.analyzer,
            &self.config,
            &properties,
            &self.metrics,
        );
        let released = release_handles(&mut source, &mut sink);

        match (streamed, released) {
            (Ok(()), Ok(())) => {
                self.transition(PipelineState::Finalized);
                let summary = self.metrics.summary();
                info!(
                    "✓ {} frames written to {} ({:.1} FPS)",
                    summary.frames_written,
                    output_path.display(),
                    summary.fps
                );
                Ok(output_path)
            }
            (Ok(()), Err(e)) => Err(self.fail(e)),
            (Err(e), released) => {
                if let Err(release_err) = released {
                    warn!("{}", release_err);
                }
                Err(self.fail(e))
            }
        }
    }

    fn transition(&mut self, next: PipelineState) {
        info!("Pipeline state: {} → {}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        error!("{}", err);
        self.transition(PipelineState::Failed);
        err
    }
}

/// Both handles are released even when the first release fails.
fn release_handles<S: FrameSource, K: FrameSink>(
    source: &mut S,
    sink: &mut K,
) -> PipelineResult<()> {
    let failures: Vec<String> = [
        source.release().map_err(|e| format!("input: {:#}", e)),
        sink.release().map_err(|e| format!("output: {:#}", e)),
    ]
    .into_iter()
    .filter_map(Result::err)
    .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Release(failures.join("; ")))
    }
}

/// A stage that errors drops its channel ends; neighbours see the disconnect
/// and return `Ok`, so the joined results carry only the genuine failure.
fn run_stages<S: FrameSource, K: FrameSink>(
    source: &mut S,
    sink: &mut K,
    analyzer: &mut FrameAnalyzer,
    config: &PipelineConfig,
    properties: &VideoProperties,
    metrics: &PipelineMetrics,
) -> PipelineResult<()> {
    let (decoded_tx, decoded_rx) = bounded::<(u64, Mat)>(config.queue_capacity);
    let (analyzed_tx, analyzed_rx) = bounded::<FrameContext>(config.queue_capacity);

    thread::scope(|scope| {
        let decoder = scope.spawn(move || decode_stage(source, decoded_tx, metrics));
        let analysis =
            scope.spawn(move || analyze_stage(analyzer, decoded_rx, analyzed_tx, metrics));

        let encoded = encode_stage(sink, analyzed_rx, config, properties, metrics);

        let decoded = decoder
            .join()
            .map_err(|_| PipelineError::StagePanicked("decode"))
            .and_then(|r| r);
        let analyzed = analysis
            .join()
            .map_err(|_| PipelineError::StagePanicked("analyze"))
            .and_then(|r| r);

        decoded.and(analyzed).and(encoded)
    })
}

fn decode_stage<S: FrameSource>(
    source: &mut S,
    tx: Sender<(u64, Mat)>,
    metrics: &PipelineMetrics,
) -> PipelineResult<()> {
    let mut index = 0u64;
    loop {
        let frame = match source.read_frame(index) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => return Err(PipelineError::frame_processing(index, &e)),
        };
        metrics.inc(&metrics.frames_decoded);

        if tx.send((index, frame)).is_err() {
            debug!("Decode stage stopping, analyzer gone");
            break;
        }
        index += 1;
    }
    Ok(())
}

fn analyze_stage(
    analyzer: &mut FrameAnalyzer,
    rx: Receiver<(u64, Mat)>,
    tx: Sender<FrameContext>,
    metrics: &PipelineMetrics,
) -> PipelineResult<()> {
    for (index, frame) in rx {
        let ctx = analyzer.analyze(index, frame, metrics)?;
        if tx.send(ctx).is_err() {
            debug!("Analyze stage stopping, encoder gone");
            break;
        }
    }
    Ok(())
}

fn encode_stage<K: FrameSink>(
    sink: &mut K,
    rx: Receiver<FrameContext>,
    config: &PipelineConfig,
    properties: &VideoProperties,
    metrics: &PipelineMetrics,
) -> PipelineResult<()> {
    for ctx in rx {
        let start = Instant::now();
        sink.write_frame(ctx.index, &ctx.annotated)
            .map_err(|e| PipelineError::FrameWrite {
                frame: ctx.index,
                message: format!("{:#}", e),
            })?;
        metrics.set_timing(&metrics.encode_time_us, start.elapsed());
        metrics.inc(&metrics.frames_written);
        debug!(
            "Encoded frame {} (lanes={}, {} vehicle / {} sign detections)",
            ctx.index,
            ctx.has_lanes(),
            ctx.vehicle_detections.len(),
            ctx.sign_detections.len()
        );

        let written = ctx.index + 1;
        if config.progress_interval > 0 && written % config.progress_interval == 0 {
            log_progress(written, properties, metrics);
        }
    }
    Ok(())
}

fn log_progress(written: u64, properties: &VideoProperties, metrics: &PipelineMetrics) {
    match properties.frame_count {
        Some(total) if total > 0 => info!(
            "Progress: {:.1}% ({}/{}) - {:.1} FPS",
            (written as f64 / total as f64 * 100.0).min(100.0),
            written,
            total,
            metrics.fps()
        ),
        _ => info!("Progress: {} frames - {:.1} FPS", written, metrics.fps()),
    }
}
