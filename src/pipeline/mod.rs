// src/pipeline/mod.rs

pub mod analyzer;
pub mod frame_context;
pub mod metrics;
pub mod orchestrator;

pub use analyzer::FrameAnalyzer;
pub use metrics::MetricsSummary;
pub use orchestrator::VideoPipeline;
