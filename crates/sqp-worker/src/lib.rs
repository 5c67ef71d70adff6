//! Squash video processing worker.
//!
//! This crate provides:
//! - Environment-driven worker configuration
//! - The per-video pipeline (frames, main view, chunks, tracking, merge)
//! - A concurrent executor with one tracker backend per video task
//! - Batch manifests, structured logging and metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod manifest;
pub mod metrics;
pub mod processor;

pub use config::{SegmenterBackend, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::{ConfiguredSegmenterFactory, SegmenterFactory, VideoExecutor};
pub use logging::VideoLogger;
pub use manifest::Manifest;
pub use processor::{VideoJob, VideoOutcome, VideoProcessor};
