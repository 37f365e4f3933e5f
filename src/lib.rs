//! Confocal spot segmentation pipeline
//!
//! Reads microscopy images whose file names encode magnification, z-slice
//! and channel, segments bright fluorescent spots, stores one row per spot in
//! SQLite and writes a three-panel figure per image.

pub mod config;
pub mod error;
pub mod imaging;
pub mod metadata;
pub mod pipeline;
pub mod state;

pub use config::{PipelineConfig, SegmentationParams, WriteMode};
pub use error::{PipelineError, Result};
pub use pipeline::{run_batch, run_pipeline, BatchSummary};
pub use state::SpotStore;
