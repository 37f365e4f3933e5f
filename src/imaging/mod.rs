/// Image handling for the spot pipeline
///
/// This module handles:
/// - Loading microscopy images as single-channel intensity (loader.rs)
/// - Adaptive thresholding, morphology and region measurement (segment.rs)
/// - Three-panel PNG visualizations of a segmentation (render.rs)

pub mod loader;
pub mod render;
pub mod segment;

pub use loader::{load_image, IntensityImage, SourceImage};
pub use render::render_segmentation;
pub use segment::{segment_spots, Segmentation, SpotRegion};
