//! Rows that flow between the segmentation results and the `spots` table
//!
//! One `SpotRecord` is written per labeled region per processed image.

use crate::imaging::segment::SpotRegion;
use crate::metadata::MetadataRecord;

/// A single persisted spot measurement
#[derive(Debug, Clone, PartialEq)]
pub struct SpotRecord {
    /// File name only (e.g. "63X-root_z3cGFP.tif")
    pub source_file: String,
    pub magnification: f64,
    /// Free-form sample description from the file name
    pub sample: String,
    pub z_slice: u32,
    pub channel: String,
    /// 1-based label, unique within one source file and run
    pub label_id: u32,
    /// Pixel count
    pub area: u32,
    pub mean_intensity: f64,
    pub integrated_intensity: f64,
    pub centroid_x: f64,
    pub centroid_y: f64,
    /// Inclusive bounding box (min_x, min_y, max_x, max_y)
    pub bbox: (u32, u32, u32, u32),
}

impl SpotRecord {
    pub fn new(source_file: &str, metadata: &MetadataRecord, region: &SpotRegion) -> Self {
        Self {
            source_file: source_file.to_string(),
            magnification: metadata.magnification,
            sample: metadata.sample.clone(),
            z_slice: metadata.z_slice,
            channel: metadata.channel.clone(),
            label_id: region.label_id,
            area: region.area,
            mean_intensity: region.mean_intensity,
            integrated_intensity: region.integrated_intensity,
            centroid_x: region.centroid.0,
            centroid_y: region.centroid.1,
            bbox: (
                region.bbox.min_x,
                region.bbox.min_y,
                region.bbox.max_x,
                region.bbox.max_y,
            ),
        }
    }
}
