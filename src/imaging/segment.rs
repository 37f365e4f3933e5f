//! Spot segmentation
//!
//! Pipeline, in order:
//! 1. Local mean over a `(2r+1)x(2r+1)` window (summed-area table, window
//!    clipped at the borders, mean over in-bounds pixels only)
//! 2. Foreground iff `intensity > local_mean + offset`
//! 3. Morphological opening, then closing, square element of radius `morph_radius`
//! 4. 8-connected component labeling
//! 5. Area, mean/integrated intensity (from the original image), centroid, bbox
//! 6. Components with `area < min_area` are dropped; survivors are renumbered
//!    1..N in raster first-appearance order

use image::{imageops, GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{connected_components, Connectivity};

use super::loader::IntensityImage;
use crate::config::SegmentationParams;

/// Per-pixel region ids; 0 is background
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// Inclusive pixel bounds of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// Measurements of one labeled spot
#[derive(Debug, Clone, PartialEq)]
pub struct SpotRegion {
    /// 1-based, unique within one image
    pub label_id: u32,
    /// Pixel count
    pub area: u32,
    pub mean_intensity: f64,
    /// Sum of original intensities over the region
    pub integrated_intensity: f64,
    /// (x = mean column, y = mean row)
    pub centroid: (f64, f64),
    pub bbox: BoundingBox,
}

/// Output of one segmentation pass
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Final binary mask (only pixels of kept regions are foreground)
    pub mask: GrayImage,
    /// Final label image, ids match `regions[i].label_id`
    pub labels: LabelImage,
    pub regions: Vec<SpotRegion>,
}

impl Segmentation {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }
}

/// Segment bright spots in an intensity image
pub fn segment_spots(image: &IntensityImage, params: &SegmentationParams) -> Segmentation {
    let raw_mask = threshold_local(image, params.block_radius, params.threshold_offset);
    let cleaned = clean_mask(&raw_mask, params.morph_radius);

    let components = connected_components(&cleaned, Connectivity::Eight, Luma([BACKGROUND]));
    let (labels, regions) = measure_regions(image, &components, params.min_area);

    let (width, height) = image.dimensions();
    let mask = GrayImage::from_fn(width, height, |x, y| {
        if labels.get_pixel(x, y).0[0] != 0 {
            Luma([FOREGROUND])
        } else {
            Luma([BACKGROUND])
        }
    });

    log::debug!(
        "Segmented {}x{}: {} spot(s) kept (min area {})",
        width,
        height,
        regions.len(),
        params.min_area
    );

    Segmentation {
        mask,
        labels,
        regions,
    }
}

/// Adaptive threshold: foreground where a pixel is brighter than the mean of
/// its clipped `(2r+1)x(2r+1)` neighbourhood plus `offset`
pub fn threshold_local(image: &IntensityImage, block_radius: u32, offset: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let table = SummedAreaTable::new(image);
    let r = block_radius;

    GrayImage::from_fn(width, height, |x, y| {
        let x0 = x.saturating_sub(r);
        let y0 = y.saturating_sub(r);
        let x1 = x.saturating_add(r).min(width - 1);
        let y1 = y.saturating_add(r).min(height - 1);

        let count = ((x1 - x0 + 1) as f64) * ((y1 - y0 + 1) as f64);
        let mean = table.sum(x0, y0, x1, y1) / count;
        let value = image.get_pixel(x, y).0[0] as f64;

        if value > mean + offset as f64 {
            Luma([FOREGROUND])
        } else {
            Luma([BACKGROUND])
        }
    })
}

/// Opening removes speckle, closing then fills small gaps inside spots.
///
/// Erosion treats pixels past the edge as foreground, so the mask is framed
/// with `morph_radius` background pixels first and cropped back afterwards.
/// Without the frame, closing fills the gap between a spot and the border.
pub fn clean_mask(mask: &GrayImage, morph_radius: u8) -> GrayImage {
    if morph_radius == 0 {
        return mask.clone();
    }
    let (width, height) = mask.dimensions();
    let pad = morph_radius as u32;

    let mut framed = GrayImage::from_pixel(width + 2 * pad, height + 2 * pad, Luma([BACKGROUND]));
    imageops::replace(&mut framed, mask, pad as i64, pad as i64);

    let opened = open(&framed, Norm::LInf, morph_radius);
    let closed = close(&opened, Norm::LInf, morph_radius);
    imageops::crop_imm(&closed, pad, pad, width, height).to_image()
}

#[derive(Default)]
struct Accumulator {
    area: u32,
    sum: f64,
    sum_x: f64,
    sum_y: f64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    /// Raster index of the first pixel seen
    first_seen: usize,
}

/// Measure every component, drop small ones and renumber the survivors
fn measure_regions(
    image: &IntensityImage,
    components: &LabelImage,
    min_area: u32,
) -> (LabelImage, Vec<SpotRegion>) {
    let (width, height) = components.dimensions();
    let mut stats: Vec<Option<Accumulator>> = Vec::new();

    for (x, y, label) in components.enumerate_pixels() {
        let id = label.0[0] as usize;
        if id == 0 {
            continue;
        }
        if stats.len() <= id {
            stats.resize_with(id + 1, || None);
        }

        let value = image.get_pixel(x, y).0[0] as f64;
        let acc = stats[id].get_or_insert_with(|| Accumulator {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            first_seen: y as usize * width as usize + x as usize,
            ..Default::default()
        });

        acc.area += 1;
        acc.sum += value;
        acc.sum_x += x as f64;
        acc.sum_y += y as f64;
        acc.min_x = acc.min_x.min(x);
        acc.min_y = acc.min_y.min(y);
        acc.max_x = acc.max_x.max(x);
        acc.max_y = acc.max_y.max(y);
    }

    // Survivors ordered by the raster position of their first pixel
    let mut kept: Vec<(usize, Accumulator)> = stats
        .into_iter()
        .enumerate()
        .filter_map(|(id, acc)| acc.map(|acc| (id, acc)))
        .filter(|(_, acc)| acc.area >= min_area)
        .collect();
    kept.sort_by_key(|(_, acc)| acc.first_seen);

    let mut remap = vec![0u32; kept.iter().map(|(id, _)| id + 1).max().unwrap_or(0)];
    let mut regions = Vec::with_capacity(kept.len());

    for (index, (old_id, acc)) in kept.into_iter().enumerate() {
        let label_id = index as u32 + 1;
        remap[old_id] = label_id;

        let area = acc.area as f64;
        regions.push(SpotRegion {
            label_id,
            area: acc.area,
            mean_intensity: acc.sum / area,
            integrated_intensity: acc.sum,
            centroid: (acc.sum_x / area, acc.sum_y / area),
            bbox: BoundingBox {
                min_x: acc.min_x,
                min_y: acc.min_y,
                max_x: acc.max_x,
                max_y: acc.max_y,
            },
        });
    }

    let labels = LabelImage::from_fn(width, height, |x, y| {
        let id = components.get_pixel(x, y).0[0] as usize;
        Luma([remap.get(id).copied().unwrap_or(0)])
    });

    (labels, regions)
}

/// Inclusive-rectangle sums in O(1) after one pass over the image
struct SummedAreaTable {
    stride: usize,
    table: Vec<f64>,
}

impl SummedAreaTable {
    fn new(image: &IntensityImage) -> Self {
        let (width, height) = image.dimensions();
        let stride = width as usize + 1;
        let mut table = vec![0.0f64; stride * (height as usize + 1)];

        for y in 0..height as usize {
            let mut row_sum = 0.0;
            for x in 0..width as usize {
                row_sum += image.get_pixel(x as u32, y as u32).0[0] as f64;
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row_sum;
            }
        }

        Self { stride, table }
    }

    /// Sum over `[x0, x1] x [y0, y1]`, bounds inclusive
    fn sum(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> f64 {
        let s = self.stride;
        let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize + 1, y1 as usize + 1);
        self.table[y1 * s + x1] - self.table[y0 * s + x1] - self.table[y1 * s + x0]
            + self.table[y0 * s + x0]
    }
}
