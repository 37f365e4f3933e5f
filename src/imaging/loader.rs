//! Intensity image loader
//!
//! Confocal exports are usually 8/16-bit grayscale TIFF stacks, sometimes RGB.
//! Everything is brought down to a single `f32` intensity channel in the
//! file's native scale (no normalization), so measurements stay comparable
//! with the values the microscope software reports.

use image::{DynamicImage, ImageBuffer, Luma};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Single-channel intensity raster
pub type IntensityImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// ITU-R BT.709 luma weights (R, G, B)
pub const LUMA_WEIGHTS: [f32; 3] = [0.2125, 0.7154, 0.0721];

/// An input image, immutable for the duration of one processing pass
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// File name only (e.g. "63X-root_z3cGFP.tif")
    pub name: String,
    /// Full path the image was read from
    pub path: PathBuf,
    pub pixels: IntensityImage,
}

impl SourceImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Load an image file as a single intensity channel
pub fn load_image(path: &Path) -> Result<SourceImage> {
    if !path.is_file() {
        return Err(PipelineError::image_read(path, "file not found"));
    }

    let is_tiff = path
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "tif" || ext == "tiff"
        })
        .unwrap_or(false);

    let pixels = if is_tiff {
        decode_tiff(path)?
    } else {
        let img = image::open(path).map_err(|e| PipelineError::image_read(path, e))?;
        from_dynamic(path, img)?
    };

    if pixels.width() == 0 || pixels.height() == 0 {
        return Err(PipelineError::image_read(path, "image has no pixels"));
    }

    let name = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    log::debug!("📷 Loaded {}: {}x{}", name, pixels.width(), pixels.height());

    Ok(SourceImage {
        name,
        path: path.to_path_buf(),
        pixels,
    })
}

/// Decode the first page of a TIFF file
fn decode_tiff(path: &Path) -> Result<IntensityImage> {
    use tiff::decoder::{Decoder, DecodingResult};

    let file = File::open(path).map_err(|e| PipelineError::image_read(path, e))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| PipelineError::image_read(path, format!("not a TIFF: {}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| PipelineError::image_read(path, e))?;
    let color_type = decoder
        .colortype()
        .map_err(|e| PipelineError::image_read(path, e))?;

    let channels = match color_type {
        tiff::ColorType::Gray(_) => 1,
        tiff::ColorType::RGB(_) => 3,
        other => {
            return Err(PipelineError::image_read(
                path,
                format!("unsupported TIFF color type {:?}", other),
            ))
        }
    };

    // Only the first IFD is read; further pages of a stack are ignored
    let samples: Vec<f32> = match decoder
        .read_image()
        .map_err(|e| PipelineError::image_read(path, e))?
    {
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(PipelineError::image_read(
                path,
                "unsupported TIFF sample format",
            ))
        }
    };

    to_intensity(path, width, height, channels, samples)
}

/// Convert interleaved samples (1 or 3 per pixel) into an intensity raster
fn to_intensity(
    path: &Path,
    width: u32,
    height: u32,
    channels: usize,
    samples: Vec<f32>,
) -> Result<IntensityImage> {
    let expected = width as usize * height as usize * channels;
    if samples.len() != expected {
        return Err(PipelineError::image_read(
            path,
            format!(
                "expected {} samples for {}x{}x{}, found {}",
                expected,
                width,
                height,
                channels,
                samples.len()
            ),
        ));
    }

    let data = match channels {
        1 => samples,
        3 => samples.chunks_exact(3).map(luma).collect(),
        n => {
            return Err(PipelineError::image_read(
                path,
                format!("unsupported channel count {}", n),
            ))
        }
    };

    ImageBuffer::from_raw(width, height, data)
        .ok_or_else(|| PipelineError::image_read(path, "buffer size mismatch"))
}

fn from_dynamic(path: &Path, img: DynamicImage) -> Result<IntensityImage> {
    let (width, height) = (img.width(), img.height());
    match img {
        DynamicImage::ImageLuma8(buf) => {
            to_intensity(path, width, height, 1, buf.into_raw().into_iter().map(f32::from).collect())
        }
        DynamicImage::ImageLuma16(buf) => {
            to_intensity(path, width, height, 1, buf.into_raw().into_iter().map(f32::from).collect())
        }
        DynamicImage::ImageRgb8(buf) => {
            to_intensity(path, width, height, 3, buf.into_raw().into_iter().map(f32::from).collect())
        }
        DynamicImage::ImageRgb16(buf) => {
            to_intensity(path, width, height, 3, buf.into_raw().into_iter().map(f32::from).collect())
        }
        DynamicImage::ImageRgb32F(buf) => to_intensity(path, width, height, 3, buf.into_raw()),
        other => Err(PipelineError::image_read(
            path,
            format!("unsupported pixel layout {:?}", other.color()),
        )),
    }
}

/// Weighted luminance of one RGB triple
#[inline]
pub fn luma(rgb: &[f32]) -> f32 {
    LUMA_WEIGHTS[0] * rgb[0] + LUMA_WEIGHTS[1] * rgb[1] + LUMA_WEIGHTS[2] * rgb[2]
}
