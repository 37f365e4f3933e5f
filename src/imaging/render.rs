//! Three-panel segmentation figures
//!
//! Each processed image gets one PNG: the min-max stretched original, the
//! binary mask and the labels tinted over the original with a cross on each
//! centroid. Panels sit side by side, separated by a black gutter.

use image::{imageops, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_cross_mut;
use std::fs;
use std::path::{Path, PathBuf};

use super::loader::{IntensityImage, SourceImage};
use super::segment::Segmentation;
use crate::error::{PipelineError, Result};

/// Black gap between the three panels
const GUTTER: u32 = 4;

/// Suffix appended to the input stem for the figure file
const FIGURE_SUFFIX: &str = "_seg.png";

const CENTROID_MARK: Rgb<u8> = Rgb([255, 255, 255]);

/// Where the figure for `source_name` goes, e.g. `results/63X-root_z3cGFP_seg.png`
pub fn visualization_path(output_dir: &Path, source_name: &str) -> PathBuf {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| source_name.to_string());
    output_dir.join(format!("{}{}", stem, FIGURE_SUFFIX))
}

/// Render original | mask | labeled overlay and write it as PNG.
/// Any earlier figure at the same path is overwritten.
pub fn render_segmentation(
    image: &SourceImage,
    segmentation: &Segmentation,
    output_dir: &Path,
) -> Result<PathBuf> {
    let path = visualization_path(output_dir, &image.name);

    fs::create_dir_all(output_dir)
        .map_err(|e| PipelineError::render(output_dir, format!("cannot create directory: {}", e)))?;

    let figure = compose_figure(&image.pixels, segmentation)?;
    figure
        .save_with_format(&path, ImageFormat::Png)
        .map_err(|e| PipelineError::render(&path, e))?;

    log::debug!("🖼️  Wrote {}", path.display());
    Ok(path)
}

/// Build the three-panel figure in memory
pub fn compose_figure(pixels: &IntensityImage, segmentation: &Segmentation) -> Result<RgbImage> {
    let (width, height) = pixels.dimensions();
    if segmentation.mask.dimensions() != (width, height)
        || segmentation.labels.dimensions() != (width, height)
    {
        return Err(PipelineError::render(
            PathBuf::new(),
            "segmentation does not match image dimensions",
        ));
    }

    let gray = stretch_to_u8(pixels);
    let original = gray_to_rgb(&gray);
    let mask = gray_to_rgb(&segmentation.mask);
    let overlay = overlay_labels(&gray, segmentation);

    let mut canvas = RgbImage::new(width * 3 + GUTTER * 2, height);
    for (index, panel) in [original, mask, overlay].iter().enumerate() {
        let x = index as u32 * (width + GUTTER);
        imageops::replace(&mut canvas, panel, x as i64, 0);
    }

    Ok(canvas)
}

/// Min-max stretch of native intensities to 8 bits; a flat image renders black
fn stretch_to_u8(pixels: &IntensityImage) -> GrayImage {
    let (min, max) = pixels
        .pixels()
        .map(|p| p.0[0])
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    GrayImage::from_fn(pixels.width(), pixels.height(), |x, y| {
        let v = pixels.get_pixel(x, y).0[0];
        if !range.is_finite() || range <= 0.0 || !v.is_finite() {
            return Luma([0]);
        }
        Luma([(((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8])
    })
}

fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

fn overlay_labels(gray: &GrayImage, segmentation: &Segmentation) -> RgbImage {
    let mut panel = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        match segmentation.labels.get_pixel(x, y).0[0] {
            0 => Rgb([v, v, v]),
            label => {
                let c = label_color(label);
                Rgb([blend(v, c[0]), blend(v, c[1]), blend(v, c[2])])
            }
        }
    });

    for region in &segmentation.regions {
        let (cx, cy) = region.centroid;
        draw_cross_mut(&mut panel, CENTROID_MARK, cx.round() as i32, cy.round() as i32);
    }

    panel
}

#[inline]
fn blend(base: u8, tint: u8) -> u8 {
    ((base as u16 + tint as u16) / 2) as u8
}

/// Stable, well-separated colour per label (golden-angle hue walk)
fn label_color(label: u32) -> [u8; 3] {
    let hue = (label as f32 * 137.507_77) % 360.0;
    hsv_to_rgb(hue, 0.85, 1.0)
}

fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> [u8; 3] {
    let c = value * saturation;
    let h = hue / 60.0;
    let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = value - c;
    let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    [to_u8(r), to_u8(g), to_u8(b)]
}
