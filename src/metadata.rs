//! Filename metadata
//!
//! Acquisition settings are encoded in the image file name, e.g.
//! `20X-mchH2Bxistl345-2-seedling1-transzone_overview_z01c2.tif`:
//!
//! - `20X`            magnification (number followed by `X` or `x`)
//! - `mchH2B...`      free-form sample description
//! - `_z01`           z-slice index
//! - `c2`             channel (digits or a name such as `GFP`)

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{PipelineError, Result};

/// Fields derived from one image file name
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub magnification: f64,
    pub sample: String,
    pub z_slice: u32,
    pub channel: String,
}

const FILENAME_PATTERN: &str = r"^(?P<magnification>\d+(?:\.\d+)?)[Xx]-(?P<sample>.+?)_z(?P<zslice>\d+)c(?P<channel>[A-Za-z0-9]+)\.[A-Za-z0-9]+$";

fn filename_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(FILENAME_PATTERN))
        .as_ref()
        .map_err(|e| PipelineError::MetadataFormat {
            file: String::new(),
            reason: format!("bad filename pattern: {}", e),
        })
}

/// Parse a bare file name (no directories) into a metadata record
pub fn parse_filename(name: &str) -> Result<MetadataRecord> {
    let fail = |reason: &str| PipelineError::MetadataFormat {
        file: name.to_string(),
        reason: reason.to_string(),
    };

    let caps = filename_pattern()?
        .captures(name)
        .ok_or_else(|| fail("expected <mag>X-<sample>_z<slice>c<channel>.<ext>"))?;

    let magnification: f64 = caps["magnification"]
        .parse()
        .map_err(|_| fail("magnification is not a number"))?;
    let z_slice: u32 = caps["zslice"]
        .parse()
        .map_err(|_| fail("z-slice index out of range"))?;

    Ok(MetadataRecord {
        magnification,
        sample: caps["sample"].to_string(),
        z_slice,
        channel: caps["channel"].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overview_name() {
        let meta =
            parse_filename("20X-mchH2Bxistl345-2-seedling1-transzone_overview_z01c2.tif").unwrap();

        assert_eq!(meta.magnification, 20.0);
        assert_eq!(meta.sample, "mchH2Bxistl345-2-seedling1-transzone_overview");
        assert_eq!(meta.z_slice, 1);
        assert_eq!(meta.channel, "2");
    }

    #[test]
    fn test_parse_named_channel() {
        let meta = parse_filename("63x-root-tip_z3cGFP.tif").unwrap();
        assert_eq!(meta.magnification, 63.0);
        assert_eq!(meta.sample, "root-tip");
        assert_eq!(meta.z_slice, 3);
        assert_eq!(meta.channel, "GFP");
    }

    #[test]
    fn test_parse_fractional_magnification() {
        let meta = parse_filename("1.5X-leaf_z10c0.tiff").unwrap();
        assert_eq!(meta.magnification, 1.5);
        assert_eq!(meta.z_slice, 10);
        assert_eq!(meta.channel, "0");
    }

    #[test]
    fn test_rejects_nonconforming_names() {
        let bad = [
            "",
            "image.tif",
            "seedling_z01c2.tif",            // no magnification
            "20X-seedling.tif",              // no z/channel token
            "20X-seedling_z01.tif",          // no channel
            "20X-seedling_zc2.tif",          // empty z-slice
            "20X-_z01c2.tif",                // empty sample
            "20-seedling_z01c2.tif",         // missing X suffix
            "20X-seedling_z01c2",            // no extension
            "prefix20X-seedling_z01c2.tif",  // junk before magnification
            "20X-seedling_z99999999999c2.tif", // z-slice overflows
        ];

        for name in bad {
            match parse_filename(name) {
                Err(PipelineError::MetadataFormat { file, .. }) => assert_eq!(file, name),
                other => panic!("expected MetadataFormat for {:?}, got {:?}", name, other),
            }
        }
    }
}
