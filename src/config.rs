//! Pipeline configuration
//!
//! All knobs live in one serde struct so a run can be reproduced from a
//! small JSON file. Every field has a default, so an empty `{}` (or no file
//! at all) gives the standard batch setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Config file picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "spotseg.json";

/// How the spot store treats rows left over from earlier runs
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Keep existing rows, add new ones (re-runs accumulate duplicates)
    #[default]
    Append,
    /// Clear the `spots` table once when the store is opened, then insert
    Replace,
}

/// Segmentation constants
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SegmentationParams {
    /// Adaptive threshold window radius; the window is `2r + 1` pixels wide
    pub block_radius: u32,

    /// Added to the local mean before the foreground comparison
    pub threshold_offset: f32,

    /// Radius of the square structuring element used for opening and closing
    /// - 0 disables the morphological cleanup
    /// - 1 = 3x3 square
    pub morph_radius: u8,

    /// Components smaller than this many pixels are discarded as noise
    pub min_area: u32,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            block_radius: 25,
            threshold_offset: 0.0,
            morph_radius: 1,
            min_area: 5,
        }
    }
}

/// Settings for one batch run.
///
/// Read from and written to a flat JSON object (see `ConfigFile`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "ConfigFile", into = "ConfigFile")]
pub struct PipelineConfig {
    /// Directory scanned for input images
    pub input_dir: PathBuf,

    /// Directory receiving the three-panel visualizations
    pub output_dir: PathBuf,

    /// SQLite database holding the `spots` table
    pub db_path: PathBuf,

    /// Accepted file extensions (compared case-insensitively, no leading dot)
    pub extensions: Vec<String>,

    /// Descend into sub-directories of `input_dir`
    pub recursive: bool,

    pub write_mode: WriteMode,

    pub segmentation: SegmentationParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("images"),
            output_dir: PathBuf::from("results"),
            db_path: PathBuf::from("results.db"),
            extensions: vec!["tif".to_string(), "tiff".to_string()],
            recursive: false,
            write_mode: WriteMode::Append,
            segmentation: SegmentationParams::default(),
        }
    }
}

/// On-disk layout: every key at the top level, unknown keys rejected.
/// Spelled out field by field since `flatten` and `deny_unknown_fields` don't mix.
#[derive(Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    input_dir: PathBuf,
    output_dir: PathBuf,
    db_path: PathBuf,
    extensions: Vec<String>,
    recursive: bool,
    write_mode: WriteMode,
    block_radius: u32,
    threshold_offset: f32,
    morph_radius: u8,
    min_area: u32,
}

impl Default for ConfigFile {
    fn default() -> Self {
        PipelineConfig::default().into()
    }
}

impl From<ConfigFile> for PipelineConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            input_dir: file.input_dir,
            output_dir: file.output_dir,
            db_path: file.db_path,
            extensions: file.extensions,
            recursive: file.recursive,
            write_mode: file.write_mode,
            segmentation: SegmentationParams {
                block_radius: file.block_radius,
                threshold_offset: file.threshold_offset,
                morph_radius: file.morph_radius,
                min_area: file.min_area,
            },
        }
    }
}

impl From<PipelineConfig> for ConfigFile {
    fn from(config: PipelineConfig) -> Self {
        Self {
            input_dir: config.input_dir,
            output_dir: config.output_dir,
            db_path: config.db_path,
            extensions: config.extensions,
            recursive: config.recursive,
            write_mode: config.write_mode,
            block_radius: config.segmentation.block_radius,
            threshold_offset: config.segmentation.threshold_offset,
            morph_radius: config.segmentation.morph_radius,
            min_area: config.segmentation.min_area,
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON text and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::Config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Load the configuration for this run.
    ///
    /// An explicit path must exist. Without one, `spotseg.json` in the
    /// working directory is used if present, otherwise the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    log::info!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let text = std::fs::read_to_string(&path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&text)?;
        log::info!("⚙️  Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.segmentation.block_radius == 0 {
            return Err(PipelineError::Config("block_radius must be at least 1".into()));
        }
        if self.segmentation.min_area == 0 {
            return Err(PipelineError::Config("min_area must be at least 1".into()));
        }
        if !self.segmentation.threshold_offset.is_finite() {
            return Err(PipelineError::Config("threshold_offset must be finite".into()));
        }
        if self.extensions.iter().all(|ext| ext.trim().is_empty()) {
            return Err(PipelineError::Config("at least one file extension is required".into()));
        }
        Ok(())
    }

    /// Whether `path` carries one of the configured extensions
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(ext) = path.extension() else {
            return false;
        };
        let ext = ext.to_string_lossy().to_lowercase();
        self.extensions
            .iter()
            .any(|accepted| accepted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.write_mode, WriteMode::Append);
        assert_eq!(config.segmentation.min_area, 5);
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_json(
            r#"{ "input_dir": "/data/stack", "write_mode": "replace", "min_area": 12 }"#,
        )
        .unwrap();

        assert_eq!(config.input_dir, PathBuf::from("/data/stack"));
        assert_eq!(config.write_mode, WriteMode::Replace);
        assert_eq!(config.segmentation.min_area, 12);
        assert_eq!(config.segmentation.block_radius, 25);
        assert_eq!(config.db_path, PathBuf::from("results.db"));
    }

    #[test]
    fn test_serialization() {
        let mut config = PipelineConfig::default();
        config.recursive = true;
        config.segmentation.threshold_offset = 12.5;

        let json = config.to_json().unwrap();
        let restored = PipelineConfig::from_json(&json).unwrap();

        assert_eq!(config, restored);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "min_area": 0 }"#),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "block_radius": 0 }"#),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "extensions": [] }"#),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "write_mode": "overwrite" }"#),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        match PipelineConfig::from_json(r#"{ "min_aera": 50 }"#) {
            Err(PipelineError::Config(reason)) => assert!(reason.contains("min_aera")),
            other => panic!("expected config error, got {:?}", other),
        }
        // Segmentation keys stay at the top level, not under a nested object
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "segmentation": { "min_area": 50 } }"#),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_serialized_keys_are_flat() {
        let json = PipelineConfig::default().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["min_area"], 5);
        assert_eq!(value["write_mode"], "append");
        assert!(value.get("segmentation").is_none());
    }

    #[test]
    fn test_extension_matching() {
        let config = PipelineConfig::default();
        assert!(config.accepts(Path::new("a/63X-root_z3cGFP.tif")));
        assert!(config.accepts(Path::new("63X-root_z3cGFP.TIFF")));
        assert!(!config.accepts(Path::new("63X-root_z3cGFP.png")));
        assert!(!config.accepts(Path::new("README")));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = PipelineConfig::load(Some(Path::new("/nonexistent/spotseg.json")));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
