//! Batch orchestration
//!
//! Files are processed strictly one after another:
//! metadata → load → segment → store → render.
//! The first failing stage ends that file only; the batch carries on.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::imaging::{load_image, render_segmentation, segment_spots};
use crate::metadata::parse_filename;
use crate::state::SpotStore;

/// Outcome of one successfully processed file
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub file: PathBuf,
    /// Rows inserted into the store
    pub spots: usize,
    /// Figure written by the visualizer
    pub figure: PathBuf,
}

/// A file that could not be processed, and why
#[derive(Debug, Clone, PartialEq)]
pub struct FileFailure {
    pub file: PathBuf,
    pub stage: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub processed: Vec<FileReport>,
    pub failed: Vec<FileFailure>,
}

impl BatchSummary {
    pub fn total_files(&self) -> usize {
        self.processed.len() + self.failed.len()
    }

    pub fn total_spots(&self) -> usize {
        self.processed.iter().map(|r| r.spots).sum()
    }

    /// Log the end-of-run report
    pub fn log(&self) {
        log::info!(
            "📊 Batch summary: {} of {} file(s) succeeded, {} failed, {} spot(s) stored",
            self.processed.len(),
            self.total_files(),
            self.failed.len(),
            self.total_spots()
        );
        for failure in &self.failed {
            log::warn!(
                "   ✗ {} [{}]: {}",
                failure.file.display(),
                failure.stage,
                failure.reason
            );
        }
    }
}

/// List input images, sorted by path so runs are reproducible
pub fn find_input_files(config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    if !config.input_dir.is_dir() {
        return Err(PipelineError::Config(format!(
            "input directory not found: {}",
            config.input_dir.display()
        )));
    }

    let max_depth = if config.recursive { usize::MAX } else { 1 };

    let mut files: Vec<PathBuf> = WalkDir::new(&config.input_dir)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("⚠️  Skipping unreadable entry under {}: {}", config.input_dir.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| config.accepts(path))
        .collect();

    files.sort();
    Ok(files)
}

/// Run every stage for one file
pub fn process_file(path: &Path, config: &PipelineConfig, store: &mut SpotStore) -> Result<FileReport> {
    let name = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let metadata = parse_filename(&name)?;
    let image = load_image(path)?;
    let segmentation = segment_spots(&image.pixels, &config.segmentation);
    let spots = store.insert_spots(&name, &metadata, &segmentation)?;
    let figure = render_segmentation(&image, &segmentation, &config.output_dir)?;

    Ok(FileReport {
        file: path.to_path_buf(),
        spots,
        figure,
    })
}

/// Full run: list inputs, open the store, process every file, close the store.
///
/// Inputs are listed before the store opens, so a bad `input_dir` fails the
/// run without touching the database even in replace mode.
pub fn run_pipeline(config: &PipelineConfig) -> Result<BatchSummary> {
    let files = find_input_files(config)?;

    let mut store = SpotStore::open(&config.db_path, config.write_mode)?;
    let summary = process_files(files, config, &mut store);
    store.close()?;

    Ok(summary)
}

/// Process every input file, recording per-file failures instead of aborting
pub fn run_batch(config: &PipelineConfig, store: &mut SpotStore) -> Result<BatchSummary> {
    let files = find_input_files(config)?;
    Ok(process_files(files, config, store))
}

fn process_files(files: Vec<PathBuf>, config: &PipelineConfig, store: &mut SpotStore) -> BatchSummary {
    let mut summary = BatchSummary::default();

    if files.is_empty() {
        log::warn!(
            "No matching files ({}) found in {}",
            config.extensions.join(", "),
            config.input_dir.display()
        );
        return summary;
    }

    log::info!("🔍 Found {} image file(s) in {}", files.len(), config.input_dir.display());

    for path in files {
        log::info!("Processing: {}", path.display());
        match process_file(&path, config, store) {
            Ok(report) => {
                log::info!("{} - {} spot(s) detected and stored", path.display(), report.spots);
                summary.processed.push(report);
            }
            Err(e) => {
                log::warn!("⚠️  Error processing {}: {}", path.display(), e);
                summary.failed.push(FileFailure {
                    file: path,
                    stage: e.stage(),
                    reason: e.to_string(),
                });
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteMode;
    use crate::imaging::loader::tests::write_gray16_tiff;

    struct Workspace {
        _dir: tempfile::TempDir,
        config: PipelineConfig,
    }

    fn workspace() -> Workspace {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("images");
        std::fs::create_dir_all(&input).unwrap();

        let config = PipelineConfig {
            input_dir: input,
            output_dir: dir.path().join("results"),
            db_path: dir.path().join("results.db"),
            ..Default::default()
        };
        Workspace { _dir: dir, config }
    }

    /// 100x100 16-bit image with filled rectangles `(x, y, w, h, value)`
    fn write_fixture(path: &Path, rects: &[(u32, u32, u32, u32, u16)]) {
        let (width, height) = (100u32, 100u32);
        let mut data = vec![0u16; (width * height) as usize];
        for &(rx, ry, rw, rh, value) in rects {
            for y in ry..ry + rh {
                for x in rx..rx + rw {
                    data[(y * width + x) as usize] = value;
                }
            }
        }
        write_gray16_tiff(path, width, height, &data);
    }

    #[test]
    fn test_end_to_end_two_spots() {
        let ws = workspace();
        let name = "63x-root-tip_z3cGFP.tif";
        write_fixture(
            &ws.config.input_dir.join(name),
            &[(10, 70, 10, 5, 900), (60, 10, 12, 10, 1500)],
        );

        let mut store = SpotStore::open(&ws.config.db_path, WriteMode::Append).unwrap();
        let summary = run_batch(&ws.config, &mut store).unwrap();

        assert_eq!(summary.processed.len(), 1);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.total_spots(), 2);

        let rows = store.all_spots().unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.source_file, name);
            assert_eq!(row.magnification, 63.0);
            assert_eq!(row.z_slice, 3);
            assert_eq!(row.channel, "GFP");
        }
        let mut areas: Vec<u32> = rows.iter().map(|r| r.area).collect();
        areas.sort();
        assert_eq!(areas, vec![50, 120]);

        let figure = &summary.processed[0].figure;
        assert_eq!(figure, &ws.config.output_dir.join("63x-root-tip_z3cGFP_seg.png"));
        assert!(figure.is_file());
        assert_eq!(std::fs::read_dir(&ws.config.output_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_below_min_area_still_renders() {
        let mut ws = workspace();
        ws.config.segmentation.min_area = 200;
        let name = "20X-leaf_z1c2.tif";
        write_fixture(&ws.config.input_dir.join(name), &[(40, 40, 8, 8, 3000)]);

        let mut store = SpotStore::open(&ws.config.db_path, WriteMode::Append).unwrap();
        let summary = run_batch(&ws.config, &mut store).unwrap();

        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.processed[0].spots, 0);
        assert_eq!(store.spot_count().unwrap(), 0);
        assert!(summary.processed[0].figure.is_file());
    }

    #[test]
    fn test_failures_do_not_abort_batch() {
        let ws = workspace();
        let input = &ws.config.input_dir;
        write_fixture(&input.join("20X-leaf_z1c2.tif"), &[(40, 40, 8, 8, 3000)]);
        write_fixture(&input.join("not-a-convention.tif"), &[(40, 40, 8, 8, 3000)]);
        std::fs::write(input.join("20X-leaf_z2c2.tif"), b"corrupt").unwrap();
        std::fs::write(input.join("notes.txt"), b"ignored").unwrap();

        let mut store = SpotStore::open(&ws.config.db_path, WriteMode::Append).unwrap();
        let summary = run_batch(&ws.config, &mut store).unwrap();

        assert_eq!(summary.total_files(), 3);
        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.failed.len(), 2);

        let stages: Vec<&str> = summary.failed.iter().map(|f| f.stage).collect();
        // Sorted order: 20X-leaf_z2c2.tif, then not-a-convention.tif
        assert_eq!(stages, vec!["load", "metadata"]);
        assert!(summary.failed[1].reason.contains("not-a-convention.tif"));

        assert_eq!(store.spot_count().unwrap(), 1);
    }

    #[test]
    fn test_empty_input_dir() {
        let ws = workspace();
        let mut store = SpotStore::open(&ws.config.db_path, WriteMode::Append).unwrap();
        let summary = run_batch(&ws.config, &mut store).unwrap();

        assert_eq!(summary.total_files(), 0);
        assert!(!ws.config.output_dir.exists());
    }

    #[test]
    fn test_missing_input_dir() {
        let mut ws = workspace();
        ws.config.input_dir = ws.config.input_dir.join("missing");
        let mut store = SpotStore::open(&ws.config.db_path, WriteMode::Append).unwrap();

        assert!(matches!(
            run_batch(&ws.config, &mut store),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_missing_input_dir_keeps_replace_rows() {
        let mut ws = workspace();
        let name = "63X-root_z3cGFP.tif";
        write_fixture(
            &ws.config.input_dir.join(name),
            &[(10, 70, 10, 5, 900), (60, 10, 12, 10, 1500)],
        );
        run_pipeline(&ws.config).unwrap();

        ws.config.write_mode = WriteMode::Replace;
        ws.config.input_dir = ws.config.input_dir.join("typo");
        assert!(matches!(run_pipeline(&ws.config), Err(PipelineError::Config(_))));

        let store = SpotStore::open(&ws.config.db_path, WriteMode::Append).unwrap();
        assert_eq!(store.spot_count().unwrap(), 2);
    }

    #[test]
    fn test_run_pipeline_replace() {
        let mut ws = workspace();
        write_fixture(
            &ws.config.input_dir.join("63X-root_z3cGFP.tif"),
            &[(10, 70, 10, 5, 900), (60, 10, 12, 10, 1500)],
        );
        run_pipeline(&ws.config).unwrap();
        run_pipeline(&ws.config).unwrap();

        ws.config.write_mode = WriteMode::Replace;
        let summary = run_pipeline(&ws.config).unwrap();
        assert_eq!(summary.total_spots(), 2);

        let store = SpotStore::open(&ws.config.db_path, WriteMode::Append).unwrap();
        assert_eq!(store.spot_count().unwrap(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_link_does_not_abort_scan() {
        let ws = workspace();
        write_fixture(&ws.config.input_dir.join("20X-a_z1c1.tif"), &[]);
        std::os::unix::fs::symlink(
            ws.config.input_dir.join("gone.tif"),
            ws.config.input_dir.join("20X-b_z1c1.tif"),
        )
        .unwrap();

        let files = find_input_files(&ws.config).unwrap();
        assert_eq!(files, vec![ws.config.input_dir.join("20X-a_z1c1.tif")]);
    }

    #[test]
    fn test_recursive_discovery() {
        let mut ws = workspace();
        let nested = ws.config.input_dir.join("seedling2");
        std::fs::create_dir_all(&nested).unwrap();
        write_fixture(&ws.config.input_dir.join("20X-a_z1c1.tif"), &[]);
        write_fixture(&nested.join("20X-b_z1c1.TIF"), &[]);

        assert_eq!(find_input_files(&ws.config).unwrap().len(), 1);

        ws.config.recursive = true;
        let files = find_input_files(&ws.config).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0] < files[1]);
    }

    #[test]
    fn test_rerun_append_then_replace() {
        let mut ws = workspace();
        write_fixture(
            &ws.config.input_dir.join("63X-root_z3cGFP.tif"),
            &[(10, 70, 10, 5, 900), (60, 10, 12, 10, 1500)],
        );

        for _ in 0..2 {
            let mut store = SpotStore::open(&ws.config.db_path, ws.config.write_mode).unwrap();
            run_batch(&ws.config, &mut store).unwrap();
        }
        let store = SpotStore::open(&ws.config.db_path, WriteMode::Append).unwrap();
        assert_eq!(store.spot_count().unwrap(), 4);
        drop(store);

        ws.config.write_mode = WriteMode::Replace;
        let mut store = SpotStore::open(&ws.config.db_path, ws.config.write_mode).unwrap();
        run_batch(&ws.config, &mut store).unwrap();
        assert_eq!(store.spot_count().unwrap(), 2);
    }
}
