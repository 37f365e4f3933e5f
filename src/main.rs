use env_logger::{Builder, Env};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use spotseg::{run_pipeline, BatchSummary, PipelineConfig, Result};

fn main() -> ExitCode {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    // Optional single argument: path to a JSON config file
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);

    match run(config_path.as_deref()) {
        Ok(summary) => {
            summary.log();
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Load configuration and process every input file with one store connection
fn run(config_path: Option<&Path>) -> Result<BatchSummary> {
    let config = PipelineConfig::load(config_path)?;

    log::info!("🔬 Spot segmentation starting");
    log::info!("   Input dir:  {}", config.input_dir.display());
    log::info!("   Output dir: {}", config.output_dir.display());
    log::info!("   Database:   {} ({:?})", config.db_path.display(), config.write_mode);

    run_pipeline(&config)
}
