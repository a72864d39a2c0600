use std::path::PathBuf;

use clap::Parser;

use ppo_weight_export::hub::{download_all, CLEANRL_HUMANOID_FILES, CLEANRL_HUMANOID_URL};
use ppo_weight_export::logging::setup_logging;

#[derive(Parser, Debug)]
#[command(name = "download_pretrained")]
struct Args {
    /// Destination directory
    #[arg(short = 'o', long, default_value = "pretrained_models")]
    output_dir: PathBuf,

    /// Hub repository to download from
    #[arg(long, default_value = CLEANRL_HUMANOID_URL)]
    base_url: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _logger = setup_logging(None)?;

    log::info!("📥 Downloading CleanRL Humanoid-v4 PPO into {}", args.output_dir.display());
    let outcomes = download_all(&args.base_url, &CLEANRL_HUMANOID_FILES, &args.output_dir).await?;

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.is_ok())
        .map(|o| o.file_name.as_str())
        .collect();

    if failed.is_empty() {
        log::info!("✅ {} files downloaded", outcomes.len());
        Ok(())
    } else {
        log::error!("❌ Failed downloads: {:?}", failed);
        Err(format!("{} of {} downloads failed", failed.len(), outcomes.len()).into())
    }
}
