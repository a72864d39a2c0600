use std::path::PathBuf;

use clap::Parser;

use ppo_weight_export::logging::setup_logging;
use ppo_weight_export::{Activation, ExportConfig, MappingPreset, WeightExporter};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresetCli {
    CleanRl,
    StableBaselines3,
}

impl From<PresetCli> for MappingPreset {
    fn from(cli: PresetCli) -> Self {
        match cli {
            PresetCli::CleanRl => MappingPreset::CleanRl,
            PresetCli::StableBaselines3 => MappingPreset::StableBaselines3,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationCli {
    Tanh,
    Relu,
    Identity,
}

impl From<ActivationCli> for Activation {
    fn from(cli: ActivationCli) -> Self {
        match cli {
            ActivationCli::Tanh => Activation::Tanh,
            ActivationCli::Relu => Activation::Relu,
            ActivationCli::Identity => Activation::Identity,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ppo_weight_export", version, about)]
struct Config {
    /// Checkpoint to convert (.cleanrl_model, .pt, .ot, .npz or .safetensors)
    #[arg(short = 'c', long, default_value = "pretrained_models/ppo_continuous_action.cleanrl_model")]
    checkpoint: PathBuf,

    /// Directory receiving the JSON weight bundle
    #[arg(short = 'o', long, default_value = "weights_json")]
    output_dir: PathBuf,

    /// Parameter naming convention of the checkpoint
    #[arg(long, value_enum, default_value = "clean-rl")]
    preset: PresetCli,

    /// Observation size
    #[arg(long, default_value_t = 376)]
    input_dim: usize,

    /// Action size
    #[arg(long, default_value_t = 17)]
    action_dim: usize,

    /// Hidden-layer activation of the trained networks
    #[arg(long, value_enum, default_value = "tanh")]
    activation: ActivationCli,

    /// Provenance recorded in model_info.json
    #[arg(long, default_value = "CleanRL Humanoid-v4")]
    source: String,

    /// Skip the libtorch comparison before writing
    #[arg(long, default_value_t = false)]
    no_verify: bool,

    /// Seed of the verification input
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Tolerance of the verification (relative and absolute)
    #[arg(long, default_value_t = 1e-5)]
    tolerance: f32,

    /// Also write rotating log files into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    let _logger = setup_logging(config.log_dir.as_deref())?;

    let export_config = ExportConfig {
        checkpoint_path: config.checkpoint,
        output_dir: config.output_dir,
        preset: config.preset.into(),
        input_dim: config.input_dim,
        action_dim: config.action_dim,
        activation: config.activation.into(),
        source: config.source,
        verify: !config.no_verify,
        seed: config.seed,
        tolerance: config.tolerance,
    };

    log::info!("🚀 {} v{}", ppo_weight_export::NAME, ppo_weight_export::VERSION);
    let exporter = WeightExporter::with_config(export_config);
    let settings = exporter.config();
    log::info!(
        "⚙️ Preset {}, dims {} -> {}, activation {}, verify {}",
        settings.preset,
        settings.input_dim,
        settings.action_dim,
        settings.activation,
        settings.verify
    );
    match exporter.run() {
        Ok(summary) => {
            log::info!("\n{}", summary);
            log::info!("✅ Conversion complete");
            Ok(())
        }
        Err(err) => {
            log::error!("❌ Export failed: {}", err);
            Err(err.into())
        }
    }
}
