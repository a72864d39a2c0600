//! Weight Export Manager
//!
//! Drives one export: load the checkpoint, convert both networks, check the
//! bundle against libtorch, then write the files. Per-layer progress is logged
//! here from the converter's reports.

use std::fmt;
use std::path::PathBuf;

use crate::neural::checkpoint::Checkpoint;
use crate::neural::converter::{convert_policy, ConvertedPolicy};
use crate::neural::layer_mapping::{MappingPreset, Network};
use crate::neural::model_info::ModelInfo;
use crate::neural::model_io::{load_checkpoint, write_bundle};
use crate::neural::verifier::{
    action_std, compare, forward, gaussian_noise, reference_forward, sample_action, Activation,
    Deviation,
};
use crate::{ExportError, Result};

/// Configuration for one export run
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Checkpoint file to convert
    pub checkpoint_path: PathBuf,
    /// Directory receiving the JSON files
    pub output_dir: PathBuf,
    /// Parameter naming convention of the checkpoint
    pub preset: MappingPreset,
    /// Observation size
    pub input_dim: usize,
    /// Action size
    pub action_dim: usize,
    /// Hidden-layer activation
    pub activation: Activation,
    /// Free-form provenance written to `model_info.json`
    pub source: String,
    /// Compare the bundle with libtorch before writing
    pub verify: bool,
    /// Seed for the verification input and the sampling noise
    pub seed: u64,
    /// Relative and absolute tolerance of the comparison
    pub tolerance: f32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from("pretrained_models/ppo_continuous_action.cleanrl_model"),
            output_dir: PathBuf::from("weights_json"),
            preset: MappingPreset::CleanRl,
            input_dim: 376,
            action_dim: 17,
            activation: Activation::Tanh,
            source: "CleanRL Humanoid-v4".to_string(),
            verify: true,
            seed: 42,
            tolerance: 1e-5,
        }
    }
}

/// Outcome of the libtorch comparison
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub actor: Deviation,
    pub critic: Deviation,
    /// One Gaussian sample around the actor mean, when the bundle has a logstd
    pub sampled_action: Option<Vec<f32>>,
}

pub struct WeightExporter {
    config: ExportConfig,
}

impl WeightExporter {
    pub fn new() -> Self {
        Self::with_config(ExportConfig::default())
    }

    pub fn with_config(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Load the configured checkpoint and export it
    pub fn run(&self) -> Result<ExportSummary> {
        log::info!("📂 Loading checkpoint from {}", self.config.checkpoint_path.display());
        let checkpoint = load_checkpoint(&self.config.checkpoint_path)?;

        log::info!("Model architecture detected:");
        for (key, array) in checkpoint.iter() {
            log::info!("  {}: {:?}", key, array.shape());
        }

        self.export_checkpoint(&checkpoint)
    }

    pub fn convert(&self, checkpoint: &Checkpoint) -> Result<ConvertedPolicy> {
        log::info!("🔄 Converting weights ({} preset)...", self.config.preset);
        let converted = convert_policy(
            checkpoint,
            self.config.preset,
            self.config.input_dim,
            self.config.action_dim,
        )?;

        for report in &converted.report {
            log::info!("  {}", report);
        }
        if let Some(logstd) = converted.bundle.actor_logstd() {
            log::info!("  actor_logstd: {:?}", logstd.shape());
        } else {
            log::warn!("⚠️ No logstd in checkpoint, bundle will only carry the action mean");
        }

        Ok(converted)
    }

    /// Compare bundle outputs with libtorch on a seeded random observation
    pub fn verify(
        &self,
        checkpoint: &Checkpoint,
        converted: &ConvertedPolicy,
    ) -> Result<VerificationReport> {
        let cfg = &self.config;
        let input = gaussian_noise(cfg.seed, cfg.input_dim);

        let mut deviations = Vec::with_capacity(2);
        let mut actor_mean = Vec::new();
        for network in [Network::Actor, Network::Critic] {
            let ours = forward(converted.bundle.network(network), &input, cfg.activation)?;
            let reference = reference_forward(
                checkpoint,
                cfg.preset.mapping(network),
                &input,
                cfg.activation,
            )?;
            let deviation = compare(&reference, &ours, cfg.tolerance, cfg.tolerance);

            log::info!(
                "🔬 {} output {:?}: max abs deviation {:.3e}",
                network,
                &ours[..ours.len().min(5)],
                deviation.max_abs
            );
            if !deviation.within_tolerance {
                return Err(ExportError::Verification {
                    network,
                    max_abs: deviation.max_abs,
                });
            }
            if network == Network::Actor {
                actor_mean = ours;
            }
            deviations.push(deviation);
        }

        let sampled_action = match converted.bundle.actor_logstd() {
            Some(logstd) => {
                let noise = gaussian_noise(cfg.seed.wrapping_add(1), actor_mean.len());
                let action = sample_action(&actor_mean, logstd, &noise)?;
                let std = action_std(logstd);
                log::info!("  Actor std: {:?}", &std[..std.len().min(5)]);
                log::info!("  Sampled action: {:?}", &action[..action.len().min(5)]);
                Some(action)
            }
            None => None,
        };

        Ok(VerificationReport {
            actor: deviations[0],
            critic: deviations[1],
            sampled_action,
        })
    }

    /// Convert, optionally verify, then write the bundle
    pub fn export_checkpoint(&self, checkpoint: &Checkpoint) -> Result<ExportSummary> {
        let converted = self.convert(checkpoint)?;

        let verification = if self.config.verify {
            Some(self.verify(checkpoint, &converted)?)
        } else {
            None
        };

        let info = ModelInfo::from_bundle(&converted.bundle, self.config.activation, &self.config.source);
        log::info!("💾 Saving bundle to {}", self.config.output_dir.display());
        let files = write_bundle(&self.config.output_dir, &converted.bundle, &info)?;
        for file in &files {
            log::info!("✅ {}", file.display());
        }

        Ok(ExportSummary {
            checkpoint: self.config.checkpoint_path.clone(),
            output_dir: self.config.output_dir.clone(),
            preset: self.config.preset,
            actor_layers: info.actor_layers,
            critic_layers: info.critic_layers,
            parameters: converted.bundle.parameter_count(),
            files,
            verification,
        })
    }
}

impl Default for WeightExporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary information about a finished export
#[derive(Debug)]
pub struct ExportSummary {
    pub checkpoint: PathBuf,
    pub output_dir: PathBuf,
    pub preset: MappingPreset,
    pub actor_layers: Vec<usize>,
    pub critic_layers: Vec<usize>,
    pub parameters: usize,
    pub files: Vec<PathBuf>,
    pub verification: Option<VerificationReport>,
}

impl fmt::Display for ExportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,
            "Weight Export Summary:\n\
             📂 Checkpoint: {} ({})\n\
             📁 Output: {}\n\
             📐 Actor: {:?}, Critic: {:?}\n\
             🔢 Parameters: {}\n\
             📝 Files: {}",
            self.checkpoint.display(), self.preset,
            self.output_dir.display(),
            self.actor_layers, self.critic_layers,
            self.parameters,
            self.files.len()
        )?;
        match &self.verification {
            Some(v) => write!(f,
                "\n🔬 Max deviation: actor {:.3e}, critic {:.3e}",
                v.actor.max_abs, v.critic.max_abs
            ),
            None => write!(f, "\n🔬 Verification skipped"),
        }
    }
}
