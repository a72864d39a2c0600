//! Architecture metadata written next to the weights as `model_info.json`

use serde::{Deserialize, Serialize};

use crate::neural::converter::WeightBundle;
use crate::neural::verifier::Activation;

pub const ARCHITECTURE: &str = "PPO";
pub const FORMAT: &str = "json_weights";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub input_dim: usize,
    pub action_dim: usize,
    /// Width of the first hidden layer (0 when there is none)
    pub hidden_dim: usize,
    pub hidden_dims: Vec<usize>,
    pub architecture: String,
    pub source: String,
    pub actor_layers: Vec<usize>,
    pub critic_layers: Vec<usize>,
    pub activation: Activation,
    pub format: String,
}

impl ModelInfo {
    /// Read the widths off the converted bundle rather than trusting the config
    pub fn from_bundle(bundle: &WeightBundle, activation: Activation, source: &str) -> Self {
        let actor_layers = bundle.actor.widths();
        let critic_layers = bundle.critic.widths();

        let hidden_dims: Vec<usize> = match actor_layers.as_slice() {
            [_, hidden @ .., _] => hidden.to_vec(),
            _ => Vec::new(),
        };

        Self {
            input_dim: actor_layers.first().copied().unwrap_or(0),
            action_dim: actor_layers.last().copied().unwrap_or(0),
            hidden_dim: hidden_dims.first().copied().unwrap_or(0),
            hidden_dims,
            architecture: ARCHITECTURE.to_string(),
            source: source.to_string(),
            actor_layers,
            critic_layers,
            activation,
            format: FORMAT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::converter::convert_policy;
    use crate::neural::layer_mapping::MappingPreset;
    use crate::neural::test_fixtures::{synthetic_checkpoint, HUMANOID_DIMS};
    use serde_json::json;

    #[test]
    fn test_humanoid_metadata() {
        let checkpoint = synthetic_checkpoint(MappingPreset::CleanRl, HUMANOID_DIMS);
        let bundle = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17)
            .unwrap()
            .bundle;

        let info = ModelInfo::from_bundle(&bundle, Activation::Tanh, "CleanRL Humanoid-v4");
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({
                "input_dim": 376,
                "action_dim": 17,
                "hidden_dim": 64,
                "hidden_dims": [64, 64],
                "architecture": "PPO",
                "source": "CleanRL Humanoid-v4",
                "actor_layers": [376, 64, 64, 17],
                "critic_layers": [376, 64, 64, 1],
                "activation": "tanh",
                "format": "json_weights"
            })
        );
    }

    #[test]
    fn test_hidden_widths_follow_the_checkpoint() {
        let checkpoint = synthetic_checkpoint(MappingPreset::CleanRl, (10, 256, 3));
        let bundle = convert_policy(&checkpoint, MappingPreset::CleanRl, 10, 3)
            .unwrap()
            .bundle;

        let info = ModelInfo::from_bundle(&bundle, Activation::Relu, "test");
        assert_eq!(info.hidden_dim, 256);
        assert_eq!(info.actor_layers, vec![10, 256, 256, 3]);
        assert_eq!(info.activation, Activation::Relu);
    }
}
