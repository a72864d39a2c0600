//! Static layer mapping tables
//!
//! Each table maps the parameter keys of one checkpoint naming convention onto
//! canonical dense-layer names. Hidden layers are `dense_1`, `dense_2`, ...
//! and the last layer is always `output`, so the exported files look the same
//! whatever framework wrote the checkpoint.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two PPO networks a table describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Actor,
    Critic,
}

impl Network {
    pub fn name(self) -> &'static str {
        match self {
            Network::Actor => "actor",
            Network::Critic => "critic",
        }
    }

    /// File name of this network's exported weights
    pub fn weights_file_name(self) -> String {
        format!("{}_weights.json", self.name())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Role of a parameter inside a dense layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Kernel,
    Bias,
}

impl Role {
    pub fn suffix(self) -> &'static str {
        match self {
            Role::Kernel => "kernel",
            Role::Bias => "bias",
        }
    }
}

/// Exported field name of a layer parameter, e.g. `dense_1_kernel`
pub fn field_name(layer: &str, role: Role) -> String {
    format!("{}_{}", layer, role.suffix())
}

/// One dense layer: canonical name plus the source keys of its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    pub name: &'static str,
    /// Source weight, stored `(out_features, in_features)`
    pub weight_key: &'static str,
    pub bias_key: &'static str,
}

impl LayerSpec {
    /// Exported field name for `role`, e.g. `dense_1_kernel`
    pub fn field(&self, role: Role) -> String {
        field_name(self.name, role)
    }
}

/// A parameter copied through untouched and surfaced as a top-level field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxiliarySpec {
    pub source_key: &'static str,
    pub field: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkMapping {
    pub network: Network,
    /// Layers in forward order, input side first
    pub layers: &'static [LayerSpec],
    pub auxiliary: &'static [AuxiliarySpec],
}

impl NetworkMapping {
    /// The table as flat `(source key, canonical layer, role)` triples
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &'static str, Role)> + '_ {
        self.layers.iter().flat_map(|layer| {
            [
                (layer.weight_key, layer.name, Role::Kernel),
                (layer.bias_key, layer.name, Role::Bias),
            ]
        })
    }

    /// Every source key the table reads, auxiliary keys included
    pub fn source_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries()
            .map(|(key, _, _)| key)
            .chain(self.auxiliary.iter().map(|aux| aux.source_key))
    }
}

pub static CLEANRL_ACTOR: NetworkMapping = NetworkMapping {
    network: Network::Actor,
    layers: &[
        LayerSpec {
            name: "dense_1",
            weight_key: "actor_mean.0.weight",
            bias_key: "actor_mean.0.bias",
        },
        LayerSpec {
            name: "dense_2",
            weight_key: "actor_mean.2.weight",
            bias_key: "actor_mean.2.bias",
        },
        LayerSpec {
            name: "output",
            weight_key: "actor_mean.4.weight",
            bias_key: "actor_mean.4.bias",
        },
    ],
    auxiliary: &[AuxiliarySpec {
        source_key: "actor_logstd",
        field: "actor_logstd",
    }],
};

pub static CLEANRL_CRITIC: NetworkMapping = NetworkMapping {
    network: Network::Critic,
    layers: &[
        LayerSpec {
            name: "dense_1",
            weight_key: "critic.0.weight",
            bias_key: "critic.0.bias",
        },
        LayerSpec {
            name: "dense_2",
            weight_key: "critic.2.weight",
            bias_key: "critic.2.bias",
        },
        LayerSpec {
            name: "output",
            weight_key: "critic.4.weight",
            bias_key: "critic.4.bias",
        },
    ],
    auxiliary: &[],
};

// Stable-Baselines3 `MlpPolicy`: shared extractor trunks plus separate heads.
pub static SB3_ACTOR: NetworkMapping = NetworkMapping {
    network: Network::Actor,
    layers: &[
        LayerSpec {
            name: "dense_1",
            weight_key: "mlp_extractor.policy_net.0.weight",
            bias_key: "mlp_extractor.policy_net.0.bias",
        },
        LayerSpec {
            name: "dense_2",
            weight_key: "mlp_extractor.policy_net.2.weight",
            bias_key: "mlp_extractor.policy_net.2.bias",
        },
        LayerSpec {
            name: "output",
            weight_key: "action_net.weight",
            bias_key: "action_net.bias",
        },
    ],
    auxiliary: &[AuxiliarySpec {
        source_key: "log_std",
        field: "actor_logstd",
    }],
};

pub static SB3_CRITIC: NetworkMapping = NetworkMapping {
    network: Network::Critic,
    layers: &[
        LayerSpec {
            name: "dense_1",
            weight_key: "mlp_extractor.value_net.0.weight",
            bias_key: "mlp_extractor.value_net.0.bias",
        },
        LayerSpec {
            name: "dense_2",
            weight_key: "mlp_extractor.value_net.2.weight",
            bias_key: "mlp_extractor.value_net.2.bias",
        },
        LayerSpec {
            name: "output",
            weight_key: "value_net.weight",
            bias_key: "value_net.bias",
        },
    ],
    auxiliary: &[],
};

/// Checkpoint naming conventions the exporter knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MappingPreset {
    /// CleanRL `ppo_continuous_action` agent
    #[default]
    CleanRl,
    /// Stable-Baselines3 PPO `MlpPolicy`
    StableBaselines3,
}

impl MappingPreset {
    pub const ALL: [MappingPreset; 2] = [MappingPreset::CleanRl, MappingPreset::StableBaselines3];

    pub fn name(self) -> &'static str {
        match self {
            MappingPreset::CleanRl => "clean-rl",
            MappingPreset::StableBaselines3 => "stable-baselines3",
        }
    }

    pub fn actor(self) -> &'static NetworkMapping {
        match self {
            MappingPreset::CleanRl => &CLEANRL_ACTOR,
            MappingPreset::StableBaselines3 => &SB3_ACTOR,
        }
    }

    pub fn critic(self) -> &'static NetworkMapping {
        match self {
            MappingPreset::CleanRl => &CLEANRL_CRITIC,
            MappingPreset::StableBaselines3 => &SB3_CRITIC,
        }
    }

    pub fn mapping(self, network: Network) -> &'static NetworkMapping {
        match network {
            Network::Actor => self.actor(),
            Network::Critic => self.critic(),
        }
    }
}

impl fmt::Display for MappingPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
