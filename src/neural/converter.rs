//! Checkpoint to weight bundle conversion
//!
//! The only numerical change is the kernel transpose: the checkpoint stores
//! dense weights as `(out_features, in_features)` while the bundle stores
//! `(in_features, out_features)`. Biases and auxiliary parameters are copied
//! bit-for-bit.
//!
//! Conversion is all-or-nothing per network. Every key is looked up and every
//! shape checked before the network is returned, and nothing here touches the
//! filesystem or the logger; callers report the returned `LayerReport`s.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::neural::checkpoint::Checkpoint;
use crate::neural::dense::DenseArray;
use crate::neural::layer_mapping::{
    field_name, LayerSpec, MappingPreset, Network, NetworkMapping, Role,
};

/// Output width of the value head
pub const VALUE_OUTPUT_DIM: usize = 1;

/// Field name of the Gaussian log-standard-deviation in the bundle
pub const ACTOR_LOGSTD_FIELD: &str = "actor_logstd";

/// A shape with some axes left open, printed as `[?, 376]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedShape(pub Vec<Option<usize>>);

impl fmt::Display for ExpectedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, axis) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match axis {
                Some(len) => write!(f, "{}", len)?,
                None => f.write_str("?")?,
            }
        }
        f.write_str("]")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("missing parameter `{key}`")]
    MissingParameter { key: String },

    #[error("shape mismatch in layer `{layer}` for `{parameter}`: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        layer: String,
        parameter: String,
        expected: ExpectedShape,
        actual: Vec<usize>,
    },
}

impl ConversionError {
    pub(crate) fn shape_mismatch(
        layer: &str,
        parameter: &str,
        expected: Vec<Option<usize>>,
        actual: &[usize],
    ) -> Self {
        ConversionError::ShapeMismatch {
            layer: layer.to_string(),
            parameter: parameter.to_string(),
            expected: ExpectedShape(expected),
            actual: actual.to_vec(),
        }
    }
}

/// Declared outer widths of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkDims {
    pub input_dim: usize,
    pub output_dim: usize,
}

/// A dense layer in bundle orientation
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    pub name: String,
    /// `(in_features, out_features)`
    pub kernel: DenseArray,
    /// `(out_features,)`
    pub bias: DenseArray,
}

impl DenseLayer {
    pub fn in_features(&self) -> usize {
        self.kernel.shape().first().copied().unwrap_or(0)
    }

    pub fn out_features(&self) -> usize {
        self.kernel.shape().get(1).copied().unwrap_or(0)
    }
}

/// Converted layers of one network, input side first
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkWeights {
    pub network: Network,
    pub layers: Vec<DenseLayer>,
}

impl NetworkWeights {
    /// Layer widths including input and output, e.g. `[376, 64, 64, 17]`
    pub fn widths(&self) -> Vec<usize> {
        let mut widths = Vec::with_capacity(self.layers.len() + 1);
        if let Some(first) = self.layers.first() {
            widths.push(first.in_features());
        }
        widths.extend(self.layers.iter().map(DenseLayer::out_features));
        widths
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.kernel.numel() + l.bias.numel())
            .sum()
    }
}

/// Serialized as one flat object: `dense_1_kernel`, `dense_1_bias`, ...,
/// `output_kernel`, `output_bias`.
impl Serialize for NetworkWeights {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.layers.len() * 2))?;
        for layer in &self.layers {
            map.serialize_entry(&field_name(&layer.name, Role::Kernel), &layer.kernel)?;
            map.serialize_entry(&field_name(&layer.name, Role::Bias), &layer.bias)?;
        }
        map.end()
    }
}

/// What happened to one layer during conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerReport {
    pub network: Network,
    pub layer: String,
    pub source_key: String,
    pub source_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
}

impl fmt::Display for LayerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}/{}: {:?} -> {:?}",
            self.source_key, self.network, self.layer, self.source_shape, self.output_shape
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedNetwork {
    pub weights: NetworkWeights,
    /// Auxiliary arrays keyed by their bundle field name
    pub auxiliary: BTreeMap<String, DenseArray>,
    pub report: Vec<LayerReport>,
}

/// Actor and critic weights plus the top-level auxiliary arrays
#[derive(Debug, Clone, PartialEq)]
pub struct WeightBundle {
    pub actor: NetworkWeights,
    pub critic: NetworkWeights,
    pub auxiliary: BTreeMap<String, DenseArray>,
}

impl WeightBundle {
    pub fn network(&self, network: Network) -> &NetworkWeights {
        match network {
            Network::Actor => &self.actor,
            Network::Critic => &self.critic,
        }
    }

    pub fn actor_logstd(&self) -> Option<&DenseArray> {
        self.auxiliary.get(ACTOR_LOGSTD_FIELD)
    }

    pub fn parameter_count(&self) -> usize {
        self.actor.parameter_count()
            + self.critic.parameter_count()
            + self.auxiliary.values().map(DenseArray::numel).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedPolicy {
    pub bundle: WeightBundle,
    pub report: Vec<LayerReport>,
}

fn lookup<'a>(checkpoint: &'a Checkpoint, key: &str) -> Result<&'a DenseArray, ConversionError> {
    checkpoint
        .get(key)
        .ok_or_else(|| ConversionError::MissingParameter {
            key: key.to_string(),
        })
}

fn convert_layer(
    checkpoint: &Checkpoint,
    network: Network,
    spec: &LayerSpec,
    in_features: usize,
    output_dim: Option<usize>,
) -> Result<(DenseLayer, LayerReport), ConversionError> {
    let weight = lookup(checkpoint, spec.weight_key)?;
    let bias = lookup(checkpoint, spec.bias_key)?;

    let out_features = match weight.shape() {
        [out, inp] if *inp == in_features => *out,
        shape => {
            return Err(ConversionError::shape_mismatch(
                spec.name,
                spec.weight_key,
                vec![output_dim, Some(in_features)],
                shape,
            ))
        }
    };
    if let Some(expected) = output_dim {
        if out_features != expected {
            return Err(ConversionError::shape_mismatch(
                spec.name,
                spec.weight_key,
                vec![Some(expected), Some(in_features)],
                weight.shape(),
            ));
        }
    }
    if bias.shape() != [out_features] {
        return Err(ConversionError::shape_mismatch(
            spec.name,
            spec.bias_key,
            vec![Some(out_features)],
            bias.shape(),
        ));
    }

    let kernel = weight.transpose().map_err(|_| {
        ConversionError::shape_mismatch(spec.name, spec.weight_key, vec![None, None], weight.shape())
    })?;

    let report = LayerReport {
        network,
        layer: spec.name.to_string(),
        source_key: spec.weight_key.to_string(),
        source_shape: weight.shape().to_vec(),
        output_shape: kernel.shape().to_vec(),
    };
    let layer = DenseLayer {
        name: spec.name.to_string(),
        kernel,
        bias: bias.clone(),
    };
    Ok((layer, report))
}

/// Convert one network of `checkpoint` following `mapping`.
///
/// The first layer must accept `dims.input_dim` inputs, every following layer
/// must accept the previous layer's outputs, and the last layer must produce
/// `dims.output_dim` outputs.
pub fn convert(
    checkpoint: &Checkpoint,
    mapping: &NetworkMapping,
    dims: NetworkDims,
) -> Result<ConvertedNetwork, ConversionError> {
    let mut layers = Vec::with_capacity(mapping.layers.len());
    let mut report = Vec::with_capacity(mapping.layers.len());
    let mut in_features = dims.input_dim;
    let last = mapping.layers.len().saturating_sub(1);

    for (index, spec) in mapping.layers.iter().enumerate() {
        let output_dim = (index == last).then_some(dims.output_dim);
        let (layer, layer_report) =
            convert_layer(checkpoint, mapping.network, spec, in_features, output_dim)?;
        in_features = layer.out_features();
        layers.push(layer);
        report.push(layer_report);
    }

    // Optional: a checkpoint without a logstd still has a usable mean network.
    let auxiliary = mapping
        .auxiliary
        .iter()
        .filter_map(|aux| {
            checkpoint
                .get(aux.source_key)
                .map(|array| (aux.field.to_string(), array.clone()))
        })
        .collect();

    Ok(ConvertedNetwork {
        weights: NetworkWeights {
            network: mapping.network,
            layers,
        },
        auxiliary,
        report,
    })
}

/// Convert the actor and the critic of a PPO checkpoint.
///
/// The two networks are independent and are converted in parallel. If both
/// fail the actor's error is returned.
pub fn convert_policy(
    checkpoint: &Checkpoint,
    preset: MappingPreset,
    input_dim: usize,
    action_dim: usize,
) -> Result<ConvertedPolicy, ConversionError> {
    let (actor, critic) = rayon::join(
        || {
            convert(
                checkpoint,
                preset.actor(),
                NetworkDims {
                    input_dim,
                    output_dim: action_dim,
                },
            )
        },
        || {
            convert(
                checkpoint,
                preset.critic(),
                NetworkDims {
                    input_dim,
                    output_dim: VALUE_OUTPUT_DIM,
                },
            )
        },
    );
    let (actor, critic) = (actor?, critic?);

    let mut auxiliary = actor.auxiliary;
    auxiliary.extend(critic.auxiliary);

    let mut report = actor.report;
    report.extend(critic.report);

    Ok(ConvertedPolicy {
        bundle: WeightBundle {
            actor: actor.weights,
            critic: critic.weights,
            auxiliary,
        },
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::test_fixtures::{synthetic_checkpoint, HUMANOID_DIMS};
    use assert_matches::assert_matches;

    fn humanoid_checkpoint() -> Checkpoint {
        synthetic_checkpoint(MappingPreset::CleanRl, HUMANOID_DIMS)
    }

    #[test]
    fn test_humanoid_actor_shapes() {
        let checkpoint = humanoid_checkpoint();
        let converted = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap();
        let actor = &converted.bundle.actor;

        let shapes: Vec<(&str, &[usize], &[usize])> = actor
            .layers
            .iter()
            .map(|l| (l.name.as_str(), l.kernel.shape(), l.bias.shape()))
            .collect();
        assert_eq!(
            shapes,
            vec![
                ("dense_1", &[376, 64][..], &[64][..]),
                ("dense_2", &[64, 64][..], &[64][..]),
                ("output", &[64, 17][..], &[17][..]),
            ]
        );
        assert_eq!(actor.widths(), vec![376, 64, 64, 17]);
        assert_eq!(converted.bundle.critic.widths(), vec![376, 64, 64, 1]);
    }

    #[test]
    fn test_kernels_are_transposed_sources() {
        let checkpoint = humanoid_checkpoint();
        let converted = convert(
            &checkpoint,
            MappingPreset::CleanRl.critic(),
            NetworkDims {
                input_dim: 376,
                output_dim: 1,
            },
        )
        .unwrap();

        let specs = MappingPreset::CleanRl.critic().layers;
        for (spec, layer) in specs.iter().zip(&converted.weights.layers) {
            let source = checkpoint.get(spec.weight_key).unwrap();
            let (out, inp) = (source.shape()[0], source.shape()[1]);
            assert_eq!(layer.kernel.shape(), &[inp, out]);
            for o in 0..out {
                for i in 0..inp {
                    assert_eq!(
                        layer.kernel.values()[i * out + o].to_bits(),
                        source.values()[o * inp + i].to_bits()
                    );
                }
            }
            assert_eq!(&layer.bias, checkpoint.get(spec.bias_key).unwrap());
        }
    }

    #[test]
    fn test_layers_chain() {
        let checkpoint = humanoid_checkpoint();
        let converted = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap();
        for weights in [&converted.bundle.actor, &converted.bundle.critic] {
            for pair in weights.layers.windows(2) {
                assert_eq!(pair[0].out_features(), pair[1].in_features());
            }
            for layer in &weights.layers {
                assert_eq!(layer.out_features(), layer.bias.shape()[0]);
            }
        }
    }

    #[test]
    fn test_missing_output_bias_is_named() {
        let mut checkpoint = humanoid_checkpoint();
        checkpoint.remove("actor_mean.4.bias");

        let err = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap_err();
        assert_eq!(
            err,
            ConversionError::MissingParameter {
                key: "actor_mean.4.bias".to_string()
            }
        );
        assert_eq!(err.to_string(), "missing parameter `actor_mean.4.bias`");
    }

    #[test]
    fn test_chain_mismatch_reports_both_shapes() {
        let mut checkpoint = humanoid_checkpoint();
        checkpoint.insert(
            "critic.2.weight",
            DenseArray::new(vec![64, 32], vec![0.0; 64 * 32]).unwrap(),
        );

        let err = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap_err();
        assert_matches!(
            &err,
            ConversionError::ShapeMismatch { layer, parameter, expected, actual }
                if layer == "dense_2"
                && parameter == "critic.2.weight"
                && expected == &ExpectedShape(vec![None, Some(64)])
                && actual == &vec![64, 32]
        );
        assert_eq!(
            err.to_string(),
            "shape mismatch in layer `dense_2` for `critic.2.weight`: expected [?, 64], got [64, 32]"
        );
    }

    #[test]
    fn test_wrong_input_dim_is_rejected() {
        let checkpoint = humanoid_checkpoint();
        let err = convert_policy(&checkpoint, MappingPreset::CleanRl, 348, 17).unwrap_err();
        assert_matches!(err, ConversionError::ShapeMismatch { ref layer, .. } if layer == "dense_1");
    }

    #[test]
    fn test_wrong_action_dim_is_rejected() {
        let checkpoint = humanoid_checkpoint();
        let err = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 21).unwrap_err();
        assert_eq!(
            err,
            ConversionError::shape_mismatch(
                "output",
                "actor_mean.4.weight",
                vec![Some(21), Some(64)],
                &[17, 64]
            )
        );
    }

    #[test]
    fn test_bias_length_must_match_outputs() {
        let mut checkpoint = humanoid_checkpoint();
        checkpoint.insert("actor_mean.0.bias", DenseArray::vector(vec![0.0; 63]));

        let err = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap_err();
        assert_eq!(
            err,
            ConversionError::shape_mismatch("dense_1", "actor_mean.0.bias", vec![Some(64)], &[63])
        );
    }

    #[test]
    fn test_weight_must_be_two_dimensional() {
        let mut checkpoint = humanoid_checkpoint();
        checkpoint.insert("critic.0.weight", DenseArray::vector(vec![0.0; 376]));

        let err = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap_err();
        assert_matches!(
            err,
            ConversionError::ShapeMismatch { ref actual, .. } if actual == &vec![376]
        );
    }

    #[test]
    fn test_logstd_is_copied_unchanged() {
        let checkpoint = humanoid_checkpoint();
        let converted = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap();

        assert_eq!(
            converted.bundle.actor_logstd(),
            checkpoint.get("actor_logstd")
        );
        assert_eq!(converted.bundle.actor_logstd().unwrap().shape(), &[1, 17]);
    }

    #[test]
    fn test_logstd_is_optional() {
        let mut checkpoint = humanoid_checkpoint();
        checkpoint.remove("actor_logstd");

        let converted = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap();
        assert!(converted.bundle.actor_logstd().is_none());
        assert!(converted.bundle.auxiliary.is_empty());
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let checkpoint = humanoid_checkpoint();
        let first = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap();
        let second = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first.bundle.actor).unwrap(),
            serde_json::to_string(&second.bundle.actor).unwrap()
        );
    }

    #[test]
    fn test_report_covers_every_layer_in_order() {
        let checkpoint = humanoid_checkpoint();
        let converted = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap();

        let lines: Vec<String> = converted.report.iter().map(|r| r.to_string()).collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "actor_mean.0.weight -> actor/dense_1: [64, 376] -> [376, 64]");
        assert_eq!(lines[5], "critic.4.weight -> critic/output: [1, 64] -> [64, 1]");
    }

    #[test]
    fn test_serialized_field_names() {
        let checkpoint = humanoid_checkpoint();
        let converted = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap();

        let value = serde_json::to_value(&converted.bundle.actor).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "dense_1_bias",
                "dense_1_kernel",
                "dense_2_bias",
                "dense_2_kernel",
                "output_bias",
                "output_kernel"
            ]
        );
    }

    #[test]
    fn test_stable_baselines_preset() {
        let checkpoint = synthetic_checkpoint(MappingPreset::StableBaselines3, HUMANOID_DIMS);
        assert!(checkpoint.contains("log_std"));

        let converted =
            convert_policy(&checkpoint, MappingPreset::StableBaselines3, 376, 17).unwrap();
        assert_eq!(converted.bundle.actor.widths(), vec![376, 64, 64, 17]);
        assert_eq!(converted.bundle.actor_logstd(), checkpoint.get("log_std"));
    }
}
