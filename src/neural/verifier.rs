//! Forward pass over a converted bundle
//!
//! Used as a regression oracle: the bundle's output for a fixed input is
//! compared with libtorch running the untouched checkpoint. The stochastic
//! action rule `mean + exp(logstd) * noise` is reproduced with the noise passed
//! in explicitly, so every call stays deterministic.

use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tch::Tensor;

use crate::neural::checkpoint::Checkpoint;
use crate::neural::converter::{ConversionError, NetworkWeights};
use crate::neural::dense::DenseArray;
use crate::neural::layer_mapping::NetworkMapping;
use crate::neural::model_io::dense_to_tensor;
use crate::{ExportError, Result};

/// Hidden-layer activation. The output layer is always linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Tanh,
    Relu,
    Identity,
}

impl Activation {
    pub fn name(self) -> &'static str {
        match self {
            Activation::Tanh => "tanh",
            Activation::Relu => "relu",
            Activation::Identity => "identity",
        }
    }

    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.max(0.0),
            Activation::Identity => x,
        }
    }

    fn apply_tensor(self, x: Tensor) -> Tensor {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.relu(),
            Activation::Identity => x,
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = ExportError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tanh" => Ok(Activation::Tanh),
            "relu" => Ok(Activation::Relu),
            "identity" | "linear" => Ok(Activation::Identity),
            _ => Err(ExportError::UnknownActivation(s.to_string())),
        }
    }
}

/// Run `input` through the bundle's layers.
///
/// Accumulates in f64 so the result does not depend on summation order more
/// than libtorch's own f32 kernels do.
pub fn forward(
    weights: &NetworkWeights,
    input: &[f32],
    activation: Activation,
) -> std::result::Result<Vec<f32>, ConversionError> {
    let mut hidden = input.to_vec();
    let last = weights.layers.len().saturating_sub(1);

    for (index, layer) in weights.layers.iter().enumerate() {
        let (rows, cols) = (layer.in_features(), layer.out_features());
        if hidden.len() != rows {
            return Err(ConversionError::shape_mismatch(
                &layer.name,
                "input",
                vec![Some(rows)],
                &[hidden.len()],
            ));
        }

        if layer.bias.shape() != [cols] {
            return Err(ConversionError::shape_mismatch(
                &layer.name,
                "bias",
                vec![Some(cols)],
                layer.bias.shape(),
            ));
        }

        let mut acc: Vec<f64> = layer.bias.values().iter().map(|&b| f64::from(b)).collect();
        for (i, &h) in hidden.iter().enumerate() {
            let Some(row) = layer.kernel.row(i) else { continue };
            let h = f64::from(h);
            for (a, &w) in acc.iter_mut().zip(row) {
                *a += h * f64::from(w);
            }
        }

        hidden = acc
            .into_iter()
            .map(|v| {
                let v = v as f32;
                if index == last {
                    v
                } else {
                    activation.apply(v)
                }
            })
            .collect();
    }

    Ok(hidden)
}

/// Same network evaluated by libtorch straight from the checkpoint,
/// `h = act(h · Wᵀ + b)`, without going through the bundle's kernels.
pub fn reference_forward(
    checkpoint: &Checkpoint,
    mapping: &NetworkMapping,
    input: &[f32],
    activation: Activation,
) -> Result<Vec<f32>> {
    let mut h = Tensor::from_slice(input).view([1, input.len() as i64]);
    let last = mapping.layers.len().saturating_sub(1);

    for (index, spec) in mapping.layers.iter().enumerate() {
        let weight = checkpoint
            .get(spec.weight_key)
            .ok_or_else(|| ConversionError::MissingParameter {
                key: spec.weight_key.to_string(),
            })?;
        let bias = checkpoint
            .get(spec.bias_key)
            .ok_or_else(|| ConversionError::MissingParameter {
                key: spec.bias_key.to_string(),
            })?;

        let out = h.f_matmul(&dense_to_tensor(weight).tr())? + dense_to_tensor(bias);
        h = if index == last {
            out
        } else {
            activation.apply_tensor(out)
        };
    }

    Ok(Vec::<f32>::try_from(&h.flatten(0, -1))?)
}

/// `exp(logstd)`, flattened
pub fn action_std(logstd: &DenseArray) -> Vec<f32> {
    logstd.values().iter().map(|v| v.exp()).collect()
}

/// Gaussian policy sample `mean + exp(logstd) ⊙ noise`.
///
/// `logstd` may be `(action_dim,)` or `(1, action_dim)`; only its element
/// count has to match.
pub fn sample_action(
    mean: &[f32],
    logstd: &DenseArray,
    noise: &[f32],
) -> std::result::Result<Vec<f32>, ConversionError> {
    if logstd.numel() != mean.len() {
        return Err(ConversionError::shape_mismatch(
            "actor_logstd",
            "actor_logstd",
            vec![Some(mean.len())],
            logstd.shape(),
        ));
    }
    if noise.len() != mean.len() {
        return Err(ConversionError::shape_mismatch(
            "actor_logstd",
            "noise",
            vec![Some(mean.len())],
            &[noise.len()],
        ));
    }

    Ok(mean
        .iter()
        .zip(action_std(logstd))
        .zip(noise)
        .map(|((m, s), n)| m + s * n)
        .collect())
}

/// `dim` standard normal draws from a generator seeded with `seed`
pub fn gaussian_noise(seed: u64, dim: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..dim).map(|_| StandardNormal.sample(&mut rng)).collect()
}

/// Largest element-wise deviation between two outputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Deviation {
    pub max_abs: f32,
    pub max_rel: f32,
    /// Every element satisfies `|a - e| <= atol + rtol * |e|` and lengths match
    pub within_tolerance: bool,
}

pub fn compare(expected: &[f32], actual: &[f32], rtol: f32, atol: f32) -> Deviation {
    let mut deviation = Deviation {
        max_abs: 0.0,
        max_rel: 0.0,
        within_tolerance: expected.len() == actual.len(),
    };

    for (&e, &a) in expected.iter().zip(actual) {
        let abs = (a - e).abs();
        let rel = if e == 0.0 { abs } else { abs / e.abs() };
        deviation.max_abs = deviation.max_abs.max(abs);
        deviation.max_rel = deviation.max_rel.max(rel);
        if !(abs <= atol + rtol * e.abs()) {
            deviation.within_tolerance = false;
        }
    }

    deviation
}
