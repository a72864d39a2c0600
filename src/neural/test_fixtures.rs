//! Deterministic checkpoints for unit tests

use crate::neural::checkpoint::Checkpoint;
use crate::neural::dense::DenseArray;
use crate::neural::layer_mapping::MappingPreset;

/// (input, hidden, action) widths of the CleanRL Humanoid-v4 agent
pub const HUMANOID_DIMS: (usize, usize, usize) = (376, 64, 17);

/// Smooth pseudo-random values in roughly [-0.1, 0.1]
fn filled(shape: Vec<usize>, salt: usize) -> DenseArray {
    let len: usize = shape.iter().product();
    let values = (0..len)
        .map(|k| ((k * 31 + salt * 17) as f32 * 0.618).sin() * 0.1)
        .collect();
    DenseArray::new(shape, values).unwrap()
}

/// A full two-hidden-layer checkpoint named after `preset`
pub fn synthetic_checkpoint(preset: MappingPreset, dims: (usize, usize, usize)) -> Checkpoint {
    let (input, hidden, action) = dims;
    let mut checkpoint = Checkpoint::new();

    for (mapping, output) in [(preset.actor(), action), (preset.critic(), 1)] {
        let widths = [input, hidden, hidden, output];
        for (i, layer) in mapping.layers.iter().enumerate() {
            let (fan_in, fan_out) = (widths[i], widths[i + 1]);
            checkpoint.insert(layer.weight_key, filled(vec![fan_out, fan_in], checkpoint.len()));
            checkpoint.insert(layer.bias_key, filled(vec![fan_out], checkpoint.len()));
        }
    }

    let logstd_shape = match preset {
        MappingPreset::CleanRl => vec![1, action],
        MappingPreset::StableBaselines3 => vec![action],
    };
    for aux in preset.actor().auxiliary {
        checkpoint.insert(aux.source_key, filled(logstd_shape.clone(), 99));
    }

    checkpoint
}
