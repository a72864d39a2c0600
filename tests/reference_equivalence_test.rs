//! The JSON bundle must compute what libtorch computes from the checkpoint

use ppo_weight_export::neural::model_io::{
    dense_from_tensor, dense_to_tensor, load_checkpoint, read_bundle, save_safetensors, save_tch_archive,
    write_bundle,
};
use ppo_weight_export::neural::verifier::{compare, forward, gaussian_noise, reference_forward};
use ppo_weight_export::{convert_policy, Activation, Checkpoint, MappingPreset, ModelInfo, Network};
use tch::{Device, Kind, Tensor};
use tempfile::tempdir;

fn random_checkpoint() -> Checkpoint {
    tch::manual_seed(11);
    let mut checkpoint = Checkpoint::new();
    let preset = MappingPreset::CleanRl;
    for (mapping, output) in [(preset.actor(), 17i64), (preset.critic(), 1)] {
        let widths = [376i64, 64, 64, output];
        for (i, layer) in mapping.layers.iter().enumerate() {
            let weight = Tensor::randn([widths[i + 1], widths[i]], (Kind::Float, Device::Cpu)) * 0.05;
            let bias = Tensor::randn([widths[i + 1]], (Kind::Float, Device::Cpu)) * 0.05;
            checkpoint.insert(layer.weight_key, dense_from_tensor(&weight).unwrap());
            checkpoint.insert(layer.bias_key, dense_from_tensor(&bias).unwrap());
        }
    }
    let logstd = Tensor::zeros([1, 17], (Kind::Float, Device::Cpu));
    checkpoint.insert("actor_logstd", dense_from_tensor(&logstd).unwrap());
    checkpoint
}

#[test]
fn test_bundle_matches_libtorch_for_both_networks() {
    let checkpoint = random_checkpoint();
    let policy = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap();

    for seed in [0, 1, 42] {
        let input = gaussian_noise(seed, 376);
        for network in [Network::Actor, Network::Critic] {
            let ours = forward(policy.bundle.network(network), &input, Activation::Tanh).unwrap();
            let reference = reference_forward(
                &checkpoint,
                MappingPreset::CleanRl.mapping(network),
                &input,
                Activation::Tanh,
            )
            .unwrap();

            let expected_len = if network == Network::Actor { 17 } else { 1 };
            assert_eq!(ours.len(), expected_len);
            let deviation = compare(&reference, &ours, 1e-5, 1e-5);
            assert!(deviation.within_tolerance, "{} seed {}: {:?}", network, seed, deviation);
        }
    }
}

#[test]
fn test_bundle_read_back_from_disk_still_matches() -> std::io::Result<()> {
    let dir = tempdir()?;
    let checkpoint = random_checkpoint();
    let policy = convert_policy(&checkpoint, MappingPreset::CleanRl, 376, 17).unwrap();
    let info = ModelInfo::from_bundle(&policy.bundle, Activation::Tanh, "test");
    write_bundle(dir.path(), &policy.bundle, &info).unwrap();

    let exported = read_bundle(dir.path()).unwrap();
    assert_eq!(exported.bundle, policy.bundle);

    let input = gaussian_noise(3, 376);
    let ours = forward(&exported.bundle.actor, &input, Activation::Tanh).unwrap();
    let reference = reference_forward(
        &checkpoint,
        MappingPreset::CleanRl.actor(),
        &input,
        Activation::Tanh,
    )
    .unwrap();
    assert!(compare(&reference, &ours, 1e-5, 1e-5).within_tolerance);
    Ok(())
}

#[test]
fn test_archive_and_safetensors_load_identically() -> std::io::Result<()> {
    let dir = tempdir()?;
    let checkpoint = random_checkpoint();
    let archive = dir.path().join("agent.ot");
    let safetensors = dir.path().join("agent.safetensors");
    save_tch_archive(&checkpoint, &archive).unwrap();
    save_safetensors(&checkpoint, &safetensors).unwrap();

    let from_archive = load_checkpoint(&archive).unwrap();
    let from_safetensors = load_checkpoint(&safetensors).unwrap();
    assert_eq!(from_archive, checkpoint);
    assert_eq!(from_safetensors, checkpoint);
    Ok(())
}

#[test]
fn test_npz_loads_like_the_source_checkpoint() -> std::io::Result<()> {
    let dir = tempdir()?;
    let checkpoint = random_checkpoint();
    let path = dir.path().join("agent.npz");
    let named: Vec<(String, Tensor)> = checkpoint
        .iter()
        .map(|(name, array)| (name.to_string(), dense_to_tensor(array)))
        .collect();
    Tensor::write_npz(&named, &path).unwrap();

    assert_eq!(load_checkpoint(&path).unwrap(), checkpoint);
    Ok(())
}

// `.pt` / `.cleanrl_model` files go through `Tensor::loadz_multi`, which reads
// Python `torch.save` zip archives. tch cannot write that format, so that
// branch is only exercised against real downloaded checkpoints.
