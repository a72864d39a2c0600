use std::env;
use std::path::Path;

use ppo_weight_export::neural::model_io::load_checkpoint;
use ppo_weight_export::{Checkpoint, DenseArray, MappingPreset};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let default_files = [
        "pretrained_models/ppo_continuous_action.cleanrl_model",
        "pretrained_models/agent.pt",
    ];

    let args: Vec<String> = env::args().skip(1).collect();
    let targets: Vec<String> = if args.is_empty() {
        default_files
            .iter()
            .filter(|p| Path::new(*p).exists())
            .map(|s| s.to_string())
            .collect()
    } else {
        args
    };

    if targets.is_empty() {
        println!("No checkpoint found (pass paths as arguments).");
        return Ok(());
    }

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║                  Checkpoint inspection                     ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");

    for path in targets {
        println!("📁 File: {}", path);
        if !Path::new(&path).exists() {
            println!("  ❌ File not found\n");
            continue;
        }

        if let Ok(metadata) = std::fs::metadata(&path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("  📦 Size: {:.2} KB", size_kb);
            } else {
                println!("  📦 Size: {:.2} MB", size_kb / 1024.0);
            }
        }

        let checkpoint = match load_checkpoint(&path) {
            Ok(c) => c,
            Err(err) => {
                println!("  ❌ Unable to load: {}\n", err);
                continue;
            }
        };

        println!(
            "  🔢 {} tensors, {} parameters\n",
            checkpoint.len(),
            checkpoint.parameter_count()
        );
        for (key, array) in checkpoint.iter() {
            let (min, max, mean) = stats(array);
            println!(
                "  {:<40} [{}]  min={:.4} max={:.4} mean={:.4}",
                key,
                format_shape(array.shape()),
                min,
                max,
                mean
            );
        }

        println!("\n  🧭 Preset coverage:");
        for preset in MappingPreset::ALL {
            print_coverage(&checkpoint, preset);
        }
        println!();
    }

    Ok(())
}

fn format_shape(shape: &[usize]) -> String {
    shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(" × ")
}

fn stats(array: &DenseArray) -> (f32, f32, f32) {
    let values = array.values();
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len() as f64;
    (min, max, mean as f32)
}

fn print_coverage(checkpoint: &Checkpoint, preset: MappingPreset) {
    let required: Vec<&str> = [preset.actor(), preset.critic()]
        .into_iter()
        .flat_map(|mapping| mapping.source_keys())
        .collect();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| !checkpoint.contains(key))
        .collect();

    if missing.is_empty() {
        println!("     ✅ {}: all {} layer parameters present", preset, required.len());
    } else {
        println!(
            "     ⚠️  {}: {}/{} present, missing {:?}",
            preset,
            required.len() - missing.len(),
            required.len(),
            missing
        );
    }
}
