//! Checkpoint loading and bundle file I/O
//!
//! Checkpoints are read through libtorch for PyTorch's own formats and through
//! the safetensors crate for `.safetensors` files, so a checkpoint can be
//! converted without a matching libtorch build. Bundles are plain JSON.

use safetensors::serialize_to_file;
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tch::{Device, Kind, Tensor};

use crate::neural::checkpoint::Checkpoint;
use crate::neural::converter::{
    ConversionError, DenseLayer, NetworkWeights, WeightBundle, ACTOR_LOGSTD_FIELD,
};
use crate::neural::dense::DenseArray;
use crate::neural::layer_mapping::{field_name, MappingPreset, Network, Role};
use crate::neural::model_info::ModelInfo;
use crate::{ExportError, Result};

pub const MODEL_INFO_FILE: &str = "model_info.json";

/// On-disk checkpoint formats, picked by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// `.safetensors`
    SafeTensors,
    /// `.npz`, numpy archive of named arrays
    Npz,
    /// `.ot`, archive written by `Tensor::save_multi`
    TorchArchive,
    /// Anything else: a state dict written by Python's `torch.save`
    TorchZip,
}

impl CheckpointFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("safetensors") => CheckpointFormat::SafeTensors,
            Some("npz") => CheckpointFormat::Npz,
            Some("ot") => CheckpointFormat::TorchArchive,
            _ => CheckpointFormat::TorchZip,
        }
    }
}

/// Load every floating-point parameter of a checkpoint file
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Checkpoint> {
    let path = path.as_ref();
    let format = CheckpointFormat::from_path(path);
    log::debug!("Loading checkpoint {} as {:?}", path.display(), format);

    match format {
        CheckpointFormat::SafeTensors => load_safetensors(path),
        CheckpointFormat::Npz => checkpoint_from_tensors(Tensor::read_npz(path)?),
        CheckpointFormat::TorchArchive => checkpoint_from_tensors(Tensor::load_multi(path)?),
        CheckpointFormat::TorchZip => checkpoint_from_tensors(Tensor::loadz_multi(path)?),
    }
}

/// Build a checkpoint from named libtorch tensors.
///
/// Integer and boolean tensors (step counters and the like) cannot be layer
/// parameters and are skipped.
pub fn checkpoint_from_tensors(named: Vec<(String, Tensor)>) -> Result<Checkpoint> {
    let mut checkpoint = Checkpoint::new();
    for (name, tensor) in named {
        match dense_from_tensor(&tensor) {
            Ok(array) => {
                checkpoint.insert(name, array);
            }
            Err(ExportError::UnsupportedDtype { dtype, .. }) => {
                log::warn!("⚠️ Skipping `{}`: {} is not a floating-point type", name, dtype);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(checkpoint)
}

pub fn dense_from_tensor(tensor: &Tensor) -> Result<DenseArray> {
    let kind = tensor.kind();
    match kind {
        Kind::Float | Kind::Half | Kind::BFloat16 => {}
        Kind::Double => log::warn!("⚠️ Narrowing a float64 tensor to float32"),
        other => {
            return Err(ExportError::UnsupportedDtype {
                dtype: format!("{:?}", other),
            })
        }
    }

    let shape: Vec<usize> = tensor.size().iter().map(|&x| x as usize).collect();
    let flat = tensor
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .flatten(0, -1)
        .contiguous();
    let values = Vec::<f32>::try_from(&flat)?;

    Ok(DenseArray::new(shape, values)?)
}

pub fn dense_to_tensor(array: &DenseArray) -> Tensor {
    let shape: Vec<i64> = array.shape().iter().map(|&x| x as i64).collect();
    Tensor::from_slice(array.values()).reshape(&shape)
}

/// Save a checkpoint as `.safetensors`
pub fn save_safetensors(checkpoint: &Checkpoint, path: impl AsRef<Path>) -> Result<()> {
    let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = checkpoint
        .iter()
        .map(|(name, array)| {
            let bytes = array.values().iter().flat_map(|x| x.to_le_bytes()).collect();
            (name.to_string(), array.shape().to_vec(), bytes)
        })
        .collect();

    let mut views = Vec::with_capacity(buffers.len());
    for (name, shape, bytes) in &buffers {
        views.push((name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes)?));
    }

    serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}

/// Save a checkpoint with `Tensor::save_multi`, readable as `.ot`
pub fn save_tch_archive(checkpoint: &Checkpoint, path: impl AsRef<Path>) -> Result<()> {
    let named: Vec<(String, Tensor)> = checkpoint
        .iter()
        .map(|(name, array)| (name.to_string(), dense_to_tensor(array)))
        .collect();
    Tensor::save_multi(&named, path.as_ref())?;
    Ok(())
}

pub fn load_safetensors(path: impl AsRef<Path>) -> Result<Checkpoint> {
    let buffer = fs::read(path.as_ref())?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut checkpoint = Checkpoint::new();
    for (name, view) in tensors.tensors() {
        match tensor_view_to_dense(&view) {
            Ok(array) => {
                checkpoint.insert(name, array);
            }
            Err(ExportError::UnsupportedDtype { dtype }) => {
                log::warn!("⚠️ Skipping `{}`: unsupported dtype {}", name, dtype);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(checkpoint)
}

fn tensor_view_to_dense(view: &TensorView) -> Result<DenseArray> {
    let shape = view.shape().to_vec();
    let data = view.data();

    let values: Vec<f32> = match view.dtype() {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
        Dtype::F64 => {
            log::warn!("⚠️ Narrowing a float64 tensor to float32");
            data.chunks_exact(8)
                .map(|chunk| {
                    f64::from_le_bytes([
                        chunk[0], chunk[1], chunk[2], chunk[3],
                        chunk[4], chunk[5], chunk[6], chunk[7],
                    ]) as f32
                })
                .collect()
        }
        other => {
            return Err(ExportError::UnsupportedDtype {
                dtype: format!("{:?}", other),
            })
        }
    };

    Ok(DenseArray::new(shape, values)?)
}

/// `{ "shape": [...], "values": [...] }` document for an auxiliary array
#[derive(Debug, Serialize, Deserialize)]
struct AuxiliaryDocument {
    shape: Vec<usize>,
    values: DenseArray,
}

/// Write the bundle and its metadata into `dir`.
///
/// Every document is serialized before anything touches the disk, and the
/// files are first written as `.tmp` siblings and only renamed into place once
/// all of them were written. A failure leaves no partial bundle behind.
pub fn write_bundle(
    dir: impl AsRef<Path>,
    bundle: &WeightBundle,
    info: &ModelInfo,
) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();

    let mut documents: Vec<(PathBuf, Vec<u8>)> = vec![
        (
            dir.join(Network::Actor.weights_file_name()),
            serde_json::to_vec(&bundle.actor)?,
        ),
        (
            dir.join(Network::Critic.weights_file_name()),
            serde_json::to_vec(&bundle.critic)?,
        ),
    ];
    for (field, array) in &bundle.auxiliary {
        let document = AuxiliaryDocument {
            shape: array.shape().to_vec(),
            values: array.clone(),
        };
        documents.push((dir.join(format!("{}.json", field)), serde_json::to_vec(&document)?));
    }
    documents.push((dir.join(MODEL_INFO_FILE), serde_json::to_vec_pretty(info)?));

    fs::create_dir_all(dir)?;

    let mut staged: Vec<PathBuf> = Vec::with_capacity(documents.len());
    for (path, bytes) in &documents {
        let tmp = path.with_extension("json.tmp");
        if let Err(err) = fs::write(&tmp, bytes) {
            staged.push(tmp);
            for leftover in &staged {
                let _ = fs::remove_file(leftover);
            }
            return Err(err.into());
        }
        staged.push(tmp);
    }

    for (index, (tmp, (path, _))) in staged.iter().zip(&documents).enumerate() {
        if let Err(err) = fs::rename(tmp, path) {
            for leftover in &staged[index..] {
                let _ = fs::remove_file(leftover);
            }
            return Err(err.into());
        }
    }

    // A previous export into the same directory may have carried auxiliary
    // arrays this bundle does not have.
    for field in declared_auxiliary_fields() {
        if !bundle.auxiliary.contains_key(field) {
            let stale = dir.join(format!("{}.json", field));
            if stale.exists() {
                log::warn!("⚠️ Removing stale {}", stale.display());
                fs::remove_file(&stale)?;
            }
        }
    }

    Ok(documents.into_iter().map(|(path, _)| path).collect())
}

/// Auxiliary field names any preset can emit
fn declared_auxiliary_fields() -> BTreeSet<&'static str> {
    MappingPreset::ALL
        .iter()
        .flat_map(|preset| [preset.actor(), preset.critic()])
        .flat_map(|mapping| mapping.auxiliary.iter().map(|aux| aux.field))
        .collect()
}

/// Bundle files read back from disk
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedBundle {
    pub bundle: WeightBundle,
    pub info: ModelInfo,
}

/// Read a bundle previously written by [`write_bundle`]
pub fn read_bundle(dir: impl AsRef<Path>) -> Result<ExportedBundle> {
    let dir = dir.as_ref();

    let actor = read_network(dir, Network::Actor)?;
    let critic = read_network(dir, Network::Critic)?;

    let mut auxiliary = BTreeMap::new();
    let logstd_path = dir.join(format!("{}.json", ACTOR_LOGSTD_FIELD));
    if logstd_path.exists() {
        let document: AuxiliaryDocument = serde_json::from_slice(&fs::read(&logstd_path)?)?;
        let array = DenseArray::new(document.shape, document.values.into_values())?;
        auxiliary.insert(ACTOR_LOGSTD_FIELD.to_string(), array);
    }

    let info: ModelInfo = serde_json::from_slice(&fs::read(dir.join(MODEL_INFO_FILE))?)?;

    Ok(ExportedBundle {
        bundle: WeightBundle {
            actor,
            critic,
            auxiliary,
        },
        info,
    })
}

fn read_network(dir: &Path, network: Network) -> Result<NetworkWeights> {
    let bytes = fs::read(dir.join(network.weights_file_name()))?;
    let fields: Map<String, Value> = serde_json::from_slice(&bytes)?;
    network_from_fields(network, &fields)
}

/// Rebuild layers from `dense_<n>_kernel` / `dense_<n>_bias` / `output_*` fields
fn network_from_fields(network: Network, fields: &Map<String, Value>) -> Result<NetworkWeights> {
    let mut names: Vec<String> = (1..)
        .map(|n| format!("dense_{}", n))
        .take_while(|name| fields.contains_key(&field_name(name, Role::Kernel)))
        .collect();
    names.push("output".to_string());

    let mut layers = Vec::with_capacity(names.len());
    for name in names {
        let kernel_field = field_name(&name, Role::Kernel);
        let bias_field = field_name(&name, Role::Bias);
        let kernel = field_array(fields, &kernel_field)?;
        let bias = field_array(fields, &bias_field)?;

        let out_features = match kernel.shape() {
            [_, cols] => *cols,
            shape => {
                return Err(ConversionError::shape_mismatch(
                    &name,
                    &kernel_field,
                    vec![None, None],
                    shape,
                )
                .into())
            }
        };
        if bias.shape() != [out_features] {
            return Err(ConversionError::shape_mismatch(
                &name,
                &bias_field,
                vec![Some(out_features)],
                bias.shape(),
            )
            .into());
        }

        layers.push(DenseLayer { name, kernel, bias });
    }

    Ok(NetworkWeights { network, layers })
}

fn field_array(fields: &Map<String, Value>, key: &str) -> Result<DenseArray> {
    let value = fields
        .get(key)
        .ok_or_else(|| ConversionError::MissingParameter {
            key: key.to_string(),
        })?;
    Ok(DenseArray::from_json_value(value)?)
}
