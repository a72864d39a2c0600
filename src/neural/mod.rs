pub mod checkpoint;
pub mod converter;
pub mod dense;
pub mod layer_mapping;
pub mod manager;
pub mod model_info;
pub mod model_io;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export key components for convenience
pub use checkpoint::Checkpoint;
pub use converter::{
    convert, convert_policy, ConversionError, ConvertedPolicy, LayerReport, NetworkWeights,
    WeightBundle,
};
pub use dense::DenseArray;
pub use layer_mapping::{MappingPreset, Network};
pub use manager::{ExportConfig, ExportSummary, WeightExporter};
pub use model_info::ModelInfo;
pub use verifier::Activation;
