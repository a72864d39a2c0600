//! # PPO Weight Export Library
//!
//! Converts a pre-trained PPO agent for the humanoid control task into a
//! framework-independent JSON weight bundle that a browser-side runtime can
//! load to rebuild the same actor and critic networks.
//!
//! ## Features
//!
//! - **Converter**: maps checkpoint parameter names onto canonical dense layers
//!   and transposes kernels to `(in_features, out_features)`
//! - **Verifier**: runs the converted bundle and checks it against libtorch
//! - **Model I/O**: PyTorch, numpy and safetensors checkpoints in, JSON out
//! - **Hub**: downloads the pre-trained CleanRL agent
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ppo_weight_export::{ExportConfig, WeightExporter};
//!
//! let summary = WeightExporter::with_config(ExportConfig::default()).run()?;
//! println!("{}", summary);
//! # Ok::<(), ppo_weight_export::ExportError>(())
//! ```

// ============================================================================
// PUBLIC API MODULES
// ============================================================================

/// Checkpoint conversion, verification and file I/O
pub mod neural;

/// Pre-trained model download
pub mod hub;

/// Logger setup shared by the binaries
pub mod logging;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use neural::*;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Main error type for the export library
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Conversion error: {0}")]
    Conversion(#[from] neural::converter::ConversionError),

    #[error("Array error: {0}")]
    InvalidArray(#[from] neural::dense::ArrayError),

    #[error("Unsupported tensor dtype: {dtype}")]
    UnsupportedDtype { dtype: String },

    #[error("Verification failed for {network}: max deviation {max_abs:e} exceeds tolerance")]
    Verification { network: Network, max_abs: f32 },

    #[error("Unknown activation: {0}")]
    UnknownActivation(String),

    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("Safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Download error: {0}")]
    Download(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ExportError>;

// ============================================================================
// LIBRARY VERSION INFO
// ============================================================================

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
