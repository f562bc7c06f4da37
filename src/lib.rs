//! # eqgraph
//!
//! Permutation-equivariant graph networks over dense graph tensors, built on
//! candle.
//!
//! ## Overview
//!
//! A batch of graphs is a rank-4 tensor `(batch, n, n, features)`: one feature
//! vector per ordered vertex pair, self-pairs included. The crate stacks
//! equivariant blocks over that tensor and reads out predictions at three
//! granularities:
//!
//! - **Backbone**: [`ResScaledModel`]: optional input embedding, a stack of
//!   equivariant blocks with optional residuals, a final 1×1 projection
//! - **Node embedding**: [`NodeEmbedding`], `(batch, n, out_features)`
//! - **Edge embedding**: [`EdgeEmbedding`], `(batch, n, n, out_features)`
//! - **Graph classification**: [`GraphEmbedding`], one logit per graph
//!
//! Relabelling the vertices of the input (permuting both vertex axes the same
//! way) permutes the backbone output identically.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use eqgraph::prelude::*;
//!
//! let device = best_device();
//! let config = ModelConfig::new(2, 3, 16, 8, 2).with_ablation(Ablation::parse("rs")?);
//! let model = NodeEmbedding::new(&config, &device)?;
//!
//! let graphs = Tensor::zeros((4, 10, 10, 2), DType::F32, &device)?;
//! let nodes = model.forward(&graphs)?; // (4, 10, 8)
//! ```
//!
//! ## Feature Flags
//!
//! - `metal`: Apple Metal GPU acceleration
//! - `cuda`: NVIDIA CUDA GPU acceleration

pub mod accelerator;
pub mod checkpoint;
pub mod layers;
pub mod model;
pub mod primitives;
pub mod training;

pub use candle_core::{DType, Device, Tensor, Var};

pub use model::{
    Ablation, EdgeEmbedding, EmbeddingTask, GraphEmbedding, GraphModule, ModelConfig,
    NodeEmbedding, ResScaledModel,
};

/// Error types for graph network operations
#[derive(Debug, thiserror::Error)]
pub enum GraphNetError {
    #[error("expected input feature width {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("vertex axes must match, got {rows}x{cols}")]
    NonSquare { rows: usize, cols: usize },

    #[error("expected a rank-{expected} tensor, got rank {actual}")]
    Rank { expected: usize, actual: usize },

    #[error("embedding category {0} is outside the table")]
    InvalidCategory(f32),

    #[error("Accelerator {0} not recognized")]
    UnsupportedAccelerator(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Tensor operation failed: {0}")]
    Tensor(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for graph network operations
pub type Result<T> = std::result::Result<T, GraphNetError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{GraphNetError, Result};

    pub use crate::primitives::{best_device, cpu_device, gpu_disabled, relu, sigmoid, Pooling};

    pub use crate::model::{
        Ablation, EdgeEmbedding, EmbeddingTask, GraphEmbedding, GraphModule, ModelConfig,
        NodeEmbedding, ResScaledModel,
    };

    pub use crate::layers::{BlockKind, EquivariantBlock};

    pub use crate::accelerator::{Accelerator, AcceleratorConfig};

    pub use crate::training::{
        check_gradients_health, clipped_step, compute_grad_norm, Optimizer, StepOutcome,
    };

    pub use crate::checkpoint::{ensure_dir, ensure_file, load_checkpoint, save_checkpoint};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let device = cpu_device();
        assert!(matches!(device, Device::Cpu));
    }

    #[test]
    fn test_shape_mismatch_message_carries_widths() {
        let err = crate::GraphNetError::ShapeMismatch {
            expected: 2,
            actual: 3,
        };
        assert_eq!(err.to_string(), "expected input feature width 2, got 3");
    }
}
