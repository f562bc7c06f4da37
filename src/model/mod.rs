//! Equivariant Graph Models
//!
//! The backbone and the three readout heads, all driven by one
//! [`ModelConfig`].
//!
//! ## Submodules
//!
//! - [`config`]: [`ModelConfig`] and [`Ablation`] flags
//! - [`backbone`]: [`ResScaledModel`], the residual block stack
//! - [`heads`]: [`NodeEmbedding`], [`EdgeEmbedding`], [`GraphEmbedding`]

pub mod backbone;
pub mod config;
pub mod heads;

pub use backbone::{ResScaledModel, EMBEDDING_CATEGORIES};
pub use config::{Ablation, ModelConfig};
pub use heads::{EdgeEmbedding, GraphEmbedding, NodeEmbedding};

use crate::Result;
use candle_core::{Device, Tensor, Var};
use serde::{Deserialize, Serialize};

/// A trainable model over `(batch, n, n, features)` graph tensors
pub trait GraphModule: std::fmt::Debug {
    /// Run the model on a graph batch
    fn forward(&self, x: &Tensor) -> Result<Tensor>;

    /// Every parameter with a stable dotted name, in construction order
    fn named_vars(&self) -> Vec<(String, Var)>;

    /// Parameters to hand to an optimizer
    fn trainable_vars(&self) -> Vec<Var> {
        self.named_vars().into_iter().map(|(_, var)| var).collect()
    }

    /// Total number of scalar parameters
    fn param_count(&self) -> usize {
        self.named_vars()
            .iter()
            .map(|(_, var)| var.as_tensor().elem_count())
            .sum()
    }
}

/// Readout granularity of a model built from a config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingTask {
    Node,
    Edge,
    Graph,
}

impl EmbeddingTask {
    /// Build the head for this task
    pub fn build(&self, config: &ModelConfig, device: &Device) -> Result<Box<dyn GraphModule>> {
        Ok(match self {
            Self::Node => Box::new(NodeEmbedding::new(config, device)?),
            Self::Edge => Box::new(EdgeEmbedding::new(config, device)?),
            Self::Graph => Box::new(GraphEmbedding::new(config, device)?),
        })
    }
}

impl std::fmt::Display for EmbeddingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Edge => write!(f, "edge"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_task_builds_matching_head() {
        let config = ModelConfig::new(2, 1, 4, 3, 1);
        let x = Tensor::zeros((2, 5, 5, 2), DType::F32, &Device::Cpu).unwrap();

        let expected: [(EmbeddingTask, &[usize]); 3] = [
            (EmbeddingTask::Node, &[2, 5, 3]),
            (EmbeddingTask::Edge, &[2, 5, 5, 3]),
            (EmbeddingTask::Graph, &[2, 1]),
        ];
        for (task, dims) in expected {
            let model = task.build(&config, &Device::Cpu).unwrap();
            assert_eq!(model.forward(&x).unwrap().dims(), dims, "task {}", task);
            assert_eq!(model.trainable_vars().len(), model.named_vars().len());
        }
    }

    #[test]
    fn test_task_serde_names() {
        let task: EmbeddingTask = serde_json::from_str("\"graph\"").unwrap();
        assert_eq!(task, EmbeddingTask::Graph);
        assert_eq!(serde_json::to_string(&EmbeddingTask::Node).unwrap(), "\"node\"");
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = ModelConfig::new(2, 0, 4, 3, 1);
        assert!(EmbeddingTask::Edge.build(&config, &Device::Cpu).is_err());
    }
}
