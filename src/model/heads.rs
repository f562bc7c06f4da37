//! Readout heads over the backbone
//!
//! | Head | Output | Extra parameters |
//! |---|---|---|
//! | [`NodeEmbedding`] | `(batch, n, out_features)` | none |
//! | [`EdgeEmbedding`] | `(batch, n, n, out_features)` | none |
//! | [`GraphEmbedding`] | `(batch, 1)` logit | `edge_classif`, `node_classif`, `graph_classif` |

use super::backbone::ResScaledModel;
use super::config::ModelConfig;
use super::GraphModule;
use crate::layers::Linear;
use crate::primitives::{graph_dims, sigmoid, vertex_mean, Pooling};
use crate::{GraphNetError, Result};
use candle_core::{Device, Tensor, Var};
use tracing::debug;

fn prefixed(prefix: &str, vars: Vec<(String, Var)>) -> Vec<(String, Var)> {
    vars.into_iter()
        .map(|(name, var)| (format!("{}.{}", prefix, name), var))
        .collect()
}

// ============================================================================
// Node embedding
// ============================================================================

/// Backbone followed by column-max pooling: one vector per vertex
#[derive(Debug)]
pub struct NodeEmbedding {
    base: ResScaledModel,
    pooling: Pooling,
}

impl NodeEmbedding {
    pub fn new(config: &ModelConfig, device: &Device) -> Result<Self> {
        Ok(Self {
            base: ResScaledModel::new(config, device)?,
            pooling: Pooling::ColumnMax,
        })
    }

    pub fn base(&self) -> &ResScaledModel {
        &self.base
    }
}

impl GraphModule for NodeEmbedding {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.pooling.apply(&self.base.forward(x)?)
    }

    fn named_vars(&self) -> Vec<(String, Var)> {
        prefixed("base", self.base.named_vars())
    }
}

// ============================================================================
// Edge embedding
// ============================================================================

/// Backbone output as-is: one vector per ordered vertex pair
#[derive(Debug)]
pub struct EdgeEmbedding {
    base: ResScaledModel,
}

impl EdgeEmbedding {
    pub fn new(config: &ModelConfig, device: &Device) -> Result<Self> {
        Ok(Self {
            base: ResScaledModel::new(config, device)?,
        })
    }

    pub fn base(&self) -> &ResScaledModel {
        &self.base
    }
}

impl GraphModule for EdgeEmbedding {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.base.forward(x)
    }

    fn named_vars(&self) -> Vec<(String, Var)> {
        prefixed("base", self.base.named_vars())
    }
}

// ============================================================================
// Graph classification
// ============================================================================

/// One raw logit per graph.
///
/// The backbone reads the raw input features (no embedding). Its pair
/// features are projected, averaged per vertex, squashed, projected again,
/// averaged over the graph, squashed and mapped to a single output:
///
/// ```text
/// (b, n, n, out) -edge_classif-> mean axis 2 -> sigmoid -> (b, n, out)
///   -node_classif-> mean over vertices -> sigmoid -> (b, out)
///   -graph_classif-> (b, 1)
/// ```
///
/// No sigmoid is applied to the result; pair it with a logit loss.
#[derive(Debug)]
pub struct GraphEmbedding {
    base: ResScaledModel,
    edge_classif: Linear,
    node_classif: Linear,
    graph_classif: Linear,
    edge_pooling: Pooling,
}

impl GraphEmbedding {
    pub fn new(config: &ModelConfig, device: &Device) -> Result<Self> {
        let base_config = config.clone().with_input_embed(false);
        let out = config.out_features;
        let head = Self {
            base: ResScaledModel::new(&base_config, device)?,
            edge_classif: Linear::new(out, out, device)?,
            node_classif: Linear::new(out, out, device)?,
            graph_classif: Linear::new(out, 1, device)?,
            edge_pooling: Pooling::ColumnAvg,
        };
        debug!(out_features = out, params = head.param_count(), "built graph head");
        Ok(head)
    }

    pub fn base(&self) -> &ResScaledModel {
        &self.base
    }

    /// Per-vertex features after the first sigmoid, `(batch, n, out_features)`
    pub fn node_features(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, n, _) = graph_dims(x)?;
        let edges = self.edge_classif.forward(&self.base.forward(x)?)?;
        let nodes = sigmoid(&self.edge_pooling.apply(&edges)?)?;
        nodes
            .reshape((batch, n, self.base.config().out_features))
            .map_err(|e| GraphNetError::Tensor(format!("node feature reshape failed: {}", e)))
    }
}

impl GraphModule for GraphEmbedding {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let nodes = self.node_classif.forward(&self.node_features(x)?)?;
        let graph = sigmoid(&vertex_mean(&nodes)?)?;
        self.graph_classif.forward(&graph)
    }

    fn named_vars(&self) -> Vec<(String, Var)> {
        let mut vars = prefixed("base", self.base.named_vars());
        vars.extend(self.edge_classif.named_vars("edge_classif"));
        vars.extend(self.node_classif.named_vars("node_classif"));
        vars.extend(self.graph_classif.named_vars("graph_classif"));
        vars
    }
}
