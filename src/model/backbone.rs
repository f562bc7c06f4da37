//! Residual stack of equivariant blocks
//!
//! ```text
//! (b, n, n, f) ── embed? ──▶ (b, n, n, C) ── permute ──▶ (b, C, n, n)
//!                                                         │
//!                     ┌───────────────────────────────────┘
//!                     ▼
//!   for each block:  h = h + block(h)   (residual, width preserved)
//!                    h = block(h)       (otherwise)
//!                     │
//!                     ▼
//!   last_mlp (1×1, in_features -> out_features) ── permute ──▶ (b, n, n, out)
//! ```

use super::config::ModelConfig;
use super::GraphModule;
use crate::layers::{BlockKind, Embedding, EquivariantBlock, PointwiseConv};
use crate::primitives::graph_dims;
use crate::{GraphNetError, Result};
use candle_core::{DType, Device, Tensor, Var};
use tracing::debug;

/// Number of categories the input embedding distinguishes
pub const EMBEDDING_CATEGORIES: usize = 2;

/// Backbone: maps `(batch, n, n, original_features_num)` graph tensors to
/// `(batch, n, n, out_features)`.
#[derive(Debug)]
pub struct ResScaledModel {
    config: ModelConfig,
    embedding: Option<Embedding>,
    blocks: Vec<EquivariantBlock>,
    last_mlp: PointwiseConv,
}

impl ResScaledModel {
    /// Build the stack described by `config` on `device`
    pub fn new(config: &ModelConfig, device: &Device) -> Result<Self> {
        config.validate()?;

        let embedding = if config.input_embed {
            Some(Embedding::new(EMBEDDING_CATEGORIES, config.in_features, device)?)
        } else {
            None
        };

        let kind = config.ablation.block_kind();
        let mut blocks = Vec::with_capacity(config.num_blocks);
        let mut last_layer_features = config.first_block_width();
        for i in 0..config.num_blocks {
            blocks.push(EquivariantBlock::new(
                kind,
                last_layer_features,
                config.in_features,
                config.depth_of_mlp,
                format!("block_{}", i),
                device,
            )?);
            last_layer_features = config.in_features;
        }

        let last_mlp = PointwiseConv::new(config.in_features, config.out_features, device)?;

        let model = Self {
            config: config.clone(),
            embedding,
            blocks,
            last_mlp,
        };
        debug!(
            blocks = config.num_blocks,
            kind = %kind,
            residuals = config.ablation.residuals,
            input_embed = config.input_embed,
            params = model.param_count(),
            "built backbone"
        );
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn blocks(&self) -> &[EquivariantBlock] {
        &self.blocks
    }

    pub fn block_kind(&self) -> BlockKind {
        self.config.ablation.block_kind()
    }

    pub fn use_residuals(&self) -> bool {
        self.config.ablation.residuals
    }

    pub fn embedding(&self) -> Option<&Embedding> {
        self.embedding.as_ref()
    }

    /// Validate the input and return `(batch, n)`
    fn check_input(&self, x: &Tensor) -> Result<(usize, usize)> {
        let (batch, n, features) = graph_dims(x)?;
        if features != self.config.original_features_num {
            return Err(GraphNetError::ShapeMismatch {
                expected: self.config.original_features_num,
                actual: features,
            });
        }
        Ok((batch, n))
    }

    /// Replace the feature axis by the embedding of the last channel
    fn embed(&self, x: &Tensor) -> Result<Tensor> {
        let Some(embedding) = &self.embedding else {
            return Ok(x.clone());
        };
        let last = self.config.original_features_num - 1;
        let categories = x
            .narrow(3, last, 1)
            .map_err(|e| GraphNetError::Tensor(format!("embed narrow failed: {}", e)))?
            .squeeze(3)
            .map_err(|e| GraphNetError::Tensor(format!("embed squeeze failed: {}", e)))?;
        embedding.forward(&categories)
    }
}

impl GraphModule for ResScaledModel {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.check_input(x)?;

        let x = self.embed(&x.to_dtype(DType::F32)?)?;

        // (b, n, n, C) -> (b, C, n, n)
        let mut h = x
            .permute((0, 3, 1, 2))
            .map_err(|e| GraphNetError::Tensor(format!("permute to channels failed: {}", e)))?
            .contiguous()?;

        for block in &self.blocks {
            let out = block.forward(&h)?;
            h = if self.use_residuals() && block.preserves_width() {
                (&h + &out).map_err(|e| {
                    GraphNetError::Tensor(format!("{} residual failed: {}", block.name(), e))
                })?
            } else {
                out
            };
        }

        self.last_mlp
            .forward(&h)?
            .permute((0, 2, 3, 1))
            .map_err(|e| GraphNetError::Tensor(format!("permute to features failed: {}", e)))?
            .contiguous()
            .map_err(GraphNetError::Candle)
    }

    fn named_vars(&self) -> Vec<(String, Var)> {
        let mut vars = Vec::new();
        if let Some(embedding) = &self.embedding {
            vars.extend(embedding.named_vars("embedding"));
        }
        for block in &self.blocks {
            vars.extend(block.named_vars(block.name()));
        }
        vars.extend(self.last_mlp.named_vars("last_mlp"));
        vars
    }
}
