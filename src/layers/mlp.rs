//! Pointwise MLP over the channel axis.

use super::linear::PointwiseConv;
use crate::primitives::relu;
use crate::{GraphNetError, Result};
use candle_core::{Device, Tensor, Var};

/// `depth` stacked 1×1 convolutions, each followed by ReLU.
///
/// The first maps `in_channels -> out_channels`, the rest keep `out_channels`.
#[derive(Debug)]
pub struct MlpBlock {
    convs: Vec<PointwiseConv>,
}

impl MlpBlock {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        depth: usize,
        device: &Device,
    ) -> Result<Self> {
        if depth == 0 {
            return Err(GraphNetError::Config(
                "depth_of_mlp must be at least 1".into(),
            ));
        }

        let mut convs = Vec::with_capacity(depth);
        let mut width = in_channels;
        for _ in 0..depth {
            convs.push(PointwiseConv::new(width, out_channels, device)?);
            width = out_channels;
        }
        Ok(Self { convs })
    }

    pub fn depth(&self) -> usize {
        self.convs.len()
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut h = x.clone();
        for conv in &self.convs {
            h = relu(&conv.forward(&h)?)?;
        }
        Ok(h)
    }

    pub fn named_vars(&self, prefix: &str) -> Vec<(String, Var)> {
        self.convs
            .iter()
            .enumerate()
            .flat_map(|(i, conv)| conv.named_vars(&format!("{}.conv_{}", prefix, i)))
            .collect()
    }
}
