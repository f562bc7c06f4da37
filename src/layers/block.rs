//! Equivariant blocks
//!
//! A block maps a channel-first graph tensor `(batch, C_in, n, n)` to
//! `(batch, C_out, n, n)`:
//!
//! ```text
//! m1   = mlp1(x)                       # pointwise MLP, C_in -> C_out
//! m2   = mlp2(x)                       # pointwise MLP, C_in -> C_out
//! mult = m1 @ m2                       # per-channel product over vertex axes
//! out  = skip(concat(x, mult))         # pointwise, C_in + C_out -> C_out
//! ```
//!
//! The scaled variant divides `mult` by `n` and instance-normalizes it before
//! the skip projection.
//!
//! For a vertex permutation `P`, `(P A Pᵀ)(P B Pᵀ) = P (A B) Pᵀ`, and every
//! other step is pointwise or plane-wide, so both variants are equivariant.

use super::linear::PointwiseConv;
use super::mlp::MlpBlock;
use super::norm::{instance_norm, INSTANCE_NORM_EPS};
use crate::primitives::channel_dims;
use crate::{GraphNetError, Result};
use candle_core::{Device, Tensor, Var};
use serde::{Deserialize, Serialize};

/// Which block variant a model stacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BlockKind {
    /// Product without normalization
    Regular,
    /// Product scaled by `1/n` and instance-normalized
    #[default]
    Scaled,
}

impl BlockKind {
    /// Normalized blocks when `instance_norm` is on, plain blocks otherwise
    pub fn from_instance_norm(instance_norm: bool) -> Self {
        if instance_norm {
            Self::Scaled
        } else {
            Self::Regular
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Regular => write!(f, "Regular"),
            Self::Scaled => write!(f, "Scaled"),
        }
    }
}

/// Plain equivariant block
#[derive(Debug)]
pub struct RegularBlock {
    name: String,
    mlp1: MlpBlock,
    mlp2: MlpBlock,
    skip: PointwiseConv,
    in_features: usize,
    out_features: usize,
}

impl RegularBlock {
    pub fn new(
        in_features: usize,
        out_features: usize,
        depth_of_mlp: usize,
        name: impl Into<String>,
        device: &Device,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            mlp1: MlpBlock::new(in_features, out_features, depth_of_mlp, device)?,
            mlp2: MlpBlock::new(in_features, out_features, depth_of_mlp, device)?,
            skip: PointwiseConv::new(in_features + out_features, out_features, device)?,
            in_features,
            out_features,
        })
    }

    /// `mlp1(x) @ mlp2(x)`, shape `(batch, C_out, n, n)`
    fn product(&self, x: &Tensor) -> Result<Tensor> {
        let m1 = self.mlp1.forward(x)?;
        let m2 = self.mlp2.forward(x)?;
        m1.matmul(&m2)
            .map_err(|e| GraphNetError::Tensor(format!("{} product failed: {}", self.name, e)))
    }

    fn merge(&self, x: &Tensor, mult: &Tensor) -> Result<Tensor> {
        let cat = Tensor::cat(&[x, mult], 1)
            .map_err(|e| GraphNetError::Tensor(format!("{} cat failed: {}", self.name, e)))?;
        self.skip.forward(&cat)
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mult = self.product(x)?;
        self.merge(x, &mult)
    }

    pub fn named_vars(&self, prefix: &str) -> Vec<(String, Var)> {
        let mut vars = self.mlp1.named_vars(&format!("{}.mlp1", prefix));
        vars.extend(self.mlp2.named_vars(&format!("{}.mlp2", prefix)));
        vars.extend(self.skip.named_vars(&format!("{}.skip", prefix)));
        vars
    }
}

/// Equivariant block with a scaled, instance-normalized product
#[derive(Debug)]
pub struct ScaledBlock {
    block: RegularBlock,
}

impl ScaledBlock {
    pub fn new(
        in_features: usize,
        out_features: usize,
        depth_of_mlp: usize,
        name: impl Into<String>,
        device: &Device,
    ) -> Result<Self> {
        Ok(Self {
            block: RegularBlock::new(in_features, out_features, depth_of_mlp, name, device)?,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (_, _, n) = channel_dims(x)?;
        let mult = self
            .block
            .product(x)?
            .affine(1.0 / n as f64, 0.0)
            .map_err(|e| GraphNetError::Tensor(format!("{} scale failed: {}", self.block.name, e)))?;
        let mult = instance_norm(&mult, INSTANCE_NORM_EPS)?;
        self.block.merge(x, &mult)
    }

    pub fn named_vars(&self, prefix: &str) -> Vec<(String, Var)> {
        self.block.named_vars(prefix)
    }
}

/// A block of either variant, chosen once when the stack is built
#[derive(Debug)]
pub enum EquivariantBlock {
    Regular(RegularBlock),
    Scaled(ScaledBlock),
}

impl EquivariantBlock {
    pub fn new(
        kind: BlockKind,
        in_features: usize,
        out_features: usize,
        depth_of_mlp: usize,
        name: impl Into<String>,
        device: &Device,
    ) -> Result<Self> {
        Ok(match kind {
            BlockKind::Regular => Self::Regular(RegularBlock::new(
                in_features,
                out_features,
                depth_of_mlp,
                name,
                device,
            )?),
            BlockKind::Scaled => Self::Scaled(ScaledBlock::new(
                in_features,
                out_features,
                depth_of_mlp,
                name,
                device,
            )?),
        })
    }

    fn inner(&self) -> &RegularBlock {
        match self {
            Self::Regular(block) => block,
            Self::Scaled(block) => &block.block,
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Regular(_) => BlockKind::Regular,
            Self::Scaled(_) => BlockKind::Scaled,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner().name
    }

    pub fn in_features(&self) -> usize {
        self.inner().in_features
    }

    pub fn out_features(&self) -> usize {
        self.inner().out_features
    }

    /// Whether a residual connection can be taken around this block
    pub fn preserves_width(&self) -> bool {
        self.in_features() == self.out_features()
    }

    /// `(batch, C_in, n, n) -> (batch, C_out, n, n)`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Regular(block) => block.forward(x),
            Self::Scaled(block) => block.forward(x),
        }
    }

    pub fn named_vars(&self, prefix: &str) -> Vec<(String, Var)> {
        match self {
            Self::Regular(block) => block.named_vars(prefix),
            Self::Scaled(block) => block.named_vars(prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::test_utils::{max_abs_diff, permute_vertices};

    fn device() -> Device {
        Device::Cpu
    }

    #[test]
    fn test_block_kind_from_flag() {
        assert_eq!(BlockKind::from_instance_norm(true), BlockKind::Scaled);
        assert_eq!(BlockKind::from_instance_norm(false), BlockKind::Regular);
    }

    #[test]
    fn test_block_shapes() {
        for kind in [BlockKind::Regular, BlockKind::Scaled] {
            let block = EquivariantBlock::new(kind, 3, 8, 2, "block_0", &device()).unwrap();
            assert_eq!(block.kind(), kind);
            assert_eq!(block.name(), "block_0");
            assert!(!block.preserves_width());

            let x = Tensor::randn(0.0f32, 1.0, (2, 3, 5, 5), &device()).unwrap();
            let out = block.forward(&x).unwrap();
            assert_eq!(out.dims(), &[2, 8, 5, 5]);
        }
    }

    #[test]
    fn test_block_rejects_wrong_channels() {
        let block = EquivariantBlock::new(BlockKind::Regular, 3, 8, 1, "b", &device()).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, (1, 4, 5, 5), &device()).unwrap();
        assert!(matches!(
            block.forward(&x),
            Err(GraphNetError::ShapeMismatch { expected: 3, actual: 4 })
        ));
    }

    #[test]
    fn test_blocks_are_equivariant() {
        let perm = Tensor::new(&[3u32, 0, 4, 1, 2], &device()).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, (2, 4, 5, 5), &device()).unwrap();
        let px = permute_vertices(&x, &perm, 2);

        for kind in [BlockKind::Regular, BlockKind::Scaled] {
            let block = EquivariantBlock::new(kind, 4, 4, 2, "block", &device()).unwrap();
            let expected = permute_vertices(&block.forward(&x).unwrap(), &perm, 2);
            let actual = block.forward(&px).unwrap();
            let diff = max_abs_diff(&expected, &actual);
            assert!(diff < 1e-4, "{} block not equivariant: {}", kind, diff);
        }
    }

    #[test]
    fn test_scaled_product_is_normalized() {
        // Same weights: the variants only differ in how the product is treated
        let regular = RegularBlock::new(2, 3, 1, "r", &device()).unwrap();
        let scaled = ScaledBlock::new(2, 3, 1, "s", &device()).unwrap();
        for ((_, a), (_, b)) in scaled.named_vars("").iter().zip(regular.named_vars("").iter()) {
            a.set(b.as_tensor()).unwrap();
        }

        let x = Tensor::randn(0.0f32, 1.0, (1, 2, 6, 6), &device()).unwrap();
        let out_r = regular.forward(&x).unwrap();
        let out_s = scaled.forward(&x).unwrap();
        assert_eq!(out_r.dims(), out_s.dims());
        assert!(max_abs_diff(&out_r, &out_s) > 0.0);
    }

    #[test]
    fn test_named_vars_layout() {
        let block = EquivariantBlock::new(BlockKind::Scaled, 2, 4, 2, "block_0", &device()).unwrap();
        let vars = block.named_vars("block_0");
        // two MLPs of depth 2 plus skip, weight + bias each
        assert_eq!(vars.len(), 2 * 2 * 2 + 2);
        assert_eq!(vars[0].0, "block_0.mlp1.conv_0.weight");
        assert_eq!(vars.last().unwrap().0, "block_0.skip.bias");

        let skip_w = &vars[vars.len() - 2].1;
        assert_eq!(skip_w.as_tensor().dims(), &[4, 2 + 4]);
    }
}
