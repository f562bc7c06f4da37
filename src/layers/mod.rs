//! Neural Network Layers
//!
//! Building blocks that operate on channel-first graph tensors
//! `(batch, C, n, n)` or on the trailing feature axis.
//!
//! ## Submodules
//!
//! - [`linear`]: [`Linear`], [`PointwiseConv`] (1×1 conv), [`Embedding`]
//! - [`mlp`]: [`MlpBlock`], a pointwise ReLU MLP
//! - [`norm`]: [`instance_norm`] over the n×n plane
//! - [`block`]: [`RegularBlock`], [`ScaledBlock`] and the [`EquivariantBlock`] choice

pub mod block;
pub mod linear;
pub mod mlp;
pub mod norm;

pub use block::{BlockKind, EquivariantBlock, RegularBlock, ScaledBlock};
pub use linear::{Embedding, Linear, PointwiseConv};
pub use mlp::MlpBlock;
pub use norm::{instance_norm, INSTANCE_NORM_EPS};
