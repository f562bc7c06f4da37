//! Vertex-axis pooling
//!
//! Reduce one vertex axis of a `(batch, n, n, C)` graph tensor to get
//! per-vertex summaries `(batch, n, C)`.
//!
//! | Operator | Reduced axis | Reduction |
//! |---|---|---|
//! | [`Pooling::ColumnMax`] | 2 (targets `j` of each source `i`) | max |
//! | [`Pooling::RowMax`] | 1 (sources `i` of each target `j`) | max |
//! | [`Pooling::ColumnAvg`] | 2 | mean |
//!
//! All three commute with a vertex relabelling: permuting both vertex axes of
//! the input permutes the vertex axis of the output the same way.

use super::shape::graph_dims;
use crate::{GraphNetError, Result};
use candle_core::Tensor;
use serde::{Deserialize, Serialize};

/// A fixed reduction over one vertex axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pooling {
    /// Max over axis 2; node embeddings
    ColumnMax,
    /// Max over axis 1
    RowMax,
    /// Mean over axis 2; edge -> node readout
    ColumnAvg,
}

impl Pooling {
    /// Vertex axis this operator reduces
    pub fn axis(&self) -> usize {
        match self {
            Self::ColumnMax | Self::ColumnAvg => 2,
            Self::RowMax => 1,
        }
    }

    /// Apply to a `(batch, n, n, C)` tensor, returning `(batch, n, C)`.
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        graph_dims(x)?;
        let axis = self.axis();
        let pooled = match self {
            Self::ColumnMax | Self::RowMax => x.max(axis),
            Self::ColumnAvg => x.mean(axis),
        };
        pooled.map_err(|e| GraphNetError::Tensor(format!("{:?} pooling failed: {}", self, e)))
    }
}

impl std::fmt::Display for Pooling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ColumnMax => write!(f, "ColumnMax"),
            Self::RowMax => write!(f, "RowMax"),
            Self::ColumnAvg => write!(f, "ColumnAvg"),
        }
    }
}

/// Mean over the vertex axis of a `(batch, n, C)` tensor: node -> graph readout.
pub fn vertex_mean(h: &Tensor) -> Result<Tensor> {
    if h.rank() != 3 {
        return Err(GraphNetError::Rank {
            expected: 3,
            actual: h.rank(),
        });
    }
    h.mean(1)
        .map_err(|e| GraphNetError::Tensor(format!("vertex_mean failed: {}", e)))
}
