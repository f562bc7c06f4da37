//! Shape checks for graph tensors.

use crate::{GraphNetError, Result};
use candle_core::Tensor;

/// Validate a `(batch, n, n, features)` graph tensor and return
/// `(batch, n, features)`.
pub fn graph_dims(x: &Tensor) -> Result<(usize, usize, usize)> {
    if x.rank() != 4 {
        return Err(GraphNetError::Rank {
            expected: 4,
            actual: x.rank(),
        });
    }
    let (batch, rows, cols, features) = x.dims4()?;
    if rows != cols {
        return Err(GraphNetError::NonSquare { rows, cols });
    }
    Ok((batch, rows, features))
}

/// Validate a channel-first `(batch, channels, n, n)` tensor and return
/// `(batch, channels, n)`.
pub fn channel_dims(x: &Tensor) -> Result<(usize, usize, usize)> {
    if x.rank() != 4 {
        return Err(GraphNetError::Rank {
            expected: 4,
            actual: x.rank(),
        });
    }
    let (batch, channels, rows, cols) = x.dims4()?;
    if rows != cols {
        return Err(GraphNetError::NonSquare { rows, cols });
    }
    Ok((batch, channels, rows))
}
