//! Instance normalization over the vertex-pair plane.

use crate::primitives::channel_dims;
use crate::{GraphNetError, Result};
use candle_core::Tensor;

/// Default epsilon added to the variance
pub const INSTANCE_NORM_EPS: f64 = 1e-5;

/// Normalize each `(sample, channel)` plane of a `(batch, C, n, n)` tensor to
/// zero mean and unit variance.
///
/// InstanceNorm(x) = (x - mean) / sqrt(var + eps), statistics over the n×n
/// plane, biased variance, no affine parameters. Mean and variance over the
/// whole plane do not depend on vertex order.
pub fn instance_norm(x: &Tensor, eps: f64) -> Result<Tensor> {
    let (batch, channels, n) = channel_dims(x)?;

    let flat = x
        .reshape((batch, channels, n * n))
        .map_err(|e| GraphNetError::Tensor(format!("instance_norm flatten failed: {}", e)))?;

    let mean = flat
        .mean_keepdim(2)
        .map_err(|e| GraphNetError::Tensor(format!("instance_norm mean failed: {}", e)))?;

    let centered = flat
        .broadcast_sub(&mean)
        .map_err(|e| GraphNetError::Tensor(format!("instance_norm center failed: {}", e)))?;

    let var = centered
        .sqr()
        .map_err(|e| GraphNetError::Tensor(format!("instance_norm sqr failed: {}", e)))?
        .mean_keepdim(2)
        .map_err(|e| GraphNetError::Tensor(format!("instance_norm var mean failed: {}", e)))?;

    let std = var
        .affine(1.0, eps)
        .map_err(|e| GraphNetError::Tensor(format!("instance_norm eps failed: {}", e)))?
        .sqrt()
        .map_err(|e| GraphNetError::Tensor(format!("instance_norm sqrt failed: {}", e)))?;

    centered
        .broadcast_div(&std)
        .map_err(|e| GraphNetError::Tensor(format!("instance_norm div failed: {}", e)))?
        .reshape((batch, channels, n, n))
        .map_err(|e| GraphNetError::Tensor(format!("instance_norm unflatten failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_instance_norm_statistics() {
        let x = Tensor::randn(3.0f32, 2.0, (2, 3, 6, 6), &Device::Cpu).unwrap();
        let y = instance_norm(&x, INSTANCE_NORM_EPS).unwrap();
        assert_eq!(y.dims(), &[2, 3, 6, 6]);

        let flat = y.reshape((2, 3, 36)).unwrap();
        let means: Vec<Vec<f32>> = flat.mean(2).unwrap().to_vec2().unwrap();
        let vars: Vec<Vec<f32>> = flat.sqr().unwrap().mean(2).unwrap().to_vec2().unwrap();
        for (row_m, row_v) in means.iter().zip(vars.iter()) {
            for (m, v) in row_m.iter().zip(row_v.iter()) {
                assert!(m.abs() < 1e-4, "mean {}", m);
                assert!((v - 1.0).abs() < 1e-3, "variance {}", v);
            }
        }
    }

    #[test]
    fn test_instance_norm_constant_plane_is_finite() {
        let x = Tensor::ones((1, 2, 3, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
        let y = instance_norm(&x, INSTANCE_NORM_EPS).unwrap();
        let vals: Vec<f32> = y.flatten_all().unwrap().to_vec1().unwrap();
        assert!(vals.iter().all(|v| v.is_finite() && v.abs() < 1e-3));
    }
}
