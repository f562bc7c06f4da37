//! Trainable projections and lookup tables.
//!
//! Every layer owns its parameters as candle [`Var`]s so that an external
//! optimizer can update them in place, and reports them with stable dotted
//! names through `named_vars`.

use crate::{GraphNetError, Result};
use candle_core::{DType, Device, Tensor, Var};

/// Xavier/Glorot-scaled normal weights
pub(crate) fn xavier_var(
    shape: (usize, usize),
    fan_in: usize,
    fan_out: usize,
    device: &Device,
) -> Result<Var> {
    let scale = (2.0f32 / (fan_in + fan_out) as f32).sqrt();
    let init = Tensor::randn(0.0f32, scale, shape, device)
        .map_err(|e| GraphNetError::Tensor(format!("Failed to create weights: {}", e)))?;
    Var::from_tensor(&init)
        .map_err(|e| GraphNetError::Tensor(format!("Failed to create weights var: {}", e)))
}

fn zero_bias(width: usize, device: &Device) -> Result<Var> {
    Var::zeros(width, DType::F32, device)
        .map_err(|e| GraphNetError::Tensor(format!("Failed to create bias: {}", e)))
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Fully connected layer over the last axis of a tensor of any rank.
///
/// `y = x W + b` with `W: [in_features, out_features]`.
#[derive(Debug)]
pub struct Linear {
    /// Weight matrix `[in_features, out_features]`
    pub weight: Var,
    /// Bias `[out_features]`
    pub bias: Var,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            weight: xavier_var((in_features, out_features), in_features, out_features, device)?,
            bias: zero_bias(out_features, device)?,
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Project the last axis: `(..., in_features) -> (..., out_features)`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut dims = x.dims().to_vec();
        let last = match dims.last_mut() {
            Some(last) => last,
            None => {
                return Err(GraphNetError::Rank {
                    expected: 1,
                    actual: 0,
                })
            }
        };
        if *last != self.in_features {
            return Err(GraphNetError::ShapeMismatch {
                expected: self.in_features,
                actual: *last,
            });
        }
        *last = self.out_features;

        let rows = x.elem_count() / self.in_features;
        x.reshape((rows, self.in_features))
            .map_err(|e| GraphNetError::Tensor(format!("linear flatten failed: {}", e)))?
            .matmul(self.weight.as_tensor())
            .map_err(|e| GraphNetError::Tensor(format!("linear matmul failed: {}", e)))?
            .broadcast_add(self.bias.as_tensor())
            .map_err(|e| GraphNetError::Tensor(format!("linear add bias failed: {}", e)))?
            .reshape(dims)
            .map_err(|e| GraphNetError::Tensor(format!("linear unflatten failed: {}", e)))
    }

    pub fn named_vars(&self, prefix: &str) -> Vec<(String, Var)> {
        vec![
            (join(prefix, "weight"), self.weight.clone()),
            (join(prefix, "bias"), self.bias.clone()),
        ]
    }
}

/// 1×1 convolution over the channel axis of a `(batch, C_in, n, n)` tensor.
///
/// Acts on each vertex pair independently, so it commutes with any vertex
/// relabelling.
#[derive(Debug)]
pub struct PointwiseConv {
    /// Kernel `[C_out, C_in]`
    pub weight: Var,
    /// Bias `[C_out]`
    pub bias: Var,
    in_channels: usize,
    out_channels: usize,
}

impl PointwiseConv {
    pub fn new(in_channels: usize, out_channels: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            weight: xavier_var((out_channels, in_channels), in_channels, out_channels, device)?,
            bias: zero_bias(out_channels, device)?,
            in_channels,
            out_channels,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// `(batch, C_in, n, m) -> (batch, C_out, n, m)`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        if x.rank() != 4 {
            return Err(GraphNetError::Rank {
                expected: 4,
                actual: x.rank(),
            });
        }
        let (batch, channels, rows, cols) = x.dims4()?;
        if channels != self.in_channels {
            return Err(GraphNetError::ShapeMismatch {
                expected: self.in_channels,
                actual: channels,
            });
        }

        // [C_out, C_in] @ [batch, C_in, n*m] -> [batch, C_out, n*m]
        let flat = x
            .reshape((batch, channels, rows * cols))
            .map_err(|e| GraphNetError::Tensor(format!("conv1x1 flatten failed: {}", e)))?;
        let bias = self
            .bias
            .as_tensor()
            .reshape((1, self.out_channels, 1))
            .map_err(|e| GraphNetError::Tensor(format!("conv1x1 bias reshape failed: {}", e)))?;

        self.weight
            .as_tensor()
            .broadcast_matmul(&flat)
            .map_err(|e| GraphNetError::Tensor(format!("conv1x1 matmul failed: {}", e)))?
            .broadcast_add(&bias)
            .map_err(|e| GraphNetError::Tensor(format!("conv1x1 add bias failed: {}", e)))?
            .reshape((batch, self.out_channels, rows, cols))
            .map_err(|e| GraphNetError::Tensor(format!("conv1x1 unflatten failed: {}", e)))
    }

    pub fn named_vars(&self, prefix: &str) -> Vec<(String, Var)> {
        vec![
            (join(prefix, "weight"), self.weight.clone()),
            (join(prefix, "bias"), self.bias.clone()),
        ]
    }
}

/// Lookup table from a small set of integer categories to dense vectors.
#[derive(Debug)]
pub struct Embedding {
    /// Table `[num_categories, dim]`
    pub table: Var,
    num_categories: usize,
    dim: usize,
}

impl Embedding {
    /// Standard-normal initialized table
    pub fn new(num_categories: usize, dim: usize, device: &Device) -> Result<Self> {
        let init = Tensor::randn(0.0f32, 1.0, (num_categories, dim), device)
            .map_err(|e| GraphNetError::Tensor(format!("Failed to create embedding: {}", e)))?;
        let table = Var::from_tensor(&init)
            .map_err(|e| GraphNetError::Tensor(format!("Failed to create embedding var: {}", e)))?;
        Ok(Self {
            table,
            num_categories,
            dim,
        })
    }

    pub fn num_categories(&self) -> usize {
        self.num_categories
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed float-coded categories of any shape: `(...) -> (..., dim)`.
    ///
    /// Values are truncated toward zero; NaN and anything outside
    /// `[0, num_categories)` is rejected. An empty input yields an empty output.
    pub fn forward(&self, categories: &Tensor) -> Result<Tensor> {
        let table = self.table.as_tensor();
        let mut dims = categories.dims().to_vec();
        dims.push(self.dim);

        if categories.elem_count() == 0 {
            return Tensor::zeros(dims, table.dtype(), table.device())
                .map_err(|e| GraphNetError::Tensor(format!("embedding empty output failed: {}", e)));
        }

        let flat = categories
            .to_dtype(DType::F32)?
            .flatten_all()
            .map_err(|e| GraphNetError::Tensor(format!("embedding flatten failed: {}", e)))?;

        // min/max skip NaN, so count it separately
        let nan_count = flat
            .ne(&flat)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        if nan_count > 0.0 {
            return Err(GraphNetError::InvalidCategory(f32::NAN));
        }

        let lo = flat.min(0)?.to_scalar::<f32>()?;
        if lo < 0.0 {
            return Err(GraphNetError::InvalidCategory(lo));
        }
        let hi = flat.max(0)?.to_scalar::<f32>()?;
        if hi >= self.num_categories as f32 {
            return Err(GraphNetError::InvalidCategory(hi));
        }

        let ids = flat
            .to_dtype(DType::U32)
            .map_err(|e| GraphNetError::Tensor(format!("embedding index cast failed: {}", e)))?;

        table
            .index_select(&ids, 0)
            .map_err(|e| GraphNetError::Tensor(format!("embedding lookup failed: {}", e)))?
            .reshape(dims)
            .map_err(|e| GraphNetError::Tensor(format!("embedding reshape failed: {}", e)))
    }

    pub fn named_vars(&self, prefix: &str) -> Vec<(String, Var)> {
        vec![(join(prefix, "table"), self.table.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::Cpu
    }

    #[test]
    fn test_linear_last_axis() {
        let linear = Linear::new(3, 5, &device()).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, (2, 4, 4, 3), &device()).unwrap();
        assert_eq!(linear.forward(&x).unwrap().dims(), &[2, 4, 4, 5]);

        let x = Tensor::randn(0.0f32, 1.0, (7, 3), &device()).unwrap();
        assert_eq!(linear.forward(&x).unwrap().dims(), &[7, 5]);
    }

    #[test]
    fn test_linear_matches_matmul() {
        let linear = Linear::new(2, 1, &device()).unwrap();
        linear
            .weight
            .set(&Tensor::new(&[[2.0f32], [-1.0]], &device()).unwrap())
            .unwrap();
        linear
            .bias
            .set(&Tensor::new(&[0.5f32], &device()).unwrap())
            .unwrap();

        let x = Tensor::new(&[[1.0f32, 3.0], [4.0, 1.0]], &device()).unwrap();
        let y: Vec<f32> = linear.forward(&x).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(y, vec![-0.5, 7.5]);
    }

    #[test]
    fn test_linear_rejects_width() {
        let linear = Linear::new(3, 5, &device()).unwrap();
        let x = Tensor::zeros((2, 4), DType::F32, &device()).unwrap();
        assert!(matches!(
            linear.forward(&x),
            Err(GraphNetError::ShapeMismatch { expected: 3, actual: 4 })
        ));
    }

    #[test]
    fn test_pointwise_conv_shape() {
        let conv = PointwiseConv::new(3, 6, &device()).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, (2, 3, 5, 5), &device()).unwrap();
        assert_eq!(conv.forward(&x).unwrap().dims(), &[2, 6, 5, 5]);
    }

    #[test]
    fn test_pointwise_conv_acts_per_pair() {
        // Channel-first conv equals Linear applied over the channel axis
        let conv = PointwiseConv::new(3, 4, &device()).unwrap();
        let linear = Linear::new(3, 4, &device()).unwrap();
        linear
            .weight
            .set(&conv.weight.as_tensor().t().unwrap().contiguous().unwrap())
            .unwrap();
        linear.bias.set(conv.bias.as_tensor()).unwrap();

        let x = Tensor::randn(0.0f32, 1.0, (2, 3, 4, 4), &device()).unwrap();
        let via_conv = conv.forward(&x).unwrap();
        let via_linear = linear
            .forward(&x.permute((0, 2, 3, 1)).unwrap())
            .unwrap()
            .permute((0, 3, 1, 2))
            .unwrap();
        let diff = crate::primitives::test_utils::max_abs_diff(&via_conv, &via_linear);
        assert!(diff < 1e-5, "conv and linear disagree by {}", diff);
    }

    #[test]
    fn test_embedding_lookup() {
        let emb = Embedding::new(2, 4, &device()).unwrap();
        let cats = Tensor::new(&[[0.0f32, 1.0], [1.0, 0.0]], &device()).unwrap();
        let out = emb.forward(&cats).unwrap();
        assert_eq!(out.dims(), &[2, 2, 4]);

        let row0: Vec<f32> = emb.table.as_tensor().get(0).unwrap().to_vec1().unwrap();
        let first: Vec<f32> = out.get(0).unwrap().get(0).unwrap().to_vec1().unwrap();
        assert_eq!(first, row0);
    }

    #[test]
    fn test_embedding_rejects_out_of_range() {
        let emb = Embedding::new(2, 4, &device()).unwrap();
        let cats = Tensor::new(&[0.0f32, 2.0], &device()).unwrap();
        assert!(matches!(
            emb.forward(&cats),
            Err(GraphNetError::InvalidCategory(v)) if v == 2.0
        ));

        let cats = Tensor::new(&[-1.0f32, 1.0], &device()).unwrap();
        assert!(matches!(
            emb.forward(&cats),
            Err(GraphNetError::InvalidCategory(_))
        ));
    }

    #[test]
    fn test_embedding_rejects_nan() {
        let emb = Embedding::new(2, 4, &device()).unwrap();
        let cats = Tensor::new(&[[0.0f32, 1.0], [f32::NAN, 0.0]], &device()).unwrap();
        assert!(matches!(
            emb.forward(&cats),
            Err(GraphNetError::InvalidCategory(v)) if v.is_nan()
        ));
    }

    #[test]
    fn test_embedding_empty_input() {
        let emb = Embedding::new(2, 4, &device()).unwrap();
        let cats = Tensor::zeros((3, 0, 0), DType::F32, &device()).unwrap();
        assert_eq!(emb.forward(&cats).unwrap().dims(), &[3, 0, 0, 4]);
    }

    #[test]
    fn test_named_vars_prefix() {
        let linear = Linear::new(2, 2, &device()).unwrap();
        let names: Vec<String> = linear.named_vars("head").into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["head.weight", "head.bias"]);

        let emb = Embedding::new(2, 3, &device()).unwrap();
        assert_eq!(emb.named_vars("")[0].0, "table");
    }
}
