//! Training Helpers
//!
//! Thin optimizer wrappers and gradient checks for driving a
//! [`GraphModule`](crate::model::GraphModule) from a caller-owned loop.
//!
//! ```rust,ignore
//! use candle_nn::loss::binary_cross_entropy_with_logit;
//! use eqgraph::prelude::*;
//!
//! let model = GraphEmbedding::new(&config, &device)?;
//! let vars = model.trainable_vars();
//! let mut optimizer = Optimizer::adam(vars.clone(), 1e-3)?;
//!
//! for (graphs, labels) in batches {
//!     let loss = binary_cross_entropy_with_logit(&model.forward(&graphs)?, &labels)?;
//!     let mut grads = loss.backward()?;
//!     clipped_step(&mut optimizer, &mut grads, &vars, 1.0)?;
//! }
//! ```

use crate::{GraphNetError, Result};
use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::optim::Optimizer as CandleOptimizer;
use tracing::warn;

// =============================================================================
// Optimizers
// =============================================================================

/// AdamW over a fixed set of model parameters.
///
/// Only the learning rate is configurable; betas, epsilon and weight decay
/// keep the candle-nn defaults.
pub struct AdamOptimizer {
    inner: candle_nn::optim::AdamW,
}

impl AdamOptimizer {
    pub fn new(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let params = candle_nn::optim::ParamsAdamW {
            lr: learning_rate,
            ..Default::default()
        };
        let inner = <candle_nn::optim::AdamW as CandleOptimizer>::new(vars, params)
            .map_err(|e| GraphNetError::Training(format!("AdamW init failed: {}", e)))?;
        Ok(Self { inner })
    }

    /// Update every tracked parameter that has a gradient in `grads`
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        CandleOptimizer::step(&mut self.inner, grads)
            .map_err(|e| GraphNetError::Training(format!("Adam step failed: {}", e)))
    }

    pub fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(&self.inner)
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(&mut self.inner, lr)
    }
}

/// Plain gradient descent, `v -= lr * grad`, without momentum
pub struct SgdOptimizer {
    inner: candle_nn::optim::SGD,
}

impl SgdOptimizer {
    pub fn new(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let inner = <candle_nn::optim::SGD as CandleOptimizer>::new(vars, learning_rate)
            .map_err(|e| GraphNetError::Training(format!("SGD init failed: {}", e)))?;
        Ok(Self { inner })
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        CandleOptimizer::step(&mut self.inner, grads)
            .map_err(|e| GraphNetError::Training(format!("SGD step failed: {}", e)))
    }

    pub fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(&self.inner)
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(&mut self.inner, lr)
    }
}

/// Optimizer choice for a training run
pub enum Optimizer {
    Sgd(SgdOptimizer),
    /// AdamW with candle-nn defaults apart from the learning rate
    Adam(AdamOptimizer),
}

impl Optimizer {
    pub fn sgd(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        Ok(Self::Sgd(SgdOptimizer::new(vars, learning_rate)?))
    }

    pub fn adam(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        Ok(Self::Adam(AdamOptimizer::new(vars, learning_rate)?))
    }

    /// Take a gradient step
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::Sgd(opt) => opt.step(grads),
            Self::Adam(opt) => opt.step(grads),
        }
    }

    /// Current learning rate
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Sgd(opt) => opt.learning_rate(),
            Self::Adam(opt) => opt.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Sgd(opt) => opt.set_learning_rate(lr),
            Self::Adam(opt) => opt.set_learning_rate(lr),
        }
    }
}

// =============================================================================
// Gradient checks
// =============================================================================

/// Total L2 norm over the gradients of `vars`
pub fn compute_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut total_sq_norm = 0.0f32;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total_sq_norm += grad
                .sqr()
                .and_then(|t| t.sum_all())
                .and_then(|t| t.to_scalar::<f32>())
                .map_err(|e| GraphNetError::Training(format!("grad norm failed: {}", e)))?;
        }
    }
    Ok(total_sq_norm.sqrt())
}

/// `true` when no gradient of `vars` holds NaN or Inf
pub fn check_gradients_health(grads: &GradStore, vars: &[Var]) -> bool {
    vars.iter()
        .filter_map(|var| grads.get(var.as_tensor()))
        .all(|grad| {
            grad.flatten_all()
                .and_then(|t| t.to_vec1::<f32>())
                .map(|vals| vals.iter().all(|v| v.is_finite()))
                .unwrap_or(false)
        })
}

/// What [`clipped_step`] did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Gradients used as-is
    Applied { grad_norm: f32 },
    /// Gradients rescaled to `max_grad_norm` first
    Clipped { grad_norm: f32 },
    /// Non-finite gradients; parameters untouched
    Skipped,
}

/// Optimizer step with NaN/Inf skipping and global-norm clipping.
///
/// When the total gradient norm exceeds `max_grad_norm`, every gradient of
/// `vars` in `grads` is rescaled in place before the step.
pub fn clipped_step(
    optimizer: &mut Optimizer,
    grads: &mut GradStore,
    vars: &[Var],
    max_grad_norm: f32,
) -> Result<StepOutcome> {
    if !check_gradients_health(grads, vars) {
        warn!("non-finite gradients, skipping optimizer step");
        return Ok(StepOutcome::Skipped);
    }

    let grad_norm = compute_grad_norm(grads, vars)?;
    if grad_norm > max_grad_norm && grad_norm > 0.0 {
        let scale = (max_grad_norm / grad_norm) as f64;
        for var in vars {
            if let Some(grad) = grads.remove(var.as_tensor()) {
                let scaled = grad
                    .affine(scale, 0.0)
                    .map_err(|e| GraphNetError::Training(format!("grad scale failed: {}", e)))?;
                grads.insert(var.as_tensor(), scaled);
            }
        }
        optimizer.step(grads)?;
        return Ok(StepOutcome::Clipped { grad_norm });
    }

    optimizer.step(grads)?;
    Ok(StepOutcome::Applied { grad_norm })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GraphEmbedding, GraphModule, ModelConfig};
    use candle_core::{DType, Device, Tensor};

    fn device() -> Device {
        Device::Cpu
    }

    fn snapshot(vars: &[Var]) -> Vec<Vec<f32>> {
        vars.iter()
            .map(|v| v.as_tensor().flatten_all().unwrap().to_vec1().unwrap())
            .collect()
    }

    fn quadratic_grads(var: &Var, factor: f64) -> GradStore {
        // loss = factor * sum(v^2), grad = 2 * factor * v
        var.as_tensor()
            .sqr()
            .unwrap()
            .sum_all()
            .unwrap()
            .affine(factor, 0.0)
            .unwrap()
            .backward()
            .unwrap()
    }

    #[test]
    fn test_learning_rate_get_set() {
        let var = Var::zeros(3, DType::F32, &device()).unwrap();
        for mut opt in [
            Optimizer::sgd(vec![var.clone()], 0.1).unwrap(),
            Optimizer::adam(vec![var.clone()], 0.01).unwrap(),
        ] {
            let lr = opt.learning_rate();
            assert!(lr == 0.1 || lr == 0.01);
            opt.set_learning_rate(0.5);
            assert_eq!(opt.learning_rate(), 0.5);
        }
    }

    #[test]
    fn test_sgd_step_moves_parameters() {
        let var = Var::from_tensor(&Tensor::new(&[1.0f32, -2.0], &device()).unwrap()).unwrap();
        let mut opt = Optimizer::sgd(vec![var.clone()], 0.25).unwrap();
        let grads = quadratic_grads(&var, 1.0);
        opt.step(&grads).unwrap();

        // v - 0.25 * 2v = 0.5v
        let vals: Vec<f32> = var.as_tensor().to_vec1().unwrap();
        assert_eq!(vals, vec![0.5, -1.0]);
    }

    #[test]
    fn test_grad_norm_and_health() {
        let var = Var::from_tensor(&Tensor::new(&[3.0f32, 4.0], &device()).unwrap()).unwrap();
        let grads = quadratic_grads(&var, 0.5);
        let norm = compute_grad_norm(&grads, &[var.clone()]).unwrap();
        assert!((norm - 5.0).abs() < 1e-5);
        assert!(check_gradients_health(&grads, &[var]));
    }

    #[test]
    fn test_clipped_step_rescales() {
        let var = Var::from_tensor(&Tensor::new(&[3.0f32, 4.0], &device()).unwrap()).unwrap();
        let vars = vec![var.clone()];
        let mut opt = Optimizer::sgd(vars.clone(), 1.0).unwrap();
        let mut grads = quadratic_grads(&var, 5.0);

        let outcome = clipped_step(&mut opt, &mut grads, &vars, 1.0).unwrap();
        match outcome {
            StepOutcome::Clipped { grad_norm } => assert!((grad_norm - 50.0).abs() < 1e-3),
            other => panic!("expected clipping, got {:?}", other),
        }
        // unit-norm step along (3, 4) / 5
        let vals: Vec<f32> = var.as_tensor().to_vec1().unwrap();
        assert!((vals[0] - 2.4).abs() < 1e-5 && (vals[1] - 3.2).abs() < 1e-5);
    }

    #[test]
    fn test_clipped_step_skips_nan() {
        let var = Var::from_tensor(&Tensor::new(&[1.0f32, 2.0], &device()).unwrap()).unwrap();
        let vars = vec![var.clone()];
        let mut opt = Optimizer::adam(vars.clone(), 0.1).unwrap();
        let mut grads = quadratic_grads(&var, f64::NAN);

        assert!(!check_gradients_health(&grads, &vars));
        assert_eq!(
            clipped_step(&mut opt, &mut grads, &vars, 1.0).unwrap(),
            StepOutcome::Skipped
        );
        let vals: Vec<f32> = var.as_tensor().to_vec1().unwrap();
        assert_eq!(vals, vec![1.0, 2.0]);
    }

    #[test]
    fn test_graph_head_trains() {
        let model = GraphEmbedding::new(&ModelConfig::new(2, 2, 4, 4, 1), &device()).unwrap();
        let vars = model.trainable_vars();
        let before = snapshot(&vars);
        let mut opt = Optimizer::adam(vars.clone(), 1e-2).unwrap();

        let x = Tensor::randn(0.0f32, 1.0, (4, 5, 5, 2), &device()).unwrap();
        let labels = Tensor::new(&[[1.0f32], [0.0], [1.0], [0.0]], &device()).unwrap();
        let logits = model.forward(&x).unwrap();
        let loss = candle_nn::loss::binary_cross_entropy_with_logit(&logits, &labels).unwrap();
        assert!(loss.to_scalar::<f32>().unwrap().is_finite());

        let mut grads = loss.backward().unwrap();
        let outcome = clipped_step(&mut opt, &mut grads, &vars, 10.0).unwrap();
        assert_ne!(outcome, StepOutcome::Skipped);
        assert_ne!(snapshot(&vars), before);
    }
}
