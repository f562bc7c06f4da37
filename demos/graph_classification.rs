//! Graph classification: dense vs sparse random graphs
//!
//! Demonstrates: config → graph head → forward → loss → backward → clipped step
//! → checkpoint
//!
//! Run with:
//! ```bash
//! cargo run --example graph_classification
//! ```

use candle_nn::loss::binary_cross_entropy_with_logit;
use eqgraph::prelude::*;

const VERTICES: usize = 8;
const BATCH: usize = 16;

/// Random symmetric 0/1 adjacency batches with edge probability `p` per graph,
/// plus a constant channel: `(batch, n, n, 2)`
fn random_graphs(probs: &[f32], device: &Device) -> Result<Tensor> {
    let batch = probs.len();
    let p = Tensor::new(probs, device)?.reshape((batch, 1, 1))?;
    let noise = Tensor::rand(0.0f32, 1.0, (batch, VERTICES, VERTICES), device)?;
    let strict_upper = (Tensor::triu2(VERTICES, DType::F32, device)?
        - Tensor::eye(VERTICES, DType::F32, device)?)?;
    let upper = noise
        .broadcast_lt(&p)?
        .to_dtype(DType::F32)?
        .broadcast_mul(&strict_upper)?;
    let adj = (&upper + upper.transpose(1, 2)?)?;

    let ones = Tensor::ones((batch, VERTICES, VERTICES, 1), DType::F32, device)?;
    Ok(Tensor::cat(&[&ones, &adj.unsqueeze(3)?], 3)?)
}

fn main() -> Result<()> {
    let device = AcceleratorConfig::parse("auto")?.device()?;

    let config = ModelConfig::from_json(
        r#"{
            "original_features_num": 2,
            "num_blocks": 2,
            "in_features": 16,
            "out_features": 8,
            "depth_of_mlp": 2,
            "ablation": ""
        }"#,
    )?;
    let model = GraphEmbedding::new(&config, &device)?;
    let vars = model.trainable_vars();
    println!("Training with {} parameters ({} vars)", model.param_count(), vars.len());

    let mut optimizer = Optimizer::adam(vars.clone(), 1e-2)?;

    println!("\n--- Training ---");
    for epoch in 0..60 {
        // Half dense (p = 0.7), half sparse (p = 0.15)
        let probs: Vec<f32> = (0..BATCH).map(|i| if i % 2 == 0 { 0.7 } else { 0.15 }).collect();
        let labels: Vec<f32> = (0..BATCH).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();

        let graphs = random_graphs(&probs, &device)?;
        let labels = Tensor::new(labels.as_slice(), &device)?.reshape((BATCH, 1))?;

        let loss = binary_cross_entropy_with_logit(&model.forward(&graphs)?, &labels)?;
        let mut grads = loss.backward()?;
        let outcome = clipped_step(&mut optimizer, &mut grads, &vars, 1.0)?;

        if epoch % 10 == 0 {
            println!(
                "epoch {:3}: loss = {:.4} ({:?})",
                epoch,
                loss.to_scalar::<f32>()?,
                outcome
            );
        }
    }

    println!("\n--- Evaluation ---");
    let graphs = random_graphs(&[0.7, 0.15], &device)?;
    let probs = sigmoid(&model.forward(&graphs)?)?.flatten_all()?.to_vec1::<f32>()?;
    println!("dense graph  -> {:.3}", probs[0]);
    println!("sparse graph -> {:.3}", probs[1]);

    let dir = std::env::temp_dir().join("eqgraph-demo");
    let meta = save_checkpoint(&dir, &model)?;
    println!("\nSaved {} parameters to {} ({})", meta.param_count, dir.display(), meta.sha256);

    Ok(())
}
