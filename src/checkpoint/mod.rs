//! Checkpoints and filesystem helpers
//!
//! A checkpoint is a directory holding:
//!
//! - `weights.safetensors`: every named parameter of a [`GraphModule`], F32
//! - `checkpoint.json`: [`CheckpointMeta`] with the save time, parameter count
//!   and SHA-256 digest of the weights file
//!
//! Loading verifies the digest before touching the model, then writes each
//! stored tensor into the parameter of the same name.

use crate::model::GraphModule;
use crate::{Device, GraphNetError, Result, Tensor};
use chrono::{DateTime, Utc};
use safetensors::tensor::TensorView;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const WEIGHTS_FILE: &str = "weights.safetensors";
pub const META_FILE: &str = "checkpoint.json";

// ============================================================================
// Filesystem helpers
// ============================================================================

/// Collapse repeated `/` separators
fn normalize(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());
    let mut prev_slash = false;
    for c in raw.chars() {
        if c == '/' && prev_slash {
            continue;
        }
        prev_slash = c == '/';
        out.push(c);
    }
    PathBuf::from(out)
}

/// Create a directory and its parents if missing. Returns the normalized path.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = normalize(path.as_ref());
    std::fs::create_dir_all(&path).map_err(GraphNetError::Io)?;
    Ok(path)
}

/// Create an empty file (and its parent directory) if missing. Existing
/// contents are left alone. Returns the normalized path.
pub fn ensure_file(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = normalize(path.as_ref());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(GraphNetError::Io)?;
    Ok(path)
}

// ============================================================================
// Checkpoints
// ============================================================================

/// Sidecar metadata written next to the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub saved_at: DateTime<Utc>,
    pub param_count: usize,
    pub tensor_count: usize,
    /// Hex SHA-256 of `weights.safetensors`
    pub sha256: String,
}

impl CheckpointMeta {
    pub fn read(dir: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(dir.as_ref().join(META_FILE)).map_err(GraphNetError::Io)?;
        serde_json::from_str(&json).map_err(|e| GraphNetError::Serialization(e.to_string()))
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Save every parameter of `model` under `dir`
pub fn save_checkpoint<M: GraphModule + ?Sized>(
    dir: impl AsRef<Path>,
    model: &M,
) -> Result<CheckpointMeta> {
    let dir = ensure_dir(dir)?;
    let vars = model.named_vars();

    let mut data_store: Vec<(String, Vec<usize>, Vec<f32>)> = Vec::with_capacity(vars.len());
    for (name, var) in &vars {
        let tensor = var.as_tensor();
        let data: Vec<f32> = tensor
            .to_dtype(candle_core::DType::F32)?
            .flatten_all()?
            .to_vec1()?;
        data_store.push((name.clone(), tensor.dims().to_vec(), data));
    }

    let mut views: HashMap<String, TensorView> = HashMap::new();
    for (name, shape, data) in &data_store {
        let view = TensorView::new(
            safetensors::tensor::Dtype::F32,
            shape.clone(),
            bytemuck::cast_slice(data),
        )
        .map_err(|e| GraphNetError::Serialization(e.to_string()))?;
        views.insert(name.clone(), view);
    }

    let bytes = safetensors::serialize(views, &None)
        .map_err(|e| GraphNetError::Serialization(e.to_string()))?;
    std::fs::write(dir.join(WEIGHTS_FILE), &bytes).map_err(GraphNetError::Io)?;

    let meta = CheckpointMeta {
        saved_at: Utc::now(),
        param_count: model.param_count(),
        tensor_count: vars.len(),
        sha256: hash_bytes(&bytes),
    };
    let meta_json = serde_json::to_string_pretty(&meta)
        .map_err(|e| GraphNetError::Serialization(e.to_string()))?;
    std::fs::write(dir.join(META_FILE), meta_json).map_err(GraphNetError::Io)?;

    debug!(
        path = %dir.display(),
        tensors = meta.tensor_count,
        params = meta.param_count,
        "saved checkpoint"
    );
    Ok(meta)
}

fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    match bytemuck::try_cast_slice::<u8, f32>(bytes) {
        Ok(floats) => floats.to_vec(),
        // Unaligned buffer
        Err(_) => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    }
}

/// Restore every parameter of `model` from `dir`.
///
/// Fails without modifying the model if the digest does not match, a
/// parameter is missing, or a stored shape differs.
pub fn load_checkpoint<M: GraphModule + ?Sized>(
    dir: impl AsRef<Path>,
    model: &M,
) -> Result<CheckpointMeta> {
    let dir = normalize(dir.as_ref());
    let meta = CheckpointMeta::read(&dir)?;
    let bytes = std::fs::read(dir.join(WEIGHTS_FILE)).map_err(GraphNetError::Io)?;

    let digest = hash_bytes(&bytes);
    if digest != meta.sha256 {
        return Err(GraphNetError::Checkpoint(format!(
            "weights digest mismatch: expected {}, found {}",
            meta.sha256, digest
        )));
    }

    let tensors = SafeTensors::deserialize(&bytes)
        .map_err(|e| GraphNetError::Serialization(e.to_string()))?;

    let vars = model.named_vars();
    let mut staged: Vec<Tensor> = Vec::with_capacity(vars.len());
    for (name, var) in &vars {
        let view = tensors
            .tensor(name)
            .map_err(|_| GraphNetError::Checkpoint(format!("missing parameter '{}'", name)))?;
        if view.dtype() != safetensors::tensor::Dtype::F32 {
            return Err(GraphNetError::Checkpoint(format!(
                "parameter '{}' stored as {:?}, expected F32",
                name,
                view.dtype()
            )));
        }
        if view.shape() != var.as_tensor().dims() {
            return Err(GraphNetError::Checkpoint(format!(
                "parameter '{}' has shape {:?}, model expects {:?}",
                name,
                view.shape(),
                var.as_tensor().dims()
            )));
        }
        let device: &Device = var.as_tensor().device();
        let tensor = Tensor::from_vec(decode_f32(view.data()), view.shape(), device)
            .map_err(|e| GraphNetError::Tensor(e.to_string()))?
            .to_dtype(var.as_tensor().dtype())?;
        staged.push(tensor);
    }

    for ((_, var), tensor) in vars.iter().zip(staged.iter()) {
        var.set(tensor)?;
    }

    debug!(path = %dir.display(), tensors = vars.len(), "loaded checkpoint");
    Ok(meta)
}
