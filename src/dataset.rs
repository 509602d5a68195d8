//! Activation dataset: batching and shuffling of cached activations
//!
//! Wraps a fixed `[n_samples, d_activation]` matrix collected elsewhere
//! (e.g. residual stream captures) and hands it out as batches.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use safetensors::tensor::SafeTensors;
use tracing::info;

use crate::error::SaeError;

/// Fixed collection of activation vectors.
#[derive(Debug, Clone)]
pub struct ActivationDataset {
    activations: Tensor,
}

impl ActivationDataset {
    /// Wrap a `[n_samples, d_activation]` matrix.
    pub fn new(activations: Tensor) -> Result<Self> {
        activations.dims2().map_err(|_| {
            SaeError::shape("dataset", "(n_samples, d_activation)", activations.dims())
        })?;
        Ok(Self { activations })
    }

    /// Build from row vectors, all of the same length.
    pub fn from_rows(rows: &[Vec<f32>], device: &Device) -> Result<Self> {
        let d = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != d) {
            return Err(SaeError::shape("dataset row", format!("({d},)"), [bad.len()]).into());
        }
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Self::new(Tensor::from_vec(flat, (rows.len(), d), device)?)
    }

    /// Load the tensor `name` from a safetensors file onto `device` as `dtype`.
    pub fn load_safetensors(path: &Path, name: &str, dtype: DType, device: &Device) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read activations file {}", path.display()))?;
        let st = SafeTensors::deserialize(&data)
            .with_context(|| format!("Failed to deserialize {}", path.display()))?;
        let view = st
            .tensor(name)
            .with_context(|| format!("Tensor '{name}' not found in {}", path.display()))?;
        let tensor = tensor_from_view(&view, device)?.to_dtype(dtype)?;
        info!(
            "Loaded activations '{name}' with shape {:?} from {}",
            tensor.dims(),
            path.display()
        );
        Self::new(tensor)
    }

    /// Number of activation vectors
    pub fn len(&self) -> usize {
        self.activations.dims()[0]
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn d_activation(&self) -> usize {
        self.activations.dims()[1]
    }

    pub fn activations(&self) -> &Tensor {
        &self.activations
    }

    /// Split into batches of `batch_size` rows; the last batch may be short.
    ///
    /// With `shuffle_seed` the rows are permuted first, reproducibly per seed.
    pub fn batches(&self, batch_size: usize, shuffle_seed: Option<u64>) -> Result<Vec<Tensor>> {
        if batch_size == 0 {
            return Err(SaeError::config("batch_size must be at least 1").into());
        }
        let n = self.len();
        let mut order: Vec<u32> = (0..n as u32).collect();
        if let Some(seed) = shuffle_seed {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }

        order
            .chunks(batch_size)
            .map(|chunk| {
                let idx = Tensor::new(chunk, self.activations.device())?;
                Ok(self.activations.index_select(&idx, 0)?)
            })
            .collect()
    }
}

/// Convert a safetensors `TensorView` to a candle `Tensor` on the given device.
fn tensor_from_view(view: &safetensors::tensor::TensorView<'_>, device: &Device) -> Result<Tensor> {
    let shape: Vec<usize> = view.shape().to_vec();
    let dtype = match view.dtype() {
        safetensors::Dtype::BF16 => DType::BF16,
        safetensors::Dtype::F16 => DType::F16,
        safetensors::Dtype::F32 => DType::F32,
        safetensors::Dtype::F64 => DType::F64,
        other => anyhow::bail!("Unsupported activation dtype: {other:?}"),
    };
    let tensor = Tensor::from_raw_buffer(view.data(), dtype, &shape, device)?;
    Ok(tensor)
}
