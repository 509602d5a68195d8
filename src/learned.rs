//! Learned dictionary: the frozen, inference-only result of training
//!
//! Holds a detached normalized dictionary `[n_features, d_activation]` and the
//! sparsity `k`. Encoding goes through the same stateless top-k path used
//! during training, so both produce identical codes for the same dictionary.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use tracing::info;

use crate::error::{check_sparsity, SaeError};
use crate::topk;

const DICTIONARY_KEY: &str = "dictionary";
const SPARSITY_KEY: &str = "sparsity";

/// Frozen top-k dictionary for inference.
///
/// Exposes no raw dictionary, optimizer state or gradients. Safe to share
/// between threads for concurrent `encode` calls.
#[derive(Debug, Clone)]
pub struct LearnedDict {
    dictionary: Tensor,
    sparsity: usize,
}

impl LearnedDict {
    /// Wrap an already-normalized `[n_features, d_activation]` dictionary.
    ///
    /// The tensor is detached from any autograd graph.
    pub fn new(dictionary: Tensor, sparsity: usize) -> Result<Self> {
        let (n_features, _) = dictionary.dims2().map_err(|_| {
            SaeError::shape("learned dictionary", "(n_features, d_activation)", dictionary.dims())
        })?;
        check_sparsity(sparsity, n_features)?;
        Ok(Self {
            dictionary: dictionary.detach(),
            sparsity,
        })
    }

    /// Top-k code `[batch, n_features]` for `x` `[batch, d_activation]`.
    pub fn encode(&self, x: &Tensor) -> Result<Tensor> {
        topk::encode(x, self.sparsity, &self.dictionary)
    }

    /// Reconstruct activations from a code matrix.
    pub fn decode(&self, code: &Tensor) -> Result<Tensor> {
        topk::decode(code, &self.dictionary)
    }

    /// Normalized dictionary `[n_features, d_activation]`.
    pub fn get_dictionary(&self) -> &Tensor {
        &self.dictionary
    }

    /// Move the stored dictionary to `device`, in place.
    ///
    /// Values are unchanged; only placement moves.
    pub fn to_device(&mut self, device: &Device) -> Result<()> {
        self.dictionary = self.dictionary.to_device(device)?;
        Ok(())
    }

    pub fn device(&self) -> &Device {
        self.dictionary.device()
    }

    pub fn sparsity(&self) -> usize {
        self.sparsity
    }

    pub fn n_features(&self) -> usize {
        self.dictionary.dims()[0]
    }

    pub fn d_activation(&self) -> usize {
        self.dictionary.dims()[1]
    }

    /// Write the dictionary and sparsity to a safetensors file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut tensors = HashMap::new();
        tensors.insert(
            DICTIONARY_KEY.to_string(),
            self.dictionary.to_device(&Device::Cpu)?,
        );
        tensors.insert(
            SPARSITY_KEY.to_string(),
            Tensor::new(&[self.sparsity as u32], &Device::Cpu)?,
        );
        candle_core::safetensors::save(&tensors, path)
            .with_context(|| format!("Failed to write learned dictionary to {}", path.display()))?;
        info!(
            "Saved learned dictionary ({} features, k={}) to {}",
            self.n_features(),
            self.sparsity,
            path.display()
        );
        Ok(())
    }

    /// Read a dictionary written by [`LearnedDict::save`] onto `device`.
    pub fn load(path: &Path, device: &Device) -> Result<Self> {
        let mut tensors = candle_core::safetensors::load(path, device)
            .with_context(|| format!("Failed to read learned dictionary from {}", path.display()))?;
        let dictionary = tensors
            .remove(DICTIONARY_KEY)
            .with_context(|| format!("Tensor '{DICTIONARY_KEY}' not found in {}", path.display()))?;
        let sparsity = tensors
            .remove(SPARSITY_KEY)
            .with_context(|| format!("Tensor '{SPARSITY_KEY}' not found in {}", path.display()))?;
        let sparsity: Vec<u32> = sparsity.to_dtype(DType::U32)?.to_vec1()?;
        let k = *sparsity
            .first()
            .ok_or_else(|| anyhow::anyhow!("Empty sparsity tensor in {}", path.display()))?;
        Self::new(dictionary, k as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::normalize_rows;

    fn sample_dict() -> LearnedDict {
        let raw = Tensor::randn(0f32, 1.0, (12, 4), &Device::Cpu).unwrap();
        LearnedDict::new(normalize_rows(&raw).unwrap(), 3).unwrap()
    }

    #[test]
    fn test_encode_matches_stateless_topk() {
        let learned = sample_dict();
        let x = Tensor::randn(0f32, 1.0, (7, 4), &Device::Cpu).unwrap();

        let a: Vec<Vec<f32>> = learned.encode(&x).unwrap().to_vec2().unwrap();
        let b: Vec<Vec<f32>> = topk::encode(&x, 3, learned.get_dictionary())
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_to_device_keeps_values() {
        let mut learned = sample_dict();
        let before: Vec<Vec<f32>> = learned.get_dictionary().to_vec2().unwrap();
        learned.to_device(&Device::Cpu).unwrap();
        assert!(learned.device().is_cpu());
        let after: Vec<Vec<f32>> = learned.get_dictionary().to_vec2().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_rejects_invalid_sparsity() {
        let raw = Tensor::ones((4, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(LearnedDict::new(raw.clone(), 5).is_err());
        assert!(LearnedDict::new(raw, 0).is_err());
    }

    #[test]
    fn test_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LearnedDict>();

        let learned = std::sync::Arc::new(sample_dict());
        let x = Tensor::randn(0f32, 1.0, (2, 4), &Device::Cpu).unwrap();
        let expected: Vec<Vec<f32>> = learned.encode(&x).unwrap().to_vec2().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let learned = std::sync::Arc::clone(&learned);
                let x = x.clone();
                std::thread::spawn(move || -> Vec<Vec<f32>> {
                    learned.encode(&x).unwrap().to_vec2().unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }
}
