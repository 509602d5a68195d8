//! Top-K sparse coder
//!
//! Encodes a batch by scoring every example against every unit-norm
//! dictionary row and keeping only the `k` highest scores per example:
//!
//! ```text
//! scores = batch @ dict^T                      [batch, n_features]
//! code   = ReLU(scores * topk_mask(scores, k)) [batch, n_features]
//! recon  = code @ dict                         [batch, d_activation]
//! ```
//!
//! The mask is computed on the host and carries no gradient; the kept
//! score values stay on the autograd graph.
//!
//! Ties are broken lowest-index-wins, so encoding is deterministic.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use tracing::debug;

use crate::coder::{Diagnostics, LossOutput, SparseCoder};
use crate::dictionary::DictionaryStore;
use crate::error::{check_sparsity, SaeError};
use crate::learned::LearnedDict;

/// Indices of the `k` largest values, largest first.
///
/// Equal values keep their original order, so the lowest index wins a tie.
/// Every NaN, whatever its sign bit, sorts above every number.
pub fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let key = |v: f64| if v.is_nan() { f64::NAN.copysign(1.0) } else { v };
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| key(scores[b]).total_cmp(&key(scores[a])));
    order.truncate(k);
    order
}

/// 0/1 mask `[batch, n_features]` selecting the top-k entries of each row.
fn top_k_mask(scores: &Tensor, k: usize) -> Result<Tensor> {
    let (batch, n_features) = scores.dims2()?;
    // Widening to f64 is exact for every float dtype, so no ties are introduced
    let rows: Vec<Vec<f64>> = scores.detach().to_dtype(DType::F64)?.to_vec2()?;

    let mut mask = vec![0f32; batch * n_features];
    for (r, row) in rows.iter().enumerate() {
        for idx in top_k_indices(row, k) {
            mask[r * n_features + idx] = 1.0;
        }
    }

    let mask = Tensor::from_vec(mask, (batch, n_features), &Device::Cpu)?;
    Ok(mask.to_device(scores.device())?.to_dtype(scores.dtype())?)
}

fn check_batch(batch: &Tensor, d_activation: usize, context: &'static str) -> Result<()> {
    match batch.dims2() {
        Ok((_, d)) if d == d_activation => Ok(()),
        _ => Err(SaeError::shape(context, format!("(batch, {d_activation})"), batch.dims()).into()),
    }
}

/// Encode `batch` `[batch, d_activation]` against a row-normalized dictionary.
///
/// Returns a `[batch, n_features]` code with at most `k` non-zero,
/// non-negative entries per row.
pub fn encode(batch: &Tensor, k: usize, normed_dict: &Tensor) -> Result<Tensor> {
    let (n_features, d_activation) = normed_dict
        .dims2()
        .map_err(|_| SaeError::shape("encode", "(n_features, d_activation)", normed_dict.dims()))?;
    check_batch(batch, d_activation, "encode")?;
    check_sparsity(k, n_features)?;

    let scores = batch.matmul(&normed_dict.t()?)?;
    let mask = top_k_mask(&scores, k)?;
    Ok((scores * mask)?.relu()?)
}

/// Reconstruct activations as code-weighted sums of dictionary rows.
pub fn decode(code: &Tensor, normed_dict: &Tensor) -> Result<Tensor> {
    let (n_features, _) = normed_dict
        .dims2()
        .map_err(|_| SaeError::shape("decode", "(n_features, d_activation)", normed_dict.dims()))?;
    match code.dims2() {
        Ok((_, n)) if n == n_features => {}
        _ => {
            return Err(
                SaeError::shape("decode", format!("(batch, {n_features})"), code.dims()).into(),
            )
        }
    }
    Ok(code.matmul(normed_dict)?)
}

/// Trainable top-k sparse autoencoder.
#[derive(Debug)]
pub struct TopKCoder {
    dict: DictionaryStore,
    sparsity: usize,
}

impl TopKCoder {
    /// Build a coder with a randomly initialized dictionary.
    ///
    /// Fails with `InvalidConfiguration` when `sparsity` is 0 or exceeds `n_features`.
    pub fn new(
        d_activation: usize,
        n_features: usize,
        sparsity: usize,
        seed: u64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        check_sparsity(sparsity, n_features)?;
        let dict = DictionaryStore::random(n_features, d_activation, seed, dtype, device)?;
        Ok(Self { dict, sparsity })
    }

    /// Build a coder around an existing dictionary store.
    pub fn from_dictionary(dict: DictionaryStore, sparsity: usize) -> Result<Self> {
        check_sparsity(sparsity, dict.n_features())?;
        Ok(Self { dict, sparsity })
    }

    pub fn dictionary(&self) -> &DictionaryStore {
        &self.dict
    }

    pub fn sparsity(&self) -> usize {
        self.sparsity
    }

    /// Decode a code matrix with the current normalized dictionary.
    pub fn decode(&self, code: &Tensor) -> Result<Tensor> {
        decode(code, &self.dict.normalized()?)
    }

    /// Snapshot the normalized dictionary into an inference-only artifact.
    ///
    /// The snapshot is detached and deep-copied: further training does not
    /// change it.
    pub fn to_learned_dict(&self) -> Result<LearnedDict> {
        let frozen = self.dict.normalized()?.detach().copy()?;
        LearnedDict::new(frozen, self.sparsity)
    }
}

impl SparseCoder for TopKCoder {
    fn name(&self) -> &'static str {
        "topk"
    }

    fn vars(&self) -> Vec<candle_core::Var> {
        vec![self.dict.var().clone()]
    }

    fn encode(&self, batch: &Tensor) -> Result<Tensor> {
        encode(batch, self.sparsity, &self.dict.normalized()?)
    }

    fn loss(&self, batch: &Tensor) -> Result<LossOutput> {
        let normed = self.dict.normalized()?;
        let code = encode(batch, self.sparsity, &normed)?;
        let recon = decode(&code, &normed)?;
        let loss = candle_nn::loss::mse(&recon, batch)?;

        let value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        debug!("topk loss {value:.6}");

        Ok(LossOutput {
            loss,
            diagnostics: Diagnostics {
                loss: value,
                reconstruction_loss: value,
                code_penalty: 0.0,
                feature_penalty: 0.0,
                code: code.detach(),
            },
        })
    }
}
